//! Cadence - music library backend
//!
//! Scans a media directory, catalogs songs in SQLite and serves them over HTTP.

use cadence::{api, cache, core, db};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Cadence v{}", cadence::VERSION);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        media_dir = ?config.library.media_dir,
        images_dir = ?config.library.images_dir,
        cache_dir = ?config.library.cache_dir,
        "Library configuration"
    );

    for dir in [&config.library.media_dir, &config.library.images_dir] {
        if !dir.exists() {
            info!("Creating directory: {:?}", dir);
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("Failed to create directory {:?}: {}", dir, e))?;
        }
    }

    info!(path = ?config.database.path, "Initializing database...");
    let db = Arc::new(db::DatabaseManager::new(
        &config.database.path,
        config.database.connection_pool_size as u32,
        Duration::from_millis(config.database.busy_timeout),
    )?);
    db.migrate()?;
    info!("Database initialized successfully");

    let available = core::prober::builtin_probers(&config.tools).await;
    let resolver = Arc::new(core::Resolver::from_config(&config.resolver, &available)?);

    let cover_store = Arc::new(core::CoverStore::new(
        config.library.images_dir.clone(),
        &config.library.image_link_prefix,
        Arc::new(db::ImageRepository::new(db.clone())),
    ));
    let scanner = Arc::new(core::LibraryScanner::new(
        config.library.media_dir.clone(),
        resolver,
        cover_store,
        db.clone(),
    ));
    let (scan_handle, _coordinator) = core::ScanCoordinator::spawn(scanner.clone());

    if config.library.scan_on_startup {
        let handle = scan_handle.clone();
        tokio::spawn(async move {
            match handle.request_scan().await {
                Ok(report) => info!(
                    songs_added = report.songs_added,
                    files_failed = report.files_failed,
                    "Startup scan finished"
                ),
                Err(e) => error!(error = %e, "Startup scan failed"),
            }
        });
    }

    let transcode_cache = Arc::new(cache::TranscodeCache::new(config.library.cache_dir.clone())?);
    let removed = transcode_cache.remove_partials().await?;
    if removed > 0 {
        info!(count = removed, "Removed interrupted transcodes");
    }

    let transcoder = Arc::new(core::FfmpegTranscoder::new(config.tools.ffmpeg_path.clone()));
    let audio_streamer = Arc::new(core::AudioStreamer::new(
        db.clone(),
        transcode_cache,
        transcoder,
        Duration::from_secs(config.tools.transcode_timeout),
    ));

    let state = api::AppState {
        song_repo: Arc::new(db::SongRepository::new(db)),
        scanner,
        scan_handle,
        audio_streamer,
    };

    let server_url = format!("http://{}:{}", config.server.host, config.server.port);
    let server = api::ApiServer::new(config.server, state);
    info!(url = %server_url, "Server ready - starting to serve requests");

    // Blocks until shutdown signal
    server.serve().await?;

    Ok(())
}
