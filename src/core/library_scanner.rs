//! Library scanner for ingesting audio files
//!
//! [`LibraryScanner`] performs one sequential pass over the media directory,
//! creating song, artist, album and image records for files it has not seen
//! before. [`ScanCoordinator`] owns the scanner and serializes scan requests:
//! a request that arrives while a pass is running is answered by that pass.

use crate::core::cover_store::CoverStore;
use crate::core::error::{CadenceError, Result};
use crate::core::prober::{detect_mime, Resolver};
use crate::core::utils::hash_file_async;
use crate::db::models::{Image, Song};
use crate::db::repository::{AlbumRepository, ArtistRepository, Repository, SongRepository};
use crate::db::DatabaseManager;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Outcome of one scan pass, handed to every request it satisfied
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    pub songs_added: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug)]
enum Ingest {
    Added(Song),
    Skipped(&'static str),
}

/// Library scanner service
pub struct LibraryScanner {
    media_dir: PathBuf,
    resolver: Arc<Resolver>,
    cover_store: Arc<CoverStore>,
    song_repo: SongRepository,
    artist_repo: ArtistRepository,
    album_repo: AlbumRepository,
    passes: AtomicUsize,
}

impl LibraryScanner {
    pub fn new(
        media_dir: PathBuf,
        resolver: Arc<Resolver>,
        cover_store: Arc<CoverStore>,
        db: Arc<DatabaseManager>,
    ) -> Self {
        Self {
            media_dir,
            resolver,
            cover_store,
            song_repo: SongRepository::new(db.clone()),
            artist_repo: ArtistRepository::new(db.clone()),
            album_repo: AlbumRepository::new(db),
            passes: AtomicUsize::new(0),
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Number of completed passes since startup
    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }

    /// Walk the media directory once and ingest every new file.
    ///
    /// A failing file is logged and counted; it never aborts the pass.
    pub async fn scan_pass(&self) -> ScanReport {
        let started = Instant::now();
        let mut report = ScanReport::default();
        info!(path = ?self.media_dir, "Starting library scan");

        if !self.media_dir.is_dir() {
            warn!(path = ?self.media_dir, "Media directory does not exist, nothing to scan");
        } else {
            for entry in WalkDir::new(&self.media_dir).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(error = %e, "Failed to read media directory entry");
                        report.files_failed += 1;
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                match self.ingest(path).await {
                    Ok(Ingest::Added(song)) => {
                        report.songs_added += 1;
                        debug!(path = ?path, song_id = %song.id, title = %song.name, "Added song");
                    }
                    Ok(Ingest::Skipped(reason)) => {
                        report.files_skipped += 1;
                        debug!(path = ?path, reason, "Skipped file");
                    }
                    Err(e) => {
                        report.files_failed += 1;
                        warn!(path = ?path, error = %e, "Failed to ingest file");
                    }
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        self.passes.fetch_add(1, Ordering::SeqCst);

        info!(
            songs_added = report.songs_added,
            files_skipped = report.files_skipped,
            files_failed = report.files_failed,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Library scan completed"
        );
        report
    }

    async fn ingest(&self, path: &Path) -> Result<Ingest> {
        let mime = detect_mime(path).await?;
        if !self.resolver.has_prober(&mime) {
            return Ok(Ingest::Skipped("no prober for mime type"));
        }

        let hash = hash_file_async(path.to_path_buf()).await?;
        if self.song_repo.exists_by_hash(&hash).await? {
            return Ok(Ingest::Skipped("already ingested"));
        }

        let mut meta = self.resolver.probe_as(path, &mime).await?;

        let cover = match meta.cover.take() {
            Some(bytes) => self.store_cover(path, &bytes).await,
            None => None,
        };
        let cover_id = cover.map(|image| image.id);

        let artist_id = if meta.artist.is_empty() {
            None
        } else {
            Some(self.artist_repo.find_or_create(&meta.artist).await?.id)
        };

        let album_id = if meta.album.is_empty() {
            None
        } else {
            let year = (meta.year > 0).then_some(meta.year);
            let album = self.album_repo.find_or_create(&meta.album, year, cover_id.clone()).await?;
            if let (None, Some(cover_id)) = (&album.cover_id, &cover_id) {
                self.album_repo.attach_cover_if_missing(&album.id, cover_id).await?;
            }
            Some(album.id)
        };

        let name = if meta.title.is_empty() {
            file_stem(path)
        } else {
            std::mem::take(&mut meta.title)
        };

        let song = Song {
            id: Uuid::new_v4().to_string(),
            hash,
            path: path.to_string_lossy().into_owned(),
            name,
            mime,
            genre: (!meta.genre.is_empty()).then(|| meta.genre.clone()),
            year: (meta.year > 0).then_some(meta.year),
            track: (meta.track > 0).then_some(meta.track),
            total_tracks: (meta.total_tracks > 0).then_some(meta.total_tracks),
            duration: meta.duration,
            played: 0,
            artist_id,
            album_id,
            cover_id,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.song_repo.create(&song).await?;

        Ok(Ingest::Added(song))
    }

    /// A cover that cannot be stored is dropped; the song is still created
    async fn store_cover(&self, path: &Path, bytes: &[u8]) -> Option<Image> {
        match self.cover_store.store(bytes).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to store cover art");
                None
            }
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Cloneable entry point for requesting scans
#[derive(Clone)]
pub struct ScanHandle {
    tx: mpsc::Sender<oneshot::Sender<ScanReport>>,
}

impl ScanHandle {
    /// Wait until a scan pass that was running or started after this call
    /// has completed.
    pub async fn request_scan(&self) -> Result<ScanReport> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(done_tx)
            .await
            .map_err(|_| CadenceError::TaskError("scan coordinator has stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| CadenceError::TaskError("scan pass was abandoned".to_string()))
    }
}

/// Single owner of the scanner; runs at most one pass at a time
pub struct ScanCoordinator {
    scanner: Arc<LibraryScanner>,
    requests: mpsc::Receiver<oneshot::Sender<ScanReport>>,
}

impl ScanCoordinator {
    const QUEUE_SIZE: usize = 64;

    /// Start the coordinator task. It stops once every handle is dropped.
    pub fn spawn(scanner: Arc<LibraryScanner>) -> (ScanHandle, JoinHandle<()>) {
        let (tx, requests) = mpsc::channel(Self::QUEUE_SIZE);
        let coordinator = Self { scanner, requests };
        let task = tokio::spawn(coordinator.run());
        (ScanHandle { tx }, task)
    }

    async fn run(mut self) {
        while let Some(first) = self.requests.recv().await {
            let mut waiters = vec![first];
            while let Ok(waiter) = self.requests.try_recv() {
                waiters.push(waiter);
            }

            let pass = self.scanner.scan_pass();
            tokio::pin!(pass);

            let report = loop {
                tokio::select! {
                    report = &mut pass => break report,
                    Some(waiter) = self.requests.recv() => waiters.push(waiter),
                }
            };

            debug!(waiters = waiters.len(), "Scan pass satisfied pending requests");
            for waiter in waiters {
                // The caller may have gone away
                let _ = waiter.send(report.clone());
            }
        }
        debug!("Scan coordinator stopped");
    }
}
