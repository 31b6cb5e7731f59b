//! Configuration management

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use config::{builder::DefaultState, Config as ConfigBuilder, ConfigBuilder as Builder, ConfigError as BuilderError, Environment, File};
use clap::Parser;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid library configuration: {0}")]
    InvalidLibrary(String),

    #[error("Invalid tools configuration: {0}")]
    InvalidTools(String),

    #[error("Invalid resolver configuration: {0}")]
    InvalidResolver(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<ConfigError> for crate::core::error::CadenceError {
    fn from(err: ConfigError) -> Self {
        crate::core::error::CadenceError::ConfigError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub library: LibraryConfig,
    pub tools: ToolsConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(&CliArgs::parse())
    }

    /// Load configuration using already parsed command-line arguments
    pub fn from_args(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = defaults()?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string()
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Environment variables are prefixed with CADENCE_ and use __ for nesting
        // Example: CADENCE_LIBRARY__MEDIA_DIR=/srv/music
        builder = builder.add_source(
            Environment::with_prefix("CADENCE")
                .separator("__")
                .try_parsing(true)
        );

        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(media_dir) = &cli_args.media_dir {
            builder = builder.set_override("library.media_dir", media_dir.display().to_string())?;
        }
        if cli_args.no_initial_scan {
            builder = builder.set_override("library.scan_on_startup", false)?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.library.validate()?;
        self.tools.validate()?;
        self.resolver.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn defaults() -> Result<Builder<DefaultState>, ConfigError> {
    Ok(ConfigBuilder::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 8080)?
        .set_default("server.allowed_origins", vec!["*"])?
        .set_default("database.path", "./data/cadence.db")?
        .set_default("database.connection_pool_size", 4)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("library.media_dir", "./media")?
        .set_default("library.images_dir", "./images")?
        .set_default("library.image_link_prefix", "/images")?
        .set_default("library.cache_dir", "./cache/transcodings")?
        .set_default("library.scan_on_startup", true)?
        .set_default("tools.ffmpeg_path", "ffmpeg")?
        .set_default("tools.ffprobe_path", "ffprobe")?
        .set_default("tools.probe_timeout", 30)?
        .set_default("tools.transcode_timeout", 600)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_backups", 5)?)
}

/// Command-line arguments for configuration override
#[derive(Debug, Default, Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence music library server", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Database file path
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Root directory of the music library
    #[arg(short, long, value_name = "DIR")]
    pub media_dir: Option<PathBuf>,

    /// Skip the library scan normally run at startup
    #[arg(long)]
    pub no_initial_scan: bool,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS origins; `*` allows any
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidServer("port must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase("connection_pool_size must be greater than 0".to_string()));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase("busy_timeout must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    pub media_dir: PathBuf,
    pub images_dir: PathBuf,
    pub image_link_prefix: String,
    pub cache_dir: PathBuf,
    pub scan_on_startup: bool,
}

impl LibraryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, dir) in [
            ("media_dir", &self.media_dir),
            ("images_dir", &self.images_dir),
            ("cache_dir", &self.cache_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(ConfigError::InvalidLibrary(format!("{} cannot be empty", name)));
            }
        }

        if !self.image_link_prefix.starts_with('/') {
            return Err(ConfigError::InvalidLibrary(
                "image_link_prefix must start with '/'".to_string()
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub probe_timeout: u64, // seconds
    pub transcode_timeout: u64, // seconds
}

impl ToolsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ffmpeg_path.as_os_str().is_empty() || self.ffprobe_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidTools("tool paths cannot be empty".to_string()));
        }

        if self.probe_timeout == 0 {
            return Err(ConfigError::InvalidTools("probe_timeout must be greater than 0".to_string()));
        }

        if self.transcode_timeout == 0 {
            return Err(ConfigError::InvalidTools("transcode_timeout must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout)
    }
}

/// One MIME class and the ordered strategies tried for it
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProberGroupConfig {
    /// Regular expression matched against the detected MIME type
    pub mime: String,
    pub strategies: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_prober_groups")]
    pub groups: Vec<ProberGroupConfig>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { groups: default_prober_groups() }
    }
}

pub const STRATEGY_NAMES: &[&str] = &["id3", "container", "ffprobe"];

fn default_prober_groups() -> Vec<ProberGroupConfig> {
    let group = |mime: &str, strategies: &[&str]| ProberGroupConfig {
        mime: mime.to_string(),
        strategies: strategies.iter().map(|s| s.to_string()).collect(),
    };

    vec![
        group("^audio/(mpeg|mp3)$", &["id3", "container", "ffprobe"]),
        group("^audio/(x-)?flac$", &["container", "ffprobe"]),
        group("^audio/(ogg|vorbis|x-vorbis\\+ogg|opus)$", &["container", "ffprobe"]),
        group("^audio/(mp4|x-m4a|m4a|aac)$", &["container", "ffprobe"]),
        group("^audio/(wav|x-wav|wave)$", &["container", "ffprobe"]),
    ]
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for group in &self.groups {
            regex::Regex::new(&group.mime).map_err(|e| {
                ConfigError::InvalidResolver(format!("invalid mime pattern {:?}: {}", group.mime, e))
            })?;

            if group.strategies.is_empty() {
                return Err(ConfigError::InvalidResolver(format!(
                    "group {:?} has no strategies", group.mime
                )));
            }

            if let Some(unknown) = group.strategies.iter().find(|s| !STRATEGY_NAMES.contains(&s.as_str())) {
                return Err(ConfigError::InvalidResolver(format!(
                    "unknown strategy {:?}, expected one of {:?}", unknown, STRATEGY_NAMES
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("level must be one of: {:?}", valid_levels)
            ));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("format must be one of: {:?}", valid_formats)
            ));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("output must be one of: {:?}", valid_outputs)
            ));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string()
            ));
        }

        if self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging("max_backups must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config: Config = defaults().unwrap().build().unwrap().try_deserialize().unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.allowed_origins, vec!["*"]);
        assert_eq!(config.library.cache_dir, PathBuf::from("./cache/transcodings"));
        assert_eq!(config.resolver.groups.len(), 5);
        assert_eq!(config.resolver.groups[0].strategies, vec!["id3", "container", "ffprobe"]);
        assert_eq!(config.tools.transcode_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cadence.toml");
        std::fs::write(
            &path,
            r#"
[library]
media_dir = "/srv/music"

[[resolver.groups]]
mime = "^audio/mpeg$"
strategies = ["ffprobe", "id3"]
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.library.media_dir, PathBuf::from("/srv/music"));
        assert_eq!(config.library.images_dir, PathBuf::from("./images"));
        assert_eq!(
            config.resolver.groups,
            vec![ProberGroupConfig {
                mime: "^audio/mpeg$".to_string(),
                strategies: vec!["ffprobe".to_string(), "id3".to_string()],
            }]
        );
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let resolver = ResolverConfig {
            groups: vec![ProberGroupConfig {
                mime: "^audio/mpeg$".to_string(),
                strategies: vec!["musicbrainz".to_string()],
            }],
        };
        assert!(matches!(resolver.validate(), Err(ConfigError::InvalidResolver(_))));
    }

    #[test]
    fn test_invalid_mime_pattern_rejected() {
        let resolver = ResolverConfig {
            groups: vec![ProberGroupConfig {
                mime: "audio/(mpeg".to_string(),
                strategies: vec!["id3".to_string()],
            }],
        };
        assert!(resolver.validate().is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let args = CliArgs {
            config: Some(PathBuf::from("/nonexistent/cadence.toml")),
            ..Default::default()
        };
        assert!(matches!(Config::from_args(&args), Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_file_logging_requires_path() {
        let logging = LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            output: "file".to_string(),
            log_file: None,
            max_backups: 3,
        };
        assert!(logging.validate().is_err());
    }
}
