//! Cadence Library
//!
//! Music library backend: scans a media directory into SQLite, stores cover
//! artwork by content hash, and streams songs over HTTP with optional
//! on-demand transcoding.

pub mod api;
pub mod cache;
pub mod core;
pub mod db;

// Re-export commonly used types
pub use api::ApiServer;
pub use cache::TranscodeCache;
pub use crate::core::{AudioStreamer, Config, LibraryScanner, ScanCoordinator};
pub use db::DatabaseManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias for the library
pub type Result<T> = anyhow::Result<T>;
