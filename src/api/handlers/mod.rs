pub mod library;
pub mod media;
pub mod system;

pub use library::*;
pub use media::*;
pub use system::*;

use crate::core::audio_streamer::AudioStreamer;
use crate::core::library_scanner::{LibraryScanner, ScanHandle};
use crate::db::repository::SongRepository;
use std::sync::Arc;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub song_repo: Arc<SongRepository>,
    pub scanner: Arc<LibraryScanner>,
    pub scan_handle: ScanHandle,
    pub audio_streamer: Arc<AudioStreamer>,
}
