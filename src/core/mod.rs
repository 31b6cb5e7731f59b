//! Core business logic module
//!
//! This module provides the core application layer including:
//! - Configuration management
//! - Structured logging system
//! - Error handling and type system
//! - Metadata probing and library scanning
//! - Cover artwork storage
//! - Transcoding and audio streaming

pub mod config;
pub mod logging;
pub mod error;
pub mod utils;
pub mod audio_meta;
pub mod prober;
pub mod cover_store;
pub mod library_scanner;
pub mod transcoder;
pub mod audio_streamer;

pub use config::Config;
pub use logging::Logger;
pub use error::{CadenceError, ErrorResponse, Result, ErrorContext};
pub use audio_meta::AudioMeta;
pub use prober::{AudioProber, Resolver};
pub use cover_store::CoverStore;
pub use library_scanner::{LibraryScanner, ScanCoordinator, ScanHandle, ScanReport};
pub use transcoder::{Codec, FfmpegTranscoder, Transcoder};
pub use audio_streamer::{AudioStream, AudioStreamer};
