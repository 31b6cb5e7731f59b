//! Database module
//!
//! This module provides the persistence collaborator of the pipeline:
//! - Database connection pool management
//! - Repository pattern implementations
//! - Database migrations
//! - Data models and schemas

pub mod manager;
pub mod models;
pub mod repository;
pub mod migrations;

pub use manager::DatabaseManager;
pub use models::{Album, Artist, Image, Song};
pub use repository::{
    Repository, AlbumRepository, ArtistRepository, ImageRepository, SongRepository
};
