//! Database models
//!
//! Data structures representing database tables

use serde::{Deserialize, Serialize};

/// Artist record, unique by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// Album record, unique by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub name: String,
    pub year: Option<i32>,
    pub cover_id: Option<String>,
    pub created_at: String,
}

/// Stored artwork, unique by content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub hash: String,
    pub path: String,
    /// URL path the artwork is served under, e.g. `/images/<hash>.jpg`
    pub link: String,
    pub mime: String,
    pub created_at: String,
}

/// Song record, unique by content hash of the audio file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub hash: String,
    pub path: String,
    pub name: String,
    pub mime: String,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub track: Option<u32>,
    pub total_tracks: Option<u32>,
    pub duration: f64, // seconds
    pub played: i64,
    pub artist_id: Option<String>,
    pub album_id: Option<String>,
    pub cover_id: Option<String>,
    pub created_at: String,
}
