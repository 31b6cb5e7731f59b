//! Repository pattern implementation for data access layer
//!
//! Besides the generic lookups, each repository exposes the natural-key
//! operations the scan pipeline relies on (find-or-create by name, lookup by
//! content hash).

use crate::core::error::Result;
use crate::db::manager::DatabaseManager;
use crate::db::models::{Album, Artist, Image, Song};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

/// Generic repository trait for read and insert operations
#[async_trait]
pub trait Repository<T>: Send + Sync {
    /// Find an entity by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Find all entities
    async fn find_all(&self) -> Result<Vec<T>>;

    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<()>;
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

const ARTIST_COLUMNS: &str = "id, name, created_at";

fn artist_from_row(row: &Row) -> rusqlite::Result<Artist> {
    Ok(Artist {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
    })
}

/// Repository for Artist entities
pub struct ArtistRepository {
    db: Arc<DatabaseManager>,
}

impl ArtistRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Artist>> {
        let name = name.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM artists WHERE name = ?", ARTIST_COLUMNS),
                [&name],
                artist_from_row,
            ).optional()?)
        }).await
    }

    /// Return the artist called `name`, inserting it first if needed
    pub async fn find_or_create(&self, name: &str) -> Result<Artist> {
        let name = name.to_string();
        self.db.transaction(move |tx| {
            tx.execute(
                "INSERT INTO artists (id, name, created_at) VALUES (?, ?, ?) \
                 ON CONFLICT(name) DO NOTHING",
                params![new_id(), name, now()],
            )?;
            Ok(tx.query_row(
                &format!("SELECT {} FROM artists WHERE name = ?", ARTIST_COLUMNS),
                [&name],
                artist_from_row,
            )?)
        }).await
    }
}

#[async_trait]
impl Repository<Artist> for ArtistRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Artist>> {
        let id = id.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM artists WHERE id = ?", ARTIST_COLUMNS),
                [&id],
                artist_from_row,
            ).optional()?)
        }).await
    }

    async fn find_all(&self) -> Result<Vec<Artist>> {
        self.db.execute(|conn| {
            let mut stmt = conn.prepare(
                &format!("SELECT {} FROM artists ORDER BY name", ARTIST_COLUMNS),
            )?;
            let artists = stmt.query_map([], artist_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(artists)
        }).await
    }

    async fn create(&self, artist: &Artist) -> Result<()> {
        let artist = artist.clone();
        self.db.execute(move |conn| {
            conn.execute(
                "INSERT INTO artists (id, name, created_at) VALUES (?, ?, ?)",
                params![artist.id, artist.name, artist.created_at],
            )?;
            Ok(())
        }).await
    }
}

const ALBUM_COLUMNS: &str = "id, name, year, cover_id, created_at";

fn album_from_row(row: &Row) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get(0)?,
        name: row.get(1)?,
        year: row.get(2)?,
        cover_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Repository for Album entities
pub struct AlbumRepository {
    db: Arc<DatabaseManager>,
}

impl AlbumRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Album>> {
        let name = name.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM albums WHERE name = ?", ALBUM_COLUMNS),
                [&name],
                album_from_row,
            ).optional()?)
        }).await
    }

    /// Return the album called `name`, inserting it first if needed.
    ///
    /// `year` and `cover_id` are only used when the album is created; an
    /// existing album keeps the values of the song that created it.
    pub async fn find_or_create(
        &self,
        name: &str,
        year: Option<i32>,
        cover_id: Option<String>,
    ) -> Result<Album> {
        let name = name.to_string();
        self.db.transaction(move |tx| {
            tx.execute(
                "INSERT INTO albums (id, name, year, cover_id, created_at) VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT(name) DO NOTHING",
                params![new_id(), name, year, cover_id, now()],
            )?;
            Ok(tx.query_row(
                &format!("SELECT {} FROM albums WHERE name = ?", ALBUM_COLUMNS),
                [&name],
                album_from_row,
            )?)
        }).await
    }

    /// Set the album cover unless one is already attached.
    /// Returns whether the album was updated.
    pub async fn attach_cover_if_missing(&self, album_id: &str, cover_id: &str) -> Result<bool> {
        let album_id = album_id.to_string();
        let cover_id = cover_id.to_string();
        self.db.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE albums SET cover_id = ? WHERE id = ? AND cover_id IS NULL",
                params![cover_id, album_id],
            )?;
            Ok(changed > 0)
        }).await
    }
}

#[async_trait]
impl Repository<Album> for AlbumRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Album>> {
        let id = id.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM albums WHERE id = ?", ALBUM_COLUMNS),
                [&id],
                album_from_row,
            ).optional()?)
        }).await
    }

    async fn find_all(&self) -> Result<Vec<Album>> {
        self.db.execute(|conn| {
            let mut stmt = conn.prepare(
                &format!("SELECT {} FROM albums ORDER BY name", ALBUM_COLUMNS),
            )?;
            let albums = stmt.query_map([], album_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(albums)
        }).await
    }

    async fn create(&self, album: &Album) -> Result<()> {
        let album = album.clone();
        self.db.execute(move |conn| {
            conn.execute(
                "INSERT INTO albums (id, name, year, cover_id, created_at) VALUES (?, ?, ?, ?, ?)",
                params![album.id, album.name, album.year, album.cover_id, album.created_at],
            )?;
            Ok(())
        }).await
    }
}

const IMAGE_COLUMNS: &str = "id, hash, path, link, mime, created_at";

fn image_from_row(row: &Row) -> rusqlite::Result<Image> {
    Ok(Image {
        id: row.get(0)?,
        hash: row.get(1)?,
        path: row.get(2)?,
        link: row.get(3)?,
        mime: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Repository for Image entities
pub struct ImageRepository {
    db: Arc<DatabaseManager>,
}

impl ImageRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Find an image by the hash of its content
    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<Image>> {
        let hash = hash.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM images WHERE hash = ?", IMAGE_COLUMNS),
                [&hash],
                image_from_row,
            ).optional()?)
        }).await
    }
}

#[async_trait]
impl Repository<Image> for ImageRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Image>> {
        let id = id.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM images WHERE id = ?", IMAGE_COLUMNS),
                [&id],
                image_from_row,
            ).optional()?)
        }).await
    }

    async fn find_all(&self) -> Result<Vec<Image>> {
        self.db.execute(|conn| {
            let mut stmt = conn.prepare(
                &format!("SELECT {} FROM images ORDER BY created_at", IMAGE_COLUMNS),
            )?;
            let images = stmt.query_map([], image_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(images)
        }).await
    }

    async fn create(&self, image: &Image) -> Result<()> {
        let image = image.clone();
        self.db.execute(move |conn| {
            conn.execute(
                "INSERT INTO images (id, hash, path, link, mime, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                params![image.id, image.hash, image.path, image.link, image.mime, image.created_at],
            )?;
            Ok(())
        }).await
    }
}

const SONG_COLUMNS: &str = "id, hash, path, name, mime, genre, year, track, total_tracks, \
                            duration, played, artist_id, album_id, cover_id, created_at";

fn song_from_row(row: &Row) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        hash: row.get(1)?,
        path: row.get(2)?,
        name: row.get(3)?,
        mime: row.get(4)?,
        genre: row.get(5)?,
        year: row.get(6)?,
        track: row.get(7)?,
        total_tracks: row.get(8)?,
        duration: row.get(9)?,
        played: row.get(10)?,
        artist_id: row.get(11)?,
        album_id: row.get(12)?,
        cover_id: row.get(13)?,
        created_at: row.get(14)?,
    })
}

/// Repository for Song entities
pub struct SongRepository {
    db: Arc<DatabaseManager>,
}

impl SongRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Whether a song with this content hash was already ingested
    pub async fn exists_by_hash(&self, hash: &str) -> Result<bool> {
        let hash = hash.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM songs WHERE hash = ?)",
                [&hash],
                |row| row.get(0),
            )?)
        }).await
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<Song>> {
        let hash = hash.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM songs WHERE hash = ?", SONG_COLUMNS),
                [&hash],
                song_from_row,
            ).optional()?)
        }).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.db.execute(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?)
        }).await
    }
}

#[async_trait]
impl Repository<Song> for SongRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Song>> {
        let id = id.to_string();
        self.db.execute(move |conn| {
            Ok(conn.query_row(
                &format!("SELECT {} FROM songs WHERE id = ?", SONG_COLUMNS),
                [&id],
                song_from_row,
            ).optional()?)
        }).await
    }

    async fn find_all(&self) -> Result<Vec<Song>> {
        self.db.execute(|conn| {
            let mut stmt = conn.prepare(
                &format!("SELECT {} FROM songs ORDER BY created_at", SONG_COLUMNS),
            )?;
            let songs = stmt.query_map([], song_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(songs)
        }).await
    }

    async fn create(&self, song: &Song) -> Result<()> {
        let song = song.clone();
        self.db.execute(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO songs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    SONG_COLUMNS
                ),
                params![
                    song.id,
                    song.hash,
                    song.path,
                    song.name,
                    song.mime,
                    song.genre,
                    song.year,
                    song.track,
                    song.total_tracks,
                    song.duration,
                    song.played,
                    song.artist_id,
                    song.album_id,
                    song.cover_id,
                    song.created_at,
                ],
            )?;
            Ok(())
        }).await
    }
}
