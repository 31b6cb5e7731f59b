//! Database migrations
//!
//! Versioned schema migrations, each applied inside its own transaction.

use crate::core::error::{CadenceError, Result};
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Initial library schema (version 1)
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS artists (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL
);

-- Content-addressed artwork; hash is the MD5 of the image bytes
CREATE TABLE IF NOT EXISTS images (
    id TEXT PRIMARY KEY,
    hash TEXT UNIQUE NOT NULL,
    path TEXT UNIQUE NOT NULL,
    link TEXT UNIQUE NOT NULL,
    mime TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS albums (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    year INTEGER,
    cover_id TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (cover_id) REFERENCES images(id)
);

-- Songs are keyed by the MD5 of the whole audio file
CREATE TABLE IF NOT EXISTS songs (
    id TEXT PRIMARY KEY,
    hash TEXT UNIQUE NOT NULL,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    mime TEXT NOT NULL,
    genre TEXT,
    year INTEGER,
    track INTEGER,
    total_tracks INTEGER,
    duration REAL NOT NULL DEFAULT 0,
    played INTEGER NOT NULL DEFAULT 0,
    artist_id TEXT,
    album_id TEXT,
    cover_id TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (artist_id) REFERENCES artists(id),
    FOREIGN KEY (album_id) REFERENCES albums(id),
    FOREIGN KEY (cover_id) REFERENCES images(id)
);

CREATE INDEX IF NOT EXISTS idx_songs_artist ON songs(artist_id);
CREATE INDEX IF NOT EXISTS idx_songs_album ON songs(album_id);
"#;

/// Ordered list of (version, description, sql)
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "Initial library schema", MIGRATION_V1),
];

/// Bring the schema up to the latest version
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_TABLE)?;

    let current_version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, description, sql) in MIGRATIONS {
        if current_version < version {
            info!(version, "Applying migration: {}", description);
            apply_migration(conn, version, sql)?;
        }
    }

    Ok(())
}

/// Latest schema version known to this build
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(v, _, _)| *v).unwrap_or(0)
}

fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        CadenceError::DatabaseError(e)
    })?;

    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])?;
    tx.commit()?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}
