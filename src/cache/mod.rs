//! Transcode cache management
//!
//! Transcoded files live in one flat directory as `{content_hash}.{ext}`.
//! Output is first written to `{content_hash}.{ext}.part` and renamed into
//! place once complete, so a visible cache file is always whole.

use crate::core::error::CadenceError;
use crate::core::transcoder::Codec;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

const PARTIAL_EXTENSION: &str = "part";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
}

impl From<CacheError> for CadenceError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Io(e) => CadenceError::IoError(e),
            CacheError::InvalidKey(key) => CadenceError::InvalidRequest(format!("invalid cache key: {}", key)),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Lock for one key and the number of tasks holding or awaiting it
struct KeySlot {
    lock: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

type LockMap = Arc<Mutex<HashMap<PathBuf, KeySlot>>>;

/// One task's registration on a key. The key is forgotten when the last
/// registration drops, whether it ever got the lock or not.
struct KeyRef {
    key: PathBuf,
    locks: LockMap,
}

impl Drop for KeyRef {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = locks.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

/// Exclusive hold on one cache key
pub struct KeyGuard {
    // Released before the registration below
    _guard: OwnedMutexGuard<()>,
    _key: KeyRef,
}

/// Disk cache of transcoded audio
pub struct TranscodeCache {
    cache_dir: PathBuf,
    locks: LockMap,
}

impl TranscodeCache {
    /// Open the cache, creating its directory when needed
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }

        Ok(Self {
            cache_dir,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the finished transcode of `hash` into `codec` lives
    pub fn cache_path(&self, hash: &str, codec: Codec) -> Result<PathBuf> {
        validate_key(hash)?;
        Ok(self.cache_dir.join(format!("{}.{}", hash, codec.extension())))
    }

    /// Where a transcode in progress is written
    pub fn partial_path(&self, hash: &str, codec: Codec) -> Result<PathBuf> {
        validate_key(hash)?;
        Ok(self
            .cache_dir
            .join(format!("{}.{}.{}", hash, codec.extension(), PARTIAL_EXTENSION)))
    }

    /// Wait for exclusive access to the cache file at `path`
    pub async fn lock(&self, path: &Path) -> KeyGuard {
        let (key, lock) = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = locks.entry(path.to_path_buf()).or_insert_with(|| KeySlot {
                lock: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            let key = KeyRef {
                key: path.to_path_buf(),
                locks: self.locks.clone(),
            };
            (key, slot.lock.clone())
        };

        KeyGuard {
            _guard: lock.lock_owned().await,
            _key: key,
        }
    }

    /// Number of keys currently locked or awaited
    pub fn active_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Delete partial files left behind by an interrupted transcode.
    ///
    /// Meant for startup, before any transcode can be in flight.
    pub async fn remove_partials(&self) -> Result<usize> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.cache_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_partial(&path) {
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = ?path, error = %e, "Failed to delete partial cache file");
            } else {
                count += 1;
            }
        }

        if count > 0 {
            tracing::info!(count, "Removed stale partial cache files");
        }
        Ok(count)
    }
}

fn is_partial(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some(PARTIAL_EXTENSION)
}

/// Keys are content hashes; anything else could escape the cache directory
fn validate_key(hash: &str) -> Result<()> {
    if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CacheError::InvalidKey(hash.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    const HASH: &str = "9e107d9d372bb6826bd81d3542a419d6";

    #[test]
    fn test_paths_are_deterministic() {
        let dir = TempDir::new().unwrap();
        let cache = TranscodeCache::new(dir.path().join("cache")).unwrap();

        assert!(dir.path().join("cache").is_dir());
        assert_eq!(
            cache.cache_path(HASH, Codec::Vorbis).unwrap(),
            dir.path().join("cache").join(format!("{}.ogg", HASH))
        );
        assert_eq!(
            cache.partial_path(HASH, Codec::Mp3).unwrap(),
            dir.path().join("cache").join(format!("{}.mp3.part", HASH))
        );
    }

    #[test]
    fn test_rejects_non_hash_keys() {
        let dir = TempDir::new().unwrap();
        let cache = TranscodeCache::new(dir.path().to_path_buf()).unwrap();

        for key in ["", "../etc/passwd", "abc/def", "not-a-hash"] {
            assert!(matches!(cache.cache_path(key, Codec::Mp3), Err(CacheError::InvalidKey(_))), "{}", key);
        }
    }

    #[tokio::test]
    async fn test_remove_partials_keeps_finished_files() {
        let dir = TempDir::new().unwrap();
        let cache = TranscodeCache::new(dir.path().to_path_buf()).unwrap();

        let done = cache.cache_path(HASH, Codec::Mp3).unwrap();
        let partial = cache.partial_path(HASH, Codec::Opus).unwrap();
        std::fs::write(&done, b"complete").unwrap();
        std::fs::write(&partial, b"half").unwrap();

        assert_eq!(cache.remove_partials().await.unwrap(), 1);
        assert!(done.exists());
        assert!(!partial.exists());
        assert_eq!(cache.remove_partials().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_key_lock_is_exclusive_and_released() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(TranscodeCache::new(dir.path().to_path_buf()).unwrap());
        let key = cache.cache_path(HASH, Codec::Mp3).unwrap();

        let guard = cache.lock(&key).await;
        assert_eq!(cache.active_keys(), 1);

        let contender = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = cache.lock(&key).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(cache.active_keys(), 0);

        // Other keys never wait on each other
        let other = cache.cache_path("abcdef", Codec::Mp3).unwrap();
        let _a = cache.lock(&key).await;
        let _b = cache.lock(&other).await;
        assert_eq!(cache.active_keys(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_key() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(TranscodeCache::new(dir.path().to_path_buf()).unwrap());
        let key = cache.cache_path(HASH, Codec::Mp3).unwrap();

        let holder = cache.lock(&key).await;
        let waiter = {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = cache.lock(&key).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The waiter is handed the lock but cancelled before it runs again
        drop(holder);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(cache.active_keys(), 0);
    }
}
