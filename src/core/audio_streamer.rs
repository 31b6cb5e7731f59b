//! Audio Streaming Module
//!
//! Opens songs for playback, either as stored or transcoded to a requested
//! codec. Transcodes are materialized into the [`TranscodeCache`] before
//! serving so every stream is a plain file that supports seeking:
//! - cache hit: the cached file is opened directly
//! - cache miss: the encoder runs to completion in a detached task under a
//!   per-key lock, then the finished file is renamed into place and opened
//!
//! Also provides HTTP Range header parsing for the streaming endpoint.

use crate::cache::TranscodeCache;
use crate::core::error::{CadenceError, Result};
use crate::core::transcoder::{transcode_file, Codec, Transcoder};
use crate::db::models::Song;
use crate::db::repository::{Repository, SongRepository};
use crate::db::DatabaseManager;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tracing::{debug, info, warn};

/// An open, seekable audio byte stream. Closing is dropping.
#[derive(Debug)]
pub struct AudioStream {
    file: File,
    path: PathBuf,
    len: u64,
    content_type: String,
}

impl AudioStream {
    async fn open(path: &Path, content_type: &str) -> Result<Self> {
        let file = File::open(path).await.map_err(|e| {
            CadenceError::StreamUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let len = file.metadata().await?.len();

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            content_type: content_type.to_string(),
        })
    }

    /// Total size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// File backing this stream: the original or a cache entry
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsyncRead for AudioStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

impl AsyncSeek for AudioStream {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.file).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Pin::new(&mut self.file).poll_complete(cx)
    }
}

/// Audio streamer service
pub struct AudioStreamer {
    song_repo: SongRepository,
    cache: Arc<TranscodeCache>,
    transcoder: Arc<dyn Transcoder>,
    transcode_timeout: Duration,
}

impl AudioStreamer {
    pub fn new(
        db: Arc<DatabaseManager>,
        cache: Arc<TranscodeCache>,
        transcoder: Arc<dyn Transcoder>,
        transcode_timeout: Duration,
    ) -> Self {
        Self {
            song_repo: SongRepository::new(db),
            cache,
            transcoder,
            transcode_timeout,
        }
    }

    /// Look up a song by id and open it
    pub async fn open_stream(&self, song_id: &str, codec: Option<Codec>) -> Result<AudioStream> {
        let song = self
            .song_repo
            .find_by_id(song_id)
            .await?
            .ok_or_else(|| CadenceError::NotFound(format!("Song not found: {}", song_id)))?;
        self.open(&song, codec).await
    }

    /// Open `song` as stored, or transcoded to `codec`
    pub async fn open(&self, song: &Song, codec: Option<Codec>) -> Result<AudioStream> {
        let codec = match codec {
            Some(codec) => codec,
            None => return AudioStream::open(Path::new(&song.path), &song.mime).await,
        };

        let cached = self.cache.cache_path(&song.hash, codec)?;
        if tokio::fs::try_exists(&cached).await? {
            debug!(song_id = %song.id, codec = %codec, "Transcode cache hit");
            return AudioStream::open(&cached, codec.mime_type()).await;
        }

        // Detached: once started, a transcode lands in the cache even if
        // every caller waiting on it has gone away.
        let job = TranscodeJob {
            cache: self.cache.clone(),
            transcoder: self.transcoder.clone(),
            timeout: self.transcode_timeout,
            song: song.clone(),
            codec,
            cached: cached.clone(),
        };
        tokio::spawn(job.run())
            .await
            .map_err(|e| CadenceError::TaskError(format!("transcode task failed: {}", e)))??;

        AudioStream::open(&cached, codec.mime_type()).await
    }
}

/// One cache fill, owned by its own task
struct TranscodeJob {
    cache: Arc<TranscodeCache>,
    transcoder: Arc<dyn Transcoder>,
    timeout: Duration,
    song: Song,
    codec: Codec,
    cached: PathBuf,
}

impl TranscodeJob {
    async fn run(self) -> Result<()> {
        let _guard = self.cache.lock(&self.cached).await;
        // Another request may have finished this transcode while we waited
        if tokio::fs::try_exists(&self.cached).await? {
            return Ok(());
        }

        let (song, codec) = (&self.song, self.codec);
        let partial = self.cache.partial_path(&song.hash, codec)?;
        info!(song_id = %song.id, codec = %codec, "Transcoding song");

        let outcome = tokio::time::timeout(
            self.timeout,
            transcode_file(self.transcoder.as_ref(), codec, Path::new(&song.path), &partial),
        )
        .await;

        let result = match outcome {
            Ok(Ok(_)) => tokio::fs::rename(&partial, &self.cached).await.map_err(CadenceError::from),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CadenceError::Timeout(format!(
                "transcoding {} to {} took longer than {:?}",
                song.id, codec, self.timeout
            ))),
        };

        if let Err(e) = &result {
            warn!(song_id = %song.id, codec = %codec, error = %e, "Transcode failed");
            if let Err(rm) = tokio::fs::remove_file(&partial).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = ?partial, error = %rm, "Failed to remove partial transcode");
                }
            }
        }
        result
    }
}

/// Parse an HTTP `Range` header against a body of `len` bytes.
///
/// Supports a single `bytes=a-b`, `bytes=a-` or `bytes=-n` range and returns
/// the half-open byte range to serve.
pub fn parse_range_header(header: &str, len: u64) -> Result<Range<u64>> {
    let range = header
        .strip_prefix("bytes=")
        .ok_or_else(|| CadenceError::InvalidRequest("Invalid Range header format".to_string()))?;

    let (first, last) = range
        .split_once('-')
        .ok_or_else(|| CadenceError::InvalidRequest("Invalid Range header format".to_string()))?;
    let number = |s: &str, what: &str| -> Result<u64> {
        s.trim()
            .parse()
            .map_err(|_| CadenceError::InvalidRequest(format!("Invalid Range header: invalid {}", what)))
    };

    let (start, end) = if first.trim().is_empty() {
        // Suffix range: bytes=-500
        let suffix = number(last, "suffix length")?;
        (len.saturating_sub(suffix), len)
    } else {
        let start = number(first, "start")?;
        let end = if last.trim().is_empty() {
            len
        } else {
            // Inclusive in the header
            number(last, "end")?.saturating_add(1).min(len)
        };
        (start, end)
    };

    if start >= len {
        return Err(CadenceError::InvalidRequest(format!(
            "Range start {} exceeds stream size {}",
            start, len
        )));
    }
    if start >= end {
        return Err(CadenceError::InvalidRequest(format!(
            "Invalid range: start {} >= end {}",
            start, end
        )));
    }

    Ok(start..end)
}
