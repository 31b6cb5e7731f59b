//! Audio transcoding through an external encoder process
//!
//! The encoder reads the source on stdin and writes the encoded stream to
//! stdout. Both pipes are serviced concurrently so a large input can never
//! deadlock against a full output pipe.

use crate::core::error::{CadenceError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Target codecs for on-demand transcoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp3,
    Vorbis,
    Opus,
}

impl Codec {
    /// File extension of cached output, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Vorbis => "ogg",
            Codec::Opus => "opus",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::Mp3 => "audio/mpeg",
            Codec::Vorbis => "audio/ogg",
            Codec::Opus => "audio/opus",
        }
    }

    fn encoder(&self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Vorbis => "libvorbis",
            Codec::Opus => "libopus",
        }
    }

    fn muxer(&self) -> &'static str {
        match self {
            Codec::Mp3 => "mp3",
            Codec::Vorbis => "ogg",
            Codec::Opus => "opus",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Codec::Mp3 => "mp3",
            Codec::Vorbis => "vorbis",
            Codec::Opus => "opus",
        };
        f.write_str(name)
    }
}

impl FromStr for Codec {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(Codec::Mp3),
            "vorbis" | "ogg" => Ok(Codec::Vorbis),
            "opus" => Ok(Codec::Opus),
            other => Err(CadenceError::InvalidRequest(format!("unsupported codec: {}", other))),
        }
    }
}

/// Builds the encoder process for a codec.
///
/// The returned command must read raw source bytes from stdin and write the
/// encoded stream to stdout; stdio and lifetime settings are applied by
/// [`transcode_file`].
pub trait Transcoder: Send + Sync {
    fn command(&self, codec: Codec) -> Command;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn command(&self, codec: Codec) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-i", "pipe:0", "-vn", "-codec:a"])
            .arg(codec.encoder())
            .arg("-f")
            .arg(codec.muxer())
            .arg("pipe:1");
        cmd
    }
}

/// Encode `source` into `dest`, returning the number of bytes written.
///
/// `dest` is created or truncated. On error it may hold partial output; the
/// caller owns cleanup. Dropping the returned future kills the encoder.
pub async fn transcode_file(
    transcoder: &dyn Transcoder,
    codec: Codec,
    source: &Path,
    dest: &Path,
) -> Result<u64> {
    let mut input = tokio::fs::File::open(source).await.map_err(|e| {
        CadenceError::StreamUnavailable(format!("{}: {}", source.display(), e))
    })?;
    let mut output = tokio::fs::File::create(dest).await?;

    let mut child = transcoder
        .command(codec)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CadenceError::TranscodeError(format!("failed to start encoder: {}", e)))?;

    let (mut stdin, mut stdout, mut stderr) =
        match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => return Err(CadenceError::TranscodeError("encoder pipes unavailable".to_string())),
        };

    let pump = async move {
        let copied = tokio::io::copy(&mut input, &mut stdin).await?;
        // Closing stdin signals end of input
        stdin.shutdown().await?;
        drop(stdin);
        Ok::<_, std::io::Error>(copied)
    };
    // Owns stdout so a failed write closes the pipe and the encoder exits
    // instead of blocking on a full pipe.
    let drain = async move {
        let written = tokio::io::copy(&mut stdout, &mut output).await?;
        output.flush().await?;
        output.sync_all().await?;
        Ok::<_, std::io::Error>(written)
    };
    let diagnostics = async {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        buf
    };

    let (pumped, drained, diagnostics) = tokio::join!(pump, drain, diagnostics);
    let status = child.wait().await?;

    let written = drained.map_err(|e| CadenceError::TranscodeError(format!("writing encoder output: {}", e)))?;
    if !status.success() {
        let stderr = String::from_utf8_lossy(&diagnostics);
        return Err(CadenceError::TranscodeError(format!(
            "encoder exited with {}: {}",
            status,
            stderr.trim()
        )));
    }
    let read = pumped.map_err(|e| CadenceError::TranscodeError(format!("writing encoder input: {}", e)))?;

    debug!(source = ?source, codec = %codec, read, written, "Transcode finished");
    Ok(written)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Runs a shell snippet as the encoder and counts invocations
    pub(crate) struct ShellTranscoder {
        script: String,
        calls: AtomicUsize,
    }

    impl ShellTranscoder {
        pub fn new(script: &str) -> Self {
            Self { script: script.to_string(), calls: AtomicUsize::new(0) }
        }

        /// Copies its input unchanged
        pub fn cat() -> Self {
            Self::new("cat")
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transcoder for ShellTranscoder {
        fn command(&self, _codec: Codec) -> Command {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.script);
            cmd
        }
    }

    #[test]
    fn test_codec_names() {
        assert_eq!("mp3".parse::<Codec>().unwrap(), Codec::Mp3);
        assert_eq!("OGG".parse::<Codec>().unwrap(), Codec::Vorbis);
        assert_eq!("vorbis".parse::<Codec>().unwrap(), Codec::Vorbis);
        assert_eq!("opus".parse::<Codec>().unwrap(), Codec::Opus);
        assert!(matches!("flac".parse::<Codec>(), Err(CadenceError::InvalidRequest(_))));

        assert_eq!(Codec::Vorbis.extension(), "ogg");
        assert_eq!(Codec::Vorbis.to_string(), "vorbis");
        assert_eq!(Codec::Opus.mime_type(), "audio/opus");
    }

    #[test]
    fn test_ffmpeg_command_line() {
        let cmd = FfmpegTranscoder::new(PathBuf::from("ffmpeg")).command(Codec::Vorbis);
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-v", "error", "-i", "pipe:0", "-vn", "-codec:a", "libvorbis", "-f", "ogg", "pipe:1"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_input_does_not_deadlock() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.wav");
        let dest = dir.path().join("big.mp3");
        // Well past any pipe buffer
        let data: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        std::fs::write(&source, &data).unwrap();

        let written = transcode_file(&ShellTranscoder::cat(), Codec::Mp3, &source, &dest)
            .await
            .unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.wav");
        std::fs::write(&source, [0u8; 128]).unwrap();

        let failing = ShellTranscoder::new("cat > /dev/null; echo bad input >&2; exit 3");
        let err = transcode_file(&failing, Codec::Opus, &source, &dir.path().join("a.opus"))
            .await
            .unwrap_err();

        match err {
            CadenceError::TranscodeError(msg) => assert!(msg.contains("bad input"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_output_write_failure_stops_encoder() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.wav");
        std::fs::write(&source, vec![7u8; 4 * 1024 * 1024]).unwrap();

        // Every write to /dev/full fails with ENOSPC
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            transcode_file(&ShellTranscoder::cat(), Codec::Mp3, &source, Path::new("/dev/full")),
        )
        .await
        .expect("transcode should fail promptly");

        match outcome {
            Err(CadenceError::TranscodeError(msg)) => assert!(msg.contains("writing encoder output"), "{}", msg),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let err = transcode_file(
            &ShellTranscoder::cat(),
            Codec::Mp3,
            &dir.path().join("gone.wav"),
            &dir.path().join("gone.mp3"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CadenceError::StreamUnavailable(_)));
    }
}
