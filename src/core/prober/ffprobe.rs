//! External-tool prober: ffprobe for tags and duration, ffmpeg for artwork

use super::{parse_track, parse_year, AudioProber};
use crate::core::audio_meta::AudioMeta;
use crate::core::error::{CadenceError, ErrorContext, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Runs `ffprobe` per file and asks `ffmpeg` for the embedded picture
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(ffprobe: PathBuf, ffmpeg: PathBuf, timeout: Duration) -> Self {
        Self { ffprobe, ffmpeg, timeout }
    }

    /// Whether the ffprobe binary can be started
    pub async fn is_available(&self) -> bool {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.arg("-version");
        matches!(run(cmd, self.timeout).await, Ok(output) if output.status.success())
    }

    async fn read_tags(&self, path: &Path) -> Result<AudioMeta> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "quiet", "-print_format", "json", "-show_entries", "format=duration:format_tags"])
            .arg(path);

        let output = run(cmd, self.timeout).await?;
        if !output.status.success() {
            return Err(CadenceError::ProbeError(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe_output(&output.stdout)
    }

    async fn read_cover(&self, path: &Path) -> Result<Option<Bytes>> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "quiet", "-i"])
            .arg(path)
            .args(["-an", "-c:v", "copy", "-frames:v", "1", "-f", "image2pipe", "pipe:1"]);

        let output = run(cmd, self.timeout).await?;
        if !output.status.success() || output.stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bytes::from(output.stdout)))
    }
}

#[async_trait]
impl AudioProber for FfprobeProber {
    fn name(&self) -> &str {
        "ffprobe"
    }

    async fn probe_audio(&self, path: &Path) -> Result<AudioMeta> {
        let mut meta = self.read_tags(path).await?;

        match self.read_cover(path).await {
            Ok(cover) => meta.cover = cover,
            Err(e) => debug!(path = ?path, error = %e, "ffmpeg cover extraction failed"),
        }

        Ok(meta)
    }
}

/// Run a command to completion, killing it once `timeout` elapses
pub(crate) async fn run(mut cmd: Command, timeout: Duration) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = format!("{:?}", cmd.as_std().get_program());
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(CadenceError::ProbeError(format!("failed to run {}: {}", program, e))),
        Err(_) => Err(CadenceError::Timeout(format!("{} did not finish within {:?}", program, timeout))),
    }
}

fn parse_probe_output(stdout: &[u8]) -> Result<AudioMeta> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout)
        .with_context(|e| CadenceError::ProbeError(format!("invalid ffprobe output: {}", e)))?;

    // Tag key case differs between containers (TITLE, title, Title)
    let tags: HashMap<String, String> = parsed
        .format
        .tags
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect();
    let tag = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|k| tags.get(*k))
            .cloned()
            .unwrap_or_default()
    };

    let (track, mut total_tracks) = parse_track(&tag(&["track", "tracknumber"]));
    if total_tracks == 0 {
        total_tracks = tag(&["tracktotal", "totaltracks"]).trim().parse().unwrap_or(0);
    }

    Ok(AudioMeta {
        title: tag(&["title"]),
        artist: tag(&["artist"]),
        album: tag(&["album"]),
        album_artist: tag(&["album_artist", "albumartist"]),
        genre: tag(&["genre"]),
        track,
        total_tracks,
        year: parse_year(&tag(&["date", "year", "originaldate"])),
        duration: parsed
            .format
            .duration
            .and_then(|d| d.trim().parse().ok())
            .unwrap_or(0.0),
        cover: None,
    })
}
