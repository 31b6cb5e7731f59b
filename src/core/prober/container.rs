//! Container-native tag prober backed by symphonia
//!
//! Covers Vorbis comments (FLAC, Ogg), MP4 atoms, RIFF INFO chunks and ID3v2
//! headers, plus stream duration for every format symphonia can demux.

use super::{parse_track, parse_year, AudioProber};
use crate::core::audio_meta::AudioMeta;
use crate::core::error::{CadenceError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, StandardVisualKey};
use symphonia::core::probe::{Hint, ProbeResult};

#[derive(Debug, Default)]
pub struct ContainerProber;

impl ContainerProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioProber for ContainerProber {
    fn name(&self) -> &str {
        "container"
    }

    async fn probe_audio(&self, path: &Path) -> Result<AudioMeta> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_container(&path))
            .await
            .map_err(|e| CadenceError::TaskError(format!("container probe task panicked: {}", e)))?
    }
}

fn open(path: &Path) -> Result<ProbeResult> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| CadenceError::ProbeError(format!("container: {}", e)))
}

fn track_duration(format: &dyn FormatReader) -> Option<f64> {
    let params = &format.default_track()?.codec_params;
    let n_frames = params.n_frames?;

    if let Some(time_base) = params.time_base {
        let time = time_base.calc_time(n_frames);
        return Some(time.seconds as f64 + time.frac);
    }
    let sample_rate = params.sample_rate?;
    Some(n_frames as f64 / sample_rate as f64)
}

/// Stream duration in seconds, as declared by the container headers
pub fn read_duration(path: &Path) -> Result<f64> {
    let probed = open(path)?;
    track_duration(probed.format.as_ref())
        .filter(|d| *d > 0.0)
        .ok_or_else(|| CadenceError::ProbeError("container: unknown duration".to_string()))
}

fn read_container(path: &Path) -> Result<AudioMeta> {
    let mut probed = open(path)?;
    let mut meta = AudioMeta::default();

    // Tags found ahead of the container (ID3v2 on MP3) come first
    if let Some(metadata) = probed.metadata.get() {
        if let Some(revision) = metadata.current() {
            apply_revision(&mut meta, revision);
        }
    }
    if let Some(revision) = probed.format.metadata().current() {
        apply_revision(&mut meta, revision);
    }

    if let Some(duration) = track_duration(probed.format.as_ref()) {
        meta.duration = duration;
    }

    Ok(meta)
}

fn apply_revision(meta: &mut AudioMeta, revision: &MetadataRevision) {
    let mut found = AudioMeta::default();

    for tag in revision.tags() {
        let value = tag.value.to_string();
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => found.title = value,
            Some(StandardTagKey::Artist) => found.artist = value,
            Some(StandardTagKey::Album) => found.album = value,
            Some(StandardTagKey::AlbumArtist) => found.album_artist = value,
            Some(StandardTagKey::Genre) => found.genre = value,
            Some(StandardTagKey::Date)
            | Some(StandardTagKey::ReleaseDate)
            | Some(StandardTagKey::OriginalDate) => {
                if found.year <= 0 {
                    found.year = parse_year(&value);
                }
            }
            Some(StandardTagKey::TrackNumber) => {
                let (track, total) = parse_track(&value);
                found.track = track;
                if total > 0 {
                    found.total_tracks = total;
                }
            }
            Some(StandardTagKey::TrackTotal) => {
                found.total_tracks = value.trim().parse().unwrap_or(found.total_tracks);
            }
            _ => {}
        }
    }

    let visuals = revision.visuals();
    let cover = visuals
        .iter()
        .find(|v| v.usage == Some(StandardVisualKey::FrontCover))
        .or_else(|| visuals.first());
    if let Some(visual) = cover {
        found.cover = Some(Bytes::copy_from_slice(&visual.data));
    }

    meta.merge(&found);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Minimal 16-bit mono PCM WAV of silence
    fn silent_wav(seconds: u32) -> Vec<u8> {
        wav_with_info(seconds, &[])
    }

    /// Same, with a RIFF `LIST/INFO` chunk ahead of the samples
    fn wav_with_info(seconds: u32, info: &[(&[u8; 4], &str)]) -> Vec<u8> {
        let sample_rate: u32 = 8000;
        let data_len = sample_rate * 2 * seconds;

        let mut body = b"WAVE".to_vec();
        body.extend_from_slice(b"fmt ");
        body.extend_from_slice(&16u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes()); // PCM
        body.extend_from_slice(&1u16.to_le_bytes()); // mono
        body.extend_from_slice(&sample_rate.to_le_bytes());
        body.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&16u16.to_le_bytes());

        if !info.is_empty() {
            let mut list = b"INFO".to_vec();
            for (id, value) in info {
                list.extend_from_slice(*id);
                list.extend_from_slice(&(value.len() as u32).to_le_bytes());
                list.extend_from_slice(value.as_bytes());
                if value.len() % 2 == 1 {
                    list.push(0);
                }
            }
            body.extend_from_slice(b"LIST");
            body.extend_from_slice(&(list.len() as u32).to_le_bytes());
            body.extend_from_slice(&list);
        }

        body.extend_from_slice(b"data");
        body.extend_from_slice(&data_len.to_le_bytes());
        body.extend(std::iter::repeat(0u8).take(data_len as usize));

        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(&(body.len() as u32).to_le_bytes());
        wav.extend_from_slice(&body);
        wav
    }

    #[tokio::test]
    async fn test_reads_wav_duration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, silent_wav(2)).unwrap();

        let meta = ContainerProber::new().probe_audio(&path).await.unwrap();
        assert!((meta.duration - 2.0).abs() < 0.01, "duration was {}", meta.duration);
        assert!(meta.title.is_empty());
        assert!((read_duration(&path).unwrap() - 2.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_garbage_is_a_probe_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.flac");
        std::fs::write(&path, b"definitely not flac").unwrap();

        let err = ContainerProber::new().probe_audio(&path).await.unwrap_err();
        assert!(matches!(err, CadenceError::ProbeError(_)));
    }

    #[tokio::test]
    async fn test_reads_riff_info_tags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.wav");
        let info: [(&[u8; 4], &str); 6] = [
            (b"INAM", "Song A"),
            (b"IART", "Artist A"),
            (b"IPRD", "Album A"),
            (b"IGNR", "Rock"),
            (b"ICRD", "2020-03-01"),
            (b"IPRT", "3/12"),
        ];
        std::fs::write(&path, wav_with_info(1, &info)).unwrap();

        let meta = ContainerProber::new().probe_audio(&path).await.unwrap();
        assert_eq!(meta.title, "Song A");
        assert_eq!(meta.artist, "Artist A");
        assert_eq!(meta.album, "Album A");
        assert_eq!(meta.genre, "Rock");
        assert_eq!(meta.year, 2020);
        assert_eq!((meta.track, meta.total_tracks), (3, 12));
        assert!((meta.duration - 1.0).abs() < 0.01, "duration was {}", meta.duration);
        assert!(meta.cover.is_none());
    }

    #[tokio::test]
    async fn test_leading_id3_tag_wins_and_picks_front_cover() {
        use crate::core::prober::id3::tests::jpeg_bytes;
        use id3::frame::{Picture, PictureType};
        use id3::{Tag, TagLike, Version};

        let back = jpeg_bytes(32);
        let front = jpeg_bytes(48);

        let mut tag = Tag::new();
        tag.set_title("Song A");
        tag.set_artist("Artist A");
        tag.set_year(2019);
        tag.set_track(3);
        tag.set_total_tracks(12);
        for (picture_type, data) in [(PictureType::CoverBack, &back), (PictureType::CoverFront, &front)] {
            tag.add_frame(Picture {
                mime_type: "image/jpeg".to_string(),
                picture_type,
                description: String::new(),
                data: data.clone(),
            });
        }

        let mut file = Vec::new();
        tag.write_to(&mut file, Version::Id3v23).unwrap();
        let info: [(&[u8; 4], &str); 2] = [(b"INAM", "Other Title"), (b"IGNR", "Jazz")];
        file.extend_from_slice(&wav_with_info(1, &info));

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefixed.wav");
        std::fs::write(&path, file).unwrap();

        let meta = ContainerProber::new().probe_audio(&path).await.unwrap();
        assert_eq!(meta.title, "Song A");
        assert_eq!(meta.artist, "Artist A");
        assert_eq!(meta.year, 2019);
        assert_eq!((meta.track, meta.total_tracks), (3, 12));
        // Gaps are filled from the container's own tags
        assert_eq!(meta.genre, "Jazz");
        assert_eq!(meta.cover.as_deref(), Some(front.as_slice()));
    }
}
