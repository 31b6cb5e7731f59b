//! Embedded ID3 tag prober

use super::{container, AudioProber};
use crate::core::audio_meta::AudioMeta;
use crate::core::error::{CadenceError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use id3::frame::PictureType;
use id3::{Tag, TagLike};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reads ID3v1/ID3v2 frames directly from the file.
///
/// Duration comes from the TLEN frame when present, otherwise from decoding
/// the stream headers.
#[derive(Debug, Default)]
pub struct Id3Prober;

impl Id3Prober {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioProber for Id3Prober {
    fn name(&self) -> &str {
        "id3"
    }

    async fn probe_audio(&self, path: &Path) -> Result<AudioMeta> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_id3(&path))
            .await
            .map_err(|e| CadenceError::TaskError(format!("id3 task panicked: {}", e)))?
    }
}

fn read_id3(path: &Path) -> Result<AudioMeta> {
    let tag = Tag::read_from_path(path)
        .map_err(|e| CadenceError::ProbeError(format!("id3: {}", e)))?;

    // Some taggers pad text frames with NULs
    let text = |value: Option<&str>| value.unwrap_or_default().trim_matches('\0').to_string();

    let mut meta = AudioMeta {
        title: text(tag.title()),
        artist: text(tag.artist()),
        album: text(tag.album()),
        album_artist: text(tag.album_artist()),
        genre: text(tag.genre_parsed().as_deref()),
        track: tag.track().unwrap_or(0),
        total_tracks: tag.total_tracks().unwrap_or(0),
        year: tag
            .year()
            .or_else(|| tag.date_recorded().map(|d| d.year))
            .or_else(|| tag.date_released().map(|d| d.year))
            .unwrap_or(0),
        duration: tag.duration().map(|ms| ms as f64 / 1000.0).unwrap_or(0.0),
        cover: None,
    };

    let cover = tag
        .pictures()
        .find(|p| p.picture_type == PictureType::CoverFront)
        .or_else(|| tag.pictures().next());
    if let Some(picture) = cover {
        meta.cover = Some(Bytes::from(picture.data.clone()));
    }

    if meta.duration <= 0.0 {
        match container::read_duration(path) {
            Ok(seconds) => meta.duration = seconds,
            Err(e) => debug!(path = ?path, error = %e, "No stream duration available"),
        }
    }

    Ok(meta)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use id3::frame::Picture;
    use id3::Version;
    use tempfile::TempDir;

    /// Tags written onto a placeholder audio file
    pub(crate) struct Fixture<'a> {
        pub title: &'a str,
        pub artist: &'a str,
        pub album: &'a str,
        pub genre: &'a str,
        pub year: i32,
        pub duration_ms: u32,
        pub cover: Option<Vec<u8>>,
    }

    impl Default for Fixture<'_> {
        fn default() -> Self {
            Self {
                title: "Song A",
                artist: "Artist A",
                album: "Album A",
                genre: "Rock",
                year: 2020,
                duration_ms: 180_000,
                cover: Some(jpeg_bytes(64)),
            }
        }
    }

    /// A buffer that sniffs as JPEG
    pub(crate) fn jpeg_bytes(len: usize) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
        data.extend((0..len.saturating_sub(4)).map(|i| (i % 200) as u8));
        data
    }

    /// Write an ID3v2.3 tagged file; `payload` stands in for the audio frames
    /// and makes otherwise identical fixtures hash differently.
    pub(crate) fn write_tagged_file(path: &Path, fixture: &Fixture, payload: &[u8]) {
        std::fs::write(path, payload).unwrap();

        let mut tag = Tag::new();
        tag.set_title(fixture.title);
        tag.set_artist(fixture.artist);
        tag.set_album(fixture.album);
        tag.set_genre(fixture.genre);
        tag.set_year(fixture.year);
        tag.set_duration(fixture.duration_ms);
        tag.set_track(3);
        tag.set_total_tracks(12);
        if let Some(cover) = &fixture.cover {
            tag.add_frame(Picture {
                mime_type: "image/jpeg".to_string(),
                picture_type: PictureType::CoverFront,
                description: String::new(),
                data: cover.clone(),
            });
        }
        tag.write_to_path(path, Version::Id3v23).unwrap();
    }

    #[tokio::test]
    async fn test_reads_tag_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp3");
        let fixture = Fixture::default();
        write_tagged_file(&path, &fixture, &[0u8; 256]);

        let meta = Id3Prober::new().probe_audio(&path).await.unwrap();

        assert_eq!(meta.title, "Song A");
        assert_eq!(meta.artist, "Artist A");
        assert_eq!(meta.album, "Album A");
        assert_eq!(meta.genre, "Rock");
        assert_eq!(meta.year, 2020);
        assert_eq!(meta.track, 3);
        assert_eq!(meta.total_tracks, 12);
        assert_eq!(meta.duration, 180.0);
        assert_eq!(meta.cover.as_deref(), fixture.cover.as_deref());
        assert!(meta.is_complete());
    }

    #[tokio::test]
    async fn test_untagged_file_is_a_probe_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.mp3");
        std::fs::write(&path, [0u8; 128]).unwrap();

        let err = Id3Prober::new().probe_audio(&path).await.unwrap_err();
        assert!(matches!(err, CadenceError::ProbeError(_)));
    }
}
