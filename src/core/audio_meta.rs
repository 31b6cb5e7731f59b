//! Mergeable metadata accumulator produced by the probers

use bytes::Bytes;

/// Best-effort metadata for one audio file.
///
/// Empty strings, zero numbers and a missing cover all mean "unknown";
/// [`AudioMeta::merge`] only ever fills unknown fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMeta {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub genre: String,
    pub track: u32,
    pub total_tracks: u32,
    pub year: i32,
    /// Seconds
    pub duration: f64,
    pub cover: Option<Bytes>,
}

fn fill_str(dst: &mut String, src: &str) {
    if dst.is_empty() && !src.is_empty() {
        *dst = src.to_string();
    }
}

impl AudioMeta {
    /// Fill every unknown field of `self` from `other`.
    /// Known fields of `self` are never overwritten.
    pub fn merge(&mut self, other: &AudioMeta) {
        fill_str(&mut self.title, &other.title);
        fill_str(&mut self.artist, &other.artist);
        fill_str(&mut self.album, &other.album);
        fill_str(&mut self.album_artist, &other.album_artist);
        fill_str(&mut self.genre, &other.genre);

        if self.track == 0 {
            self.track = other.track;
        }
        if self.total_tracks == 0 {
            self.total_tracks = other.total_tracks;
        }
        if self.year <= 0 {
            self.year = other.year;
        }
        if self.duration <= 0.0 {
            self.duration = other.duration;
        }
        if self.cover.is_none() {
            self.cover = other.cover.clone();
        }
    }

    /// True once every field the resolver cares about is known.
    ///
    /// Only used to stop trying further probers early. Track numbers and the
    /// album artist are optional in practice and are not required here.
    pub fn is_complete(&self) -> bool {
        !self.title.is_empty()
            && !self.artist.is_empty()
            && !self.album.is_empty()
            && !self.genre.is_empty()
            && self.year > 0
            && self.duration > 0.0
            && self.cover.is_some()
    }

    /// Drop surrounding whitespace and the NUL padding some taggers leave behind
    pub fn normalize(&mut self) {
        for field in [
            &mut self.title,
            &mut self.artist,
            &mut self.album,
            &mut self.album_artist,
            &mut self.genre,
        ] {
            let cleaned = field.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            if cleaned.len() != field.len() {
                *field = cleaned.to_string();
            }
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            self.duration = 0.0;
        }
        if self.cover.as_ref().is_some_and(|c| c.is_empty()) {
            self.cover = None;
        }
    }
}
