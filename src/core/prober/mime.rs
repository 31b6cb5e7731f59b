//! MIME type detection: file extension first, content sniffing second

use crate::core::error::Result;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Number of leading bytes inspected when the extension says nothing
pub const SNIFF_LEN: usize = 512;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// MIME type of `path`, from its extension or, failing that, its first bytes.
///
/// Always yields a usable value; unknown binary content is
/// `application/octet-stream`.
pub async fn detect_mime(path: &Path) -> Result<String> {
    if let Some(mime) = mime_from_extension(path) {
        return Ok(mime);
    }

    let mut file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;

    Ok(sniff(&head).to_string())
}

fn mime_from_extension(path: &Path) -> Option<String> {
    path.extension()?;
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// Content-based MIME detection over the first bytes of a file
pub fn sniff(head: &[u8]) -> &'static str {
    if head.starts_with(b"ID3") || is_mpeg_frame_sync(head) {
        return "audio/mpeg";
    }
    if head.starts_with(b"fLaC") {
        return "audio/flac";
    }
    if head.starts_with(b"OggS") {
        return "audio/ogg";
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WAVE" {
        return "audio/wav";
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return "audio/mp4";
    }
    if let Ok(format) = image::guess_format(head) {
        return format.to_mime_type();
    }
    if looks_like_text(head) {
        return TEXT_PLAIN;
    }
    OCTET_STREAM
}

fn is_mpeg_frame_sync(head: &[u8]) -> bool {
    head.len() >= 2 && head[0] == 0xFF && (head[1] & 0xE0) == 0xE0
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() {
        return true;
    }
    // A multi-byte character may be cut at the sniff boundary
    let valid = match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none(),
    };
    valid && !head.iter().any(|&b| b == 0 || (b < 0x20 && !b"\t\n\r\x0c".contains(&b)))
}
