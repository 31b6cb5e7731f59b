use super::AppState;
use crate::core::audio_streamer::parse_range_header;
use crate::core::error::Result;
use crate::core::transcoder::Codec;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Target codec (`mp3`, `vorbis`/`ogg`, `opus`); absent means as stored
    pub codec: Option<String>,
}

/// Handler for GET /api/songs/:id/stream - Stream song audio
pub async fn stream_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    Query(params): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let codec = params
        .codec
        .as_deref()
        .filter(|c| !c.is_empty())
        .map(str::parse::<Codec>)
        .transpose()?;

    let mut stream = state.audio_streamer.open_stream(&song_id, codec).await?;
    let total = stream.len();
    let content_type = stream.content_type().to_string();

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let Some(range_str) = range_header else {
        tracing::debug!(song_id = %song_id, codec = ?codec, "Streaming whole song");
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CONTENT_LENGTH, total.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            Body::from_stream(ReaderStream::new(stream)),
        )
            .into_response());
    };

    let range = match parse_range_header(range_str, total) {
        Ok(range) => range,
        Err(e) => {
            tracing::debug!(song_id = %song_id, range = %range_str, error = %e, "Unsatisfiable range");
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [
                    (header::CONTENT_RANGE, format!("bytes */{}", total)),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
            )
                .into_response());
        }
    };

    stream.seek(SeekFrom::Start(range.start)).await?;
    let content_length = range.end - range.start;

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, content_length.to_string()),
            (header::CONTENT_RANGE, format!("bytes {}-{}/{}", range.start, range.end - 1, total)),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        Body::from_stream(ReaderStream::new(stream.take(content_length))),
    )
        .into_response())
}
