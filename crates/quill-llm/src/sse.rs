//! Server-Sent Events line framing.
//!
//! All four backends stream over HTTP SSE. This module owns the framing
//! concerns so each adapter only deals with its own JSON payloads:
//!
//! - `data: ` prefix extraction (with and without the space)
//! - `[DONE]` sentinel and comment/blank filtering
//! - partial-line buffering across network reads
//! - optional trailing-buffer flush after the stream ends (Gemini sends
//!   no sentinel, so its last payload may arrive without a newline)

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::warn;

/// Incremental SSE payload decoder.
///
/// Feed raw network chunks in; complete `data:` payloads come out.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Append a network chunk and drain every complete payload it finishes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let Ok(text) = std::str::from_utf8(&line) else {
                continue;
            };
            if let Some(data) = payload_of(text) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Drain any trailing payload left in the buffer after the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = std::str::from_utf8(&self.buffer).ok()?.trim().to_owned();
        self.buffer.clear();
        payload_of(&text)
    }
}

/// Extract the data payload from one SSE line.
///
/// Returns `None` for blanks, comments, non-data fields, empty data, and
/// the `[DONE]` sentinel.
fn payload_of(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_owned())
}

/// Adapt an HTTP byte stream into a stream of SSE data payloads.
///
/// `flush_trailing` controls whether content left in the buffer when the
/// connection closes is emitted as a final payload.
pub fn data_payloads<S>(byte_stream: S, flush_trailing: bool) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut byte_stream = byte_stream;
        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for payload in decoder.feed(&bytes) {
                        yield payload;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SSE stream read error");
                    return;
                }
            }
        }
        if flush_trailing {
            if let Some(payload) = decoder.finish() {
                yield payload;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
