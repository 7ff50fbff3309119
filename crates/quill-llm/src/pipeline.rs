//! Shared SSE → event-stream plumbing.
//!
//! All four adapters follow the same shape: frame the response body into
//! SSE payloads, deserialize each payload into the provider's chunk type,
//! run it through a stateful handler, and emit a finalizer's events when
//! the wire stream ends. This helper owns that plumbing so each adapter
//! only supplies its chunk type, handler, and finalizer.

use futures::StreamExt;
use quill_core::events::StreamEvent;
use tracing::warn;

use crate::provider::EventStream;
use crate::sse::data_payloads;

/// Build a normalized [`EventStream`] from an SSE response.
///
/// * `flush_trailing` — emit a payload left in the frame buffer at EOF
///   (needed by backends without a terminating sentinel).
/// * `handler` — maps one deserialized chunk to zero or more events.
/// * `finalize` — runs once after the wire stream ends; emits the closing
///   events (accumulated tool calls, usage, `Done`).
///
/// Payloads that fail to deserialize are logged and skipped, matching the
/// tolerant parsing the backends themselves expect of clients.
pub(crate) fn events_from_sse<C, S, H, F>(
    response: reqwest::Response,
    flush_trailing: bool,
    provider: &'static str,
    initial_state: S,
    mut handler: H,
    finalize: F,
) -> EventStream
where
    C: serde::de::DeserializeOwned + Send + 'static,
    S: Send + 'static,
    H: FnMut(C, &mut S) -> Vec<StreamEvent> + Send + 'static,
    F: FnOnce(S) -> Vec<StreamEvent> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let payloads = data_payloads(response.bytes_stream(), flush_trailing);
        let mut payloads = std::pin::pin!(payloads);
        let mut state = initial_state;
        while let Some(payload) = payloads.next().await {
            match serde_json::from_str::<C>(&payload) {
                Ok(chunk) => {
                    for event in handler(chunk, &mut state) {
                        let terminal = event.is_error();
                        yield Ok(event);
                        if terminal {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        provider,
                        error = %e,
                        payload = quill_core::text::truncate_str(&payload, 120),
                        "skipping unparseable SSE payload"
                    );
                }
            }
        }
        for event in finalize(state) {
            yield Ok(event);
        }
    })
}
