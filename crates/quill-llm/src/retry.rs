//! # Stream Retry
//!
//! Wraps a provider stream factory with exponential backoff retry.
//!
//! **Key constraint**: a retry is only possible while zero events have been
//! yielded. Once the first event reaches the caller, the stream cannot be
//! restarted (the caller may already have acted on it), so later errors
//! pass straight through.
//!
//! The adapters never retry themselves — this wrapper is the caller's
//! backoff, wired in by the conversation engine.

use std::future::Future;
use std::pin::Pin;

use quill_core::retry::{RetryConfig, backoff_delay_ms};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::provider::{EventStream, ProviderError};

/// Factory invoked once per attempt to open a fresh stream.
pub type StreamFactory =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<EventStream, ProviderError>> + Send>> + Send>;

/// Wrap a stream factory with retry logic.
///
/// Opens the stream via `factory`; if opening fails with a retryable error
/// and no events were yielded yet, waits with exponential backoff and tries
/// again, up to `config.max_retries` attempts. Cancellation short-circuits
/// the wait.
pub fn with_stream_retry(
    factory: StreamFactory,
    config: RetryConfig,
    cancel: CancellationToken,
) -> EventStream {
    use futures::StreamExt;

    Box::pin(async_stream::stream! {
        let mut attempt = 0u32;
        let mut has_yielded = false;

        loop {
            match factory().await {
                Ok(inner) => {
                    let mut inner = std::pin::pin!(inner);
                    while let Some(item) = StreamExt::next(&mut inner).await {
                        has_yielded = true;
                        yield item;
                    }
                    break;
                }
                Err(err) => {
                    if has_yielded || !err.is_retryable() || attempt >= config.max_retries {
                        yield Err(err);
                        break;
                    }
                    if cancel.is_cancelled() {
                        yield Err(ProviderError::Cancelled);
                        break;
                    }

                    attempt += 1;
                    let delay_ms = backoff_delay_ms(attempt, &config);
                    warn!(
                        attempt,
                        max_retries = config.max_retries,
                        delay_ms,
                        category = err.category(),
                        error = %err,
                        "retrying provider stream"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => {
                            yield Err(ProviderError::Cancelled);
                            break;
                        }
                        () = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
                    }
                }
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
