//! # Provider Trait
//!
//! Core abstraction for LLM backends. Every adapter implements [`Provider`]
//! to expose a unified streaming interface: a neutral request in, a boxed
//! stream of normalized [`StreamEvent`]s out.
//!
//! The stream is lazy, single-pass, and finite. It is not restartable —
//! re-issuing the same logical request opens a new HTTP stream. Adapters
//! never retry; callers wrap the stream with [`crate::retry`] when they
//! want backoff.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use quill_core::events::StreamEvent;
use quill_core::messages::Message;
use quill_core::tools::ToolSpec;
use serde::{Deserialize, Serialize};

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Boxed stream of normalized events returned by [`Provider::stream`].
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ProviderError>> + Send>>;

/// Errors that can occur during provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP request failed (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider returned a non-2xx response.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// Authentication problem (missing or rejected credentials).
    #[error("Auth error: {message}")]
    Auth {
        /// Error description.
        message: String,
    },

    /// Stream was cancelled by the caller.
    #[error("Stream cancelled")]
    Cancelled,

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error description.
        message: String,
    },
}

impl ProviderError {
    /// Whether a caller-side retry is worthwhile.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Json(_) | Self::Auth { .. } | Self::Cancelled | Self::Other { .. } => false,
        }
    }

    /// Error category string for logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Http(_) => "network",
            Self::Json(_) => "parse",
            Self::Api { .. } => "api",
            Self::Auth { .. } => "auth",
            Self::Cancelled => "cancelled",
            Self::Other { .. } => "unknown",
        }
    }
}

/// A provider-neutral chat request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Model ID.
    pub model: String,
    /// Conversation history, oldest first.
    pub messages: Vec<Message>,
    /// Tool schemas offered to the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Core LLM provider trait.
///
/// Implementors must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier (e.g. `"openai-chat"`, `"anthropic"`).
    fn name(&self) -> &str;

    /// Model this provider instance targets.
    fn model(&self) -> &str;

    /// Open a streaming request.
    ///
    /// Returns `Err` when the request cannot be opened (transport failure
    /// or non-2xx status — the error carries status and body). Once open,
    /// the stream yields normalized events until `Done`, an in-band
    /// `Error` event, or an `Err` item for a mid-stream transport failure.
    async fn stream(&self, request: &ChatRequest) -> ProviderResult<EventStream>;
}

/// Read a non-2xx response into an [`ProviderError::Api`], truncating
/// oversized bodies.
pub(crate) async fn response_to_api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Api {
        status,
        body: quill_core::text::truncate_str(&body, 2000),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_429_is_retryable() {
        let err = ProviderError::Api {
            status: 429,
            body: "rate limited".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.category(), "api");
    }

    #[test]
    fn api_5xx_is_retryable() {
        let err = ProviderError::Api {
            status: 503,
            body: "unavailable".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn api_4xx_not_retryable() {
        let err = ProviderError::Api {
            status: 400,
            body: "bad request".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn auth_not_retryable() {
        let err = ProviderError::Auth {
            message: "missing key".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "auth");
    }

    #[test]
    fn cancelled_not_retryable() {
        assert!(!ProviderError::Cancelled.is_retryable());
        assert_eq!(ProviderError::Cancelled.category(), "cancelled");
    }

    #[test]
    fn error_display() {
        let err = ProviderError::Api {
            status: 500,
            body: "oops".into(),
        };
        assert_eq!(err.to_string(), "API error (500): oops");
    }

    #[test]
    fn chat_request_serde_roundtrip() {
        let req = ChatRequest {
            model: "m-1".into(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            temperature: Some(0.2),
            max_tokens: Some(1024),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: ChatRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model, "m-1");
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.max_tokens, Some(1024));
    }

    #[test]
    fn provider_trait_is_object_safe() {
        fn assert_object_safe(_: &dyn Provider) {}
        let _ = assert_object_safe;
    }
}
