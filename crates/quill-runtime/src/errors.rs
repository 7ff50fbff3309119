//! Runtime errors.

use quill_llm::provider::ProviderError;

/// Errors surfaced while driving a turn.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The provider stream failed (transport or open failure).
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The stream carried an in-band error event, or ended without `Done`.
    #[error("stream error: {0}")]
    Stream(String),
}

impl EngineError {
    /// Short category string for logs.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.category(),
            Self::Stream(_) => "stream",
        }
    }
}
