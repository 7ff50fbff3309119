//! Hook engine errors.

/// Errors from hook configuration and execution.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// A rule violates a structural invariant.
    #[error("invalid hook rule '{description}': {message}")]
    InvalidRule {
        /// The rule's description.
        description: String,
        /// What is wrong with it.
        message: String,
    },

    /// A rule file could not be read or parsed.
    #[error("failed to load hook rules from {path}: {message}")]
    Load {
        /// File path.
        path: String,
        /// Read/parse failure.
        message: String,
    },

    /// The compact model call failed.
    #[error("prompt action model call failed: {0}")]
    Model(String),
}
