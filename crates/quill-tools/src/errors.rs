//! Tool execution errors.

/// Errors raised by tool execution.
///
/// These become model-visible error tool results at the dispatch boundary —
/// the engine never crashes on them.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Arguments failed to decode against the tool's schema.
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// Decode failure description.
        message: String,
    },

    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Execution failed for a tool-specific reason.
    #[error("{0}")]
    Execution(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl ToolError {
    /// Decode failure for the given tool.
    pub fn invalid_arguments(tool: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_arguments_display() {
        let err = ToolError::invalid_arguments("filesystem-read", "missing field `path`");
        assert_eq!(
            err.to_string(),
            "invalid arguments for filesystem-read: missing field `path`"
        );
    }

    #[test]
    fn execution_display() {
        let err = ToolError::Execution("old_string not found".into());
        assert_eq!(err.to_string(), "old_string not found");
    }
}
