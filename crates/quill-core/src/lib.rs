//! # quill-core
//!
//! Foundation types shared by every Quill crate:
//!
//! - **Messages**: the conversation model — `Message` enum with `System`,
//!   `User`, `Assistant`, and `Tool` variants, plus `ToolCall` and
//!   `TokenUsage`
//! - **Stream events**: the normalized event model every provider stream
//!   is mapped into
//! - **Tool schemas**: `ToolSpec` definitions sent to the model and the
//!   `ToolOutput` returned by tool execution
//! - **Retry math**: exponential backoff with jitter
//! - **Text helpers**: char-safe truncation

#![deny(unsafe_code)]

pub mod events;
pub mod messages;
pub mod retry;
pub mod text;
pub mod tools;
