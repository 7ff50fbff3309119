//! # quill-tools
//!
//! Tool implementations and the dispatch support around them:
//!
//! - [`traits`] — the [`traits::AgentTool`] trait and per-call context
//! - [`registry`] — name → tool index, plus allow-list filtering for
//!   scope-restricted (sub-agent) runs
//! - [`guard`] — the output token guard applied before any tool result
//!   enters the conversation
//! - [`fs`], [`search`], [`terminal`], [`ask_user`] — the concrete tools

#![deny(unsafe_code)]

pub mod ask_user;
pub mod errors;
pub mod fs;
pub mod guard;
pub mod registry;
pub mod search;
pub mod terminal;
pub mod traits;

pub use errors::ToolError;
pub use registry::ToolRegistry;
pub use traits::{AgentTool, ToolContext};
