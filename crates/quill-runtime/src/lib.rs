//! # quill-runtime
//!
//! The conversation engine: the top-level loop that submits turns to a
//! provider, folds the normalized event stream, gates tool calls through
//! the approval subsystem, dispatches them, fires hooks at the defined
//! interception points, and compresses context when the token budget is
//! exceeded.
//!
//! Sub-agent delegation is a recursive use of the same engine with a
//! narrowed tool registry, a fresh seed message, and the parent's
//! approval state — see [`subagent`].

#![deny(unsafe_code)]

pub mod engine;
pub mod errors;
pub mod subagent;
pub mod turn;

pub use engine::{
    ApprovalRequest, ConversationEngine, EngineConfig, EngineDeps, InteractionHandler,
    RunOutcome, RunStatus,
};
pub use errors::EngineError;
pub use subagent::{DelegateTool, DelegationResult, SubagentRegistry, SubagentSpec};
