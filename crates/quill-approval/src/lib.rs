//! # quill-approval
//!
//! The approval gate: decides, per tool call, whether execution needs
//! interactive confirmation.
//!
//! Inputs to each decision:
//! - the global always-approved set (persisted via an injectable
//!   [`ApprovalStore`])
//! - the run-scoped session-approved set (in-memory, discarded at run end)
//! - the YOLO flag (auto-approve everything)
//! - the sensitive-command pattern list, which is **not** overridable:
//!   a sensitive terminal command prompts even under YOLO or a standing
//!   approval
//!
//! `ApproveAlways` records the tool into both sets — the session set takes
//! effect immediately, the global set is persisted for future runs.

#![deny(unsafe_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Decisions
// ─────────────────────────────────────────────────────────────────────────────

/// The user's answer to an approval prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    /// Approve this single invocation.
    ApproveOnce,
    /// Approve and remember the tool for the session and future runs.
    ApproveAlways,
    /// Reject; the run aborts.
    Reject,
    /// Reject with a message that is surfaced as the abort reason.
    RejectWithReply(String),
}

impl ApprovalDecision {
    /// Whether this decision permits execution.
    #[must_use]
    pub fn is_approval(&self) -> bool {
        matches!(self, Self::ApproveOnce | Self::ApproveAlways)
    }
}

/// What the gate concluded for a pending tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateVerdict {
    /// Execute without prompting.
    AutoApproved,
    /// Interactive confirmation is required before execution.
    NeedsConfirmation,
}

/// Errors from the approval subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// Persisting the global set failed.
    #[error("failed to persist approvals: {0}")]
    Persist(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent store for the global always-approved tool set.
///
/// Injectable so runs are testable without touching disk; the gate reads
/// at decision time and writes on `ApproveAlways`.
pub trait ApprovalStore: Send + Sync {
    /// Current global always-approved tool names.
    fn always_approved(&self) -> HashSet<String>;
    /// Add a tool name and persist.
    fn insert(&self, tool_name: &str) -> Result<(), ApprovalError>;
}

/// In-memory store (tests, ephemeral runs).
#[derive(Default)]
pub struct MemoryApprovalStore {
    set: Mutex<HashSet<String>>,
}

impl MemoryApprovalStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-seeded with tool names.
    #[must_use]
    pub fn with_tools(tools: impl IntoIterator<Item = String>) -> Self {
        Self {
            set: Mutex::new(tools.into_iter().collect()),
        }
    }
}

impl ApprovalStore for MemoryApprovalStore {
    fn always_approved(&self) -> HashSet<String> {
        self.set.lock().clone()
    }

    fn insert(&self, tool_name: &str) -> Result<(), ApprovalError> {
        let _ = self.set.lock().insert(tool_name.to_owned());
        Ok(())
    }
}

/// JSON-file-backed store.
pub struct FileApprovalStore {
    path: PathBuf,
    set: Mutex<HashSet<String>>,
}

impl FileApprovalStore {
    /// Load (or start empty) from the given path.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let set = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<HashSet<String>>(&text).ok())
            .unwrap_or_default();
        Self {
            path,
            set: Mutex::new(set),
        }
    }
}

impl ApprovalStore for FileApprovalStore {
    fn always_approved(&self) -> HashSet<String> {
        self.set.lock().clone()
    }

    fn insert(&self, tool_name: &str) -> Result<(), ApprovalError> {
        let snapshot = {
            let mut set = self.set.lock();
            let _ = set.insert(tool_name.to_owned());
            set.clone()
        };
        let text = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ApprovalError::Persist(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApprovalError::Persist(e.to_string()))?;
        }
        std::fs::write(&self.path, text).map_err(|e| ApprovalError::Persist(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session approvals
// ─────────────────────────────────────────────────────────────────────────────

/// Run-scoped approved set.
///
/// Shared between a parent run and its sub-agent runs (the child starts
/// seeded by, and writes back into, the same set), then discarded at the
/// end of the parent run.
#[derive(Clone, Default)]
pub struct SessionApprovals {
    set: Arc<Mutex<HashSet<String>>>,
}

impl SessionApprovals {
    /// An empty session set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tool was approved earlier in this run.
    #[must_use]
    pub fn contains(&self, tool_name: &str) -> bool {
        self.set.lock().contains(tool_name)
    }

    /// Record a tool approval for the remainder of the run.
    pub fn insert(&self, tool_name: &str) {
        let _ = self.set.lock().insert(tool_name.to_owned());
    }

    /// Number of approved tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.set.lock().len()
    }

    /// Whether no approvals were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.lock().is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Gate
// ─────────────────────────────────────────────────────────────────────────────

/// The approval gate.
pub struct ApprovalGate {
    store: Arc<dyn ApprovalStore>,
    session: SessionApprovals,
    sensitive_patterns: Vec<String>,
    yolo: bool,
}

impl ApprovalGate {
    /// Build a gate.
    #[must_use]
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        session: SessionApprovals,
        sensitive_patterns: Vec<String>,
        yolo: bool,
    ) -> Self {
        Self {
            store,
            session,
            sensitive_patterns,
            yolo,
        }
    }

    /// The session set (shared with sub-agent runs).
    #[must_use]
    pub fn session(&self) -> SessionApprovals {
        self.session.clone()
    }

    /// A gate for a sub-agent run sharing this gate's store and session
    /// set, so child approvals propagate for the rest of the parent run.
    #[must_use]
    pub fn child_gate(&self) -> ApprovalGate {
        ApprovalGate {
            store: self.store.clone(),
            session: self.session.clone(),
            sensitive_patterns: self.sensitive_patterns.clone(),
            yolo: self.yolo,
        }
    }

    /// Decide whether a pending call needs interactive confirmation.
    ///
    /// The sensitive-command check runs first and cannot be overridden:
    /// a matching command prompts even under YOLO or a standing approval.
    #[must_use]
    pub fn verdict(&self, tool_name: &str, arguments: &str) -> GateVerdict {
        if self.is_sensitive(tool_name, arguments) {
            warn!(tool_name, "sensitive command requires confirmation");
            return GateVerdict::NeedsConfirmation;
        }
        if self.yolo {
            return GateVerdict::AutoApproved;
        }
        if self.session.contains(tool_name) {
            debug!(tool_name, "session-approved");
            return GateVerdict::AutoApproved;
        }
        if self.store.always_approved().contains(tool_name) {
            debug!(tool_name, "globally approved");
            return GateVerdict::AutoApproved;
        }
        GateVerdict::NeedsConfirmation
    }

    /// Record the user's decision. `ApproveAlways` lands in the session
    /// set immediately and in the persisted global set.
    pub fn record(&self, tool_name: &str, decision: &ApprovalDecision) {
        if let ApprovalDecision::ApproveAlways = decision {
            self.session.insert(tool_name);
            if let Err(e) = self.store.insert(tool_name) {
                // The session approval already took effect; persistence
                // failure only costs future runs.
                warn!(tool_name, error = %e, "failed to persist always-approval");
            }
        }
    }

    fn is_sensitive(&self, tool_name: &str, arguments: &str) -> bool {
        if !tool_name.starts_with("terminal") {
            return false;
        }
        self.sensitive_patterns
            .iter()
            .any(|pattern| arguments.contains(pattern.as_str()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
