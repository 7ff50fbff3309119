//! Core types for the hook system.

use serde::{Deserialize, Serialize};

use crate::errors::HookError;

/// Default command/prompt action timeout.
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 5_000;

fn default_timeout_ms() -> u64 {
    DEFAULT_ACTION_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Interception points
// ─────────────────────────────────────────────────────────────────────────────

/// Where in the agent loop a rule set fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookPoint {
    /// Before an approved tool call is dispatched.
    #[serde(rename = "beforeToolCall")]
    BeforeToolCall,
    /// After a tool result has been recorded.
    #[serde(rename = "afterToolCall")]
    AfterToolCall,
    /// When a sub-agent run reaches zero pending tool calls.
    #[serde(rename = "onSubAgentComplete")]
    OnSubagentComplete,
    /// When a run completes with a plain assistant message.
    #[serde(rename = "onStop")]
    OnStop,
}

impl HookPoint {
    /// All interception points.
    #[must_use]
    pub fn all() -> &'static [HookPoint] {
        &[
            Self::BeforeToolCall,
            Self::AfterToolCall,
            Self::OnSubagentComplete,
            Self::OnStop,
        ]
    }

    /// The config key for this point.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::BeforeToolCall => "beforeToolCall",
            Self::AfterToolCall => "afterToolCall",
            Self::OnSubagentComplete => "onSubAgentComplete",
            Self::OnStop => "onStop",
        }
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rules and actions
// ─────────────────────────────────────────────────────────────────────────────

/// One action within a rule.
///
/// Read-only at execution time; created and edited via configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HookAction {
    /// Spawn an OS process; classify by exit code.
    Command {
        /// Shell command text.
        command: String,
        /// Timeout in milliseconds.
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        /// Disabled actions are skipped (and counted as skipped).
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
    /// Ask the compact model for a JSON directive.
    Prompt {
        /// Prompt text sent as the user message.
        prompt: String,
        /// Timeout in milliseconds.
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        /// Disabled actions are skipped (and counted as skipped).
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
}

impl HookAction {
    /// Whether the action is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        match self {
            Self::Command { enabled, .. } | Self::Prompt { enabled, .. } => *enabled,
        }
    }
}

/// An ordered rule within a point's rule set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRule {
    /// Human-readable description (used in results and logs).
    pub description: String,
    /// Optional selector; an absent matcher always matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<String>,
    /// Actions, run in order.
    pub actions: Vec<HookAction>,
}

/// Validate a rule set's structural invariant: a `prompt` action can
/// short-circuit the whole flow, so it must be the sole action of its rule
/// — it cannot coexist with `command` actions or other prompts.
pub fn validate_rules(rules: &[HookRule]) -> Result<(), HookError> {
    for rule in rules {
        let has_prompt = rule
            .actions
            .iter()
            .any(|a| matches!(a, HookAction::Prompt { .. }));
        if has_prompt && rule.actions.len() > 1 {
            return Err(HookError::InvalidRule {
                description: rule.description.clone(),
                message: "a prompt action must be the only action in its rule".into(),
            });
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one executed action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Command exited 0 — no effect on flow.
    Passed {
        /// Captured output (retained for logs).
        output: String,
    },
    /// Command exited 1 — output surfaces to the user, flow continues.
    Warning {
        /// Captured output.
        output: String,
    },
    /// Command exited ≥2 or terminated abnormally — flow halts.
    HardStop {
        /// Exit code, absent for signal/timeout terminations.
        exit_code: Option<i32>,
        /// Captured output.
        output: String,
    },
    /// Prompt directive: hand the question to the user, do not continue.
    AskUser {
        /// The model's message.
        message: String,
    },
    /// Prompt directive: feed the message back to the model and continue.
    ContinueAi {
        /// The model's message.
        message: String,
    },
    /// The action itself failed (spawn error, malformed directive).
    Failed {
        /// Failure description.
        error: String,
    },
}

impl ActionOutcome {
    /// Whether this outcome halts the flow.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::HardStop { .. } | Self::Failed { .. })
    }
}

/// One action's result, attributed to its rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionResult {
    /// The owning rule's description.
    pub rule: String,
    /// What happened.
    pub outcome: ActionOutcome,
}

/// Aggregated result of one `execute` call.
#[derive(Clone, Debug, Default)]
pub struct HookRunSummary {
    /// False when any action hard-stopped or failed.
    pub success: bool,
    /// Per-action results in execution order.
    pub results: Vec<ActionResult>,
    /// Actions actually executed.
    pub executed_count: usize,
    /// Actions skipped (disabled, or in unmatched rules).
    pub skipped_count: usize,
}

impl HookRunSummary {
    /// A trivial success (no rules configured for the point).
    #[must_use]
    pub fn trivial() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// Warning outputs to surface to the user.
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                ActionOutcome::Warning { output } => Some(output.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The first terminal outcome, if any.
    #[must_use]
    pub fn terminal(&self) -> Option<&ActionResult> {
        self.results.iter().find(|r| r.outcome.is_terminal())
    }

    /// The first AI-continuation directive, if any.
    #[must_use]
    pub fn continue_ai(&self) -> Option<&str> {
        self.results.iter().find_map(|r| match &r.outcome {
            ActionOutcome::ContinueAi { message } => Some(message.as_str()),
            _ => None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
