//! The hook execution engine.
//!
//! `execute(point, context)` resolves the rule set for the point, matches
//! each rule in file order, and runs matched rules' actions in order:
//!
//! - **command** actions spawn `sh -c` with the action timeout, capture
//!   stdout+stderr (capped, middle-truncated), and classify by exit code:
//!   0 = pass, 1 = warning (flow continues), ≥2 or abnormal termination =
//!   hard stop (flow halts, nothing is sent to the model).
//! - **prompt** actions call the compact model with a system prompt that
//!   mandates a JSON-only directive `{ask, message, continue}`; the reply
//!   is validated structurally and for internal consistency, and any
//!   validation failure is an action failure — never silently ignored.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quill_core::text::truncate_middle;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::RuleSource;
use crate::errors::HookError;
use crate::matcher::rule_matches;
use crate::types::{
    ActionOutcome, ActionResult, HookAction, HookPoint, HookRunSummary,
};

/// Captured-output cap per command action, in characters.
const MAX_CAPTURED_CHARS: usize = 10_000;

/// Marker inserted where capped output was removed.
const TRUNCATION_MARKER: &str = "[... hook output truncated ...]";

/// System prompt for prompt actions. The compact model must answer with
/// nothing but the directive object.
const PROMPT_ACTION_SYSTEM: &str = "You are a gatekeeper for an automated coding agent. \
Reply with a single JSON object and nothing else: \
{\"ask\": \"user\" | \"ai\", \"message\": string, \"continue\": boolean}. \
Use ask=\"ai\" with continue=true to send your message back to the agent and keep it working. \
Use ask=\"user\" with continue=false to stop and surface your message to the human.";

/// Access to the compact ("basic") model used by prompt actions.
#[async_trait]
pub trait PromptModel: Send + Sync {
    /// One-shot completion: system prompt + user prompt in, raw text out.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, HookError>;
}

/// The directive a prompt action's reply must parse into.
#[derive(Debug, Deserialize)]
struct PromptDirective {
    ask: String,
    message: String,
    #[serde(rename = "continue")]
    continue_: bool,
}

/// Hook execution engine.
pub struct HookEngine {
    source: Box<dyn RuleSource>,
    prompt_model: Option<Arc<dyn PromptModel>>,
}

impl HookEngine {
    /// Engine without a compact model — prompt actions fail as actions.
    #[must_use]
    pub fn new(source: Box<dyn RuleSource>) -> Self {
        Self {
            source,
            prompt_model: None,
        }
    }

    /// Attach the compact model used by prompt actions.
    #[must_use]
    pub fn with_prompt_model(mut self, model: Arc<dyn PromptModel>) -> Self {
        self.prompt_model = Some(model);
        self
    }

    /// Execute all rules configured for the point against the context.
    ///
    /// Hooks are opt-in: with no rules configured the result is a trivial
    /// success. A hard stop (or action failure) halts further actions and
    /// rules immediately.
    #[instrument(skip_all, fields(point = %point))]
    pub async fn execute(&self, point: HookPoint, context: &Map<String, Value>) -> HookRunSummary {
        let rules = self.source.rules_for(point);
        if rules.is_empty() {
            return HookRunSummary::trivial();
        }

        let mut summary = HookRunSummary {
            success: true,
            ..HookRunSummary::default()
        };

        for rule in &rules {
            if !rule_matches(rule.matcher.as_deref(), context) {
                debug!(rule = %rule.description, "hook rule did not match");
                summary.skipped_count += rule.actions.len();
                continue;
            }

            for action in &rule.actions {
                if !action.enabled() {
                    summary.skipped_count += 1;
                    continue;
                }

                let outcome = match action {
                    HookAction::Command {
                        command,
                        timeout_ms,
                        ..
                    } => run_command(command, *timeout_ms).await,
                    HookAction::Prompt {
                        prompt, timeout_ms, ..
                    } => self.run_prompt(prompt, *timeout_ms).await,
                };
                summary.executed_count += 1;

                let terminal = outcome.is_terminal();
                summary.results.push(ActionResult {
                    rule: rule.description.clone(),
                    outcome,
                });
                if terminal {
                    warn!(rule = %rule.description, "hook halted the flow");
                    summary.success = false;
                    return summary;
                }
            }
        }

        summary
    }

    async fn run_prompt(&self, prompt: &str, timeout_ms: u64) -> ActionOutcome {
        let Some(model) = &self.prompt_model else {
            return ActionOutcome::Failed {
                error: "no compact model configured for prompt actions".into(),
            };
        };

        let reply = match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            model.complete(PROMPT_ACTION_SYSTEM, prompt),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                return ActionOutcome::Failed {
                    error: e.to_string(),
                };
            }
            Err(_) => {
                return ActionOutcome::Failed {
                    error: format!("prompt action timed out after {timeout_ms}ms"),
                };
            }
        };

        match validate_directive(&reply) {
            Ok(directive) if directive.ask == "ai" => ActionOutcome::ContinueAi {
                message: directive.message,
            },
            Ok(directive) => ActionOutcome::AskUser {
                message: directive.message,
            },
            Err(error) => ActionOutcome::Failed { error },
        }
    }
}

/// Parse and validate a prompt action's reply.
///
/// Structural: all three fields present, `ask` one of the two values,
/// `continue` boolean. Consistency: `ask:"ai"` pairs with
/// `continue:true`, `ask:"user"` pairs with `continue:false`.
fn validate_directive(reply: &str) -> Result<PromptDirective, String> {
    let directive: PromptDirective = serde_json::from_str(reply.trim())
        .map_err(|e| format!("directive is not valid JSON: {e}"))?;
    match directive.ask.as_str() {
        "ai" => {
            if !directive.continue_ {
                return Err("ask=\"ai\" requires continue=true".into());
            }
        }
        "user" => {
            if directive.continue_ {
                return Err("ask=\"user\" requires continue=false".into());
            }
        }
        other => return Err(format!("ask must be \"user\" or \"ai\", got \"{other}\"")),
    }
    Ok(directive)
}

/// Run a command action and classify its exit.
async fn run_command(command: &str, timeout_ms: u64) -> ActionOutcome {
    debug!(command, timeout_ms, "running hook command");
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return ActionOutcome::Failed {
                error: format!("failed to spawn hook command: {e}"),
            };
        }
    };

    let output = match tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        child.wait_with_output(),
    )
    .await
    {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return ActionOutcome::Failed {
                error: format!("failed to collect hook output: {e}"),
            };
        }
        Err(_) => {
            return ActionOutcome::HardStop {
                exit_code: None,
                output: format!("hook command timed out after {timeout_ms}ms: {command}"),
            };
        }
    };

    let mut captured = String::new();
    captured.push_str(&String::from_utf8_lossy(&output.stdout));
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !captured.is_empty() {
            captured.push('\n');
        }
        captured.push_str(&stderr);
    }
    let captured = truncate_middle(&captured, MAX_CAPTURED_CHARS, TRUNCATION_MARKER);

    match output.status.code() {
        Some(0) => ActionOutcome::Passed { output: captured },
        Some(1) => ActionOutcome::Warning { output: captured },
        Some(code) => ActionOutcome::HardStop {
            exit_code: Some(code),
            output: captured,
        },
        // Killed by a signal.
        None => ActionOutcome::HardStop {
            exit_code: None,
            output: captured,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
