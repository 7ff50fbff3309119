//! The conversation engine.
//!
//! One engine instance drives one run sequentially: at most one in-flight
//! stream and one in-flight tool batch. The loop is a pure function of
//! its injected dependencies, so a sub-agent run is the same code with a
//! narrowed registry and a fresh seed — never a different code path.
//!
//! Turn flow: request → fold stream → zero tool calls means the run
//! completes; otherwise the assistant message (content may be empty) is
//! appended with its calls and each pending call flows through
//! ask-user diversion → approval gate → before-hooks → dispatch →
//! output guard → result append → after-hooks, strictly in emitted
//! order. A rejection aborts the run before any later call in the batch
//! is dispatched. The token-budget check runs once per completed turn,
//! after the assistant message is finalized and before the next request.

use std::sync::Arc;

use async_trait::async_trait;
use quill_approval::{ApprovalDecision, ApprovalGate, GateVerdict};
use quill_context::{Compression, ContextCompressor, rebuild};
use quill_core::messages::{Message, TokenUsage, ToolCall};
use quill_core::retry::RetryConfig;
use quill_core::tools::{ToolOutput, error_output};
use quill_hooks::{HookEngine, HookPoint, HookRunSummary};
use quill_llm::provider::{ChatRequest, Provider};
use quill_llm::retry::with_stream_retry;
use quill_tools::ask_user::{ASK_USER_PREFIX, AskUserArgs};
use quill_tools::{ToolContext, ToolRegistry};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::EngineError;
use crate::turn::collect_turn;

// ─────────────────────────────────────────────────────────────────────────────
// Interaction surface
// ─────────────────────────────────────────────────────────────────────────────

/// A pending tool call awaiting the user's confirmation.
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    /// Tool name.
    pub tool_name: String,
    /// Raw argument JSON.
    pub arguments: String,
    /// Tool call ID.
    pub tool_call_id: String,
}

/// The run's interaction surface: approval prompts and ask-user
/// questions. A sub-agent run receives its parent's handler, so
/// questions render on the parent's surface.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    /// Ask the user to confirm a tool call.
    async fn approve(&self, request: &ApprovalRequest) -> ApprovalDecision;

    /// Put a question to the user and return their structured answer.
    async fn ask_user(&self, args: &AskUserArgs) -> String;
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration and outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Model ID for requests.
    pub model: String,
    /// Turn-count backstop.
    pub max_turns: u32,
    /// Input-token ceiling that triggers compression.
    pub max_context_tokens: u64,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Max tokens per response.
    pub max_tokens: Option<u32>,
    /// Stream retry policy.
    pub retry: RetryConfig,
    /// Working directory handed to tools.
    pub working_directory: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            max_turns: 50,
            max_context_tokens: 160_000,
            temperature: None,
            max_tokens: None,
            retry: RetryConfig::default(),
            working_directory: ".".into(),
        }
    }
}

/// Injected dependencies. Cloning shares the underlying services, which
/// is exactly what sub-agent delegation needs.
#[derive(Clone)]
pub struct EngineDeps {
    /// LLM backend.
    pub provider: Arc<dyn Provider>,
    /// Tools offered to the model.
    pub tools: ToolRegistry,
    /// Approval gate.
    pub gate: Arc<ApprovalGate>,
    /// Hook engine.
    pub hooks: Arc<HookEngine>,
    /// Context compressor (absent disables budget-triggered compression).
    pub compressor: Option<Arc<ContextCompressor>>,
    /// Tool output token guard.
    pub guard: Arc<quill_tools::guard::OutputTokenGuard>,
    /// Interaction surface; absent means headless (confirmations reject).
    pub interaction: Option<Arc<dyn InteractionHandler>>,
    /// Tuning knobs.
    pub config: EngineConfig,
}

/// Terminal state of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// The model finished with a plain assistant message.
    Completed,
    /// The user rejected a tool call, or cancellation tripped.
    Aborted,
    /// A transport, hook, or compression failure ended the run.
    Failed,
}

/// Result of one full engine run.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// Terminal state.
    pub status: RunStatus,
    /// The full message list at termination. For `Aborted`/`Failed` runs
    /// this is diagnostic state, not valid history.
    pub messages: Vec<Message>,
    /// Usage accumulated additively across every round.
    pub usage: TokenUsage,
    /// Final assistant text (empty unless `Completed`).
    pub final_text: String,
    /// Abort/failure detail.
    pub error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// The conversation engine. One instance per run.
pub struct ConversationEngine {
    deps: EngineDeps,
    run_id: String,
    cancel: CancellationToken,
}

impl ConversationEngine {
    /// Build an engine with a fresh run ID and cancellation token.
    #[must_use]
    pub fn new(deps: EngineDeps) -> Self {
        Self {
            deps,
            run_id: uuid::Uuid::now_v7().to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build with an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(deps: EngineDeps, cancel: CancellationToken) -> Self {
        Self {
            deps,
            run_id: uuid::Uuid::now_v7().to_string(),
            cancel,
        }
    }

    /// This run's ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Drive the loop from the seed history to a terminal state.
    #[instrument(skip_all, fields(run_id = %self.run_id, model = %self.deps.config.model))]
    pub async fn run(&self, seed: Vec<Message>) -> RunOutcome {
        let mut messages = seed;
        let mut usage_total = TokenUsage::default();
        let mut pending_warnings: Vec<String> = Vec::new();

        for turn in 1..=self.deps.config.max_turns {
            if self.cancel.is_cancelled() {
                return self.aborted(messages, usage_total, "run cancelled");
            }

            // Hook warnings surface as context for the next model turn.
            if !pending_warnings.is_empty() {
                messages.push(Message::user(format!(
                    "[hook warnings]\n{}",
                    pending_warnings.join("\n")
                )));
                pending_warnings.clear();
            }

            debug!(turn, messages = messages.len(), "requesting turn");
            let turn_output = match self.request_turn(&messages).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(turn, category = e.category(), error = %e, "turn failed");
                    return self.failed(messages, usage_total, e.to_string());
                }
            };
            if let Some(usage) = &turn_output.usage {
                usage_total.add(usage);
            }

            // Zero tool calls: the turn's assistant message completes the run.
            if turn_output.tool_calls.is_empty() {
                messages.push(Message::Assistant {
                    content: turn_output.content.clone(),
                    tool_calls: Vec::new(),
                    usage: turn_output.usage.clone(),
                });
                let summary = self
                    .deps
                    .hooks
                    .execute(HookPoint::OnStop, &self.stop_context(&turn_output.content))
                    .await;
                if !summary.success {
                    return self.failed(
                        messages,
                        usage_total,
                        hook_stop_detail(&summary),
                    );
                }
                info!(turn, "run completed");
                return RunOutcome {
                    status: RunStatus::Completed,
                    messages,
                    usage: usage_total,
                    final_text: turn_output.content,
                    error: None,
                };
            }

            // Append the assistant message with its calls, then resolve the
            // batch in emitted order.
            messages.push(Message::Assistant {
                content: turn_output.content.clone(),
                tool_calls: turn_output.tool_calls.clone(),
                usage: turn_output.usage.clone(),
            });

            for call in &turn_output.tool_calls {
                if self.cancel.is_cancelled() {
                    return self.aborted(messages, usage_total, "run cancelled");
                }

                // Ask-user calls divert to the interaction surface before
                // the gate; the answer becomes the tool message directly.
                if call.name.starts_with(ASK_USER_PREFIX) {
                    if let Some(handler) = &self.deps.interaction {
                        match self.divert_ask_user(handler.as_ref(), call).await {
                            Ok(answer) => {
                                messages.push(Message::tool_result(&call.id, answer, false));
                                continue;
                            }
                            Err(detail) => {
                                messages.push(Message::tool_result(&call.id, detail, true));
                                continue;
                            }
                        }
                    }
                }

                // Approval gate.
                if let Some(reason) = self.confirm(call).await {
                    info!(tool = %call.name, "run aborted by rejection");
                    return self.aborted(messages, usage_total, reason);
                }

                // beforeToolCall hooks — a hard stop fails the run with
                // structured detail; nothing reaches the model.
                let before = self
                    .deps
                    .hooks
                    .execute(HookPoint::BeforeToolCall, &self.call_context(call))
                    .await;
                if !before.success {
                    return self.failed(messages, usage_total, hook_stop_detail(&before));
                }
                pending_warnings.extend(before.warnings().iter().map(|w| (*w).to_owned()));

                // Dispatch, then the output guard.
                let output = self.dispatch(call).await;
                let output = match self.deps.guard.check(&output) {
                    Ok(_) => output,
                    Err(e) => error_output(e.to_string()),
                };
                let is_error = output.errored();
                messages.push(Message::Tool {
                    tool_call_id: call.id.clone(),
                    content: output.to_message_content(),
                    is_error: if is_error { Some(true) } else { None },
                });

                // afterToolCall hooks fire around the recorded result.
                let after = self
                    .deps
                    .hooks
                    .execute(
                        HookPoint::AfterToolCall,
                        &self.result_context(call, &output),
                    )
                    .await;
                if !after.success {
                    return self.failed(messages, usage_total, hook_stop_detail(&after));
                }
                pending_warnings.extend(after.warnings().iter().map(|w| (*w).to_owned()));
            }

            // Token budget check: once per completed turn, before the next
            // request. A compression failure fails the turn rather than
            // proceeding over budget.
            if let Err(detail) = self.maybe_compress(&mut messages, &mut usage_total, &turn_output).await {
                return self.failed(messages, usage_total, detail);
            }
        }

        let max_turns = self.deps.config.max_turns;
        self.failed(
            messages,
            usage_total,
            format!("run exceeded {max_turns} turns"),
        )
    }

    // ─── Turn mechanics ──────────────────────────────────────────────────

    async fn request_turn(
        &self,
        messages: &[Message],
    ) -> Result<crate::turn::TurnOutput, EngineError> {
        let request = ChatRequest {
            model: self.deps.config.model.clone(),
            messages: messages.to_vec(),
            tools: self.deps.tools.specs(),
            temperature: self.deps.config.temperature,
            max_tokens: self.deps.config.max_tokens,
        };

        let provider = self.deps.provider.clone();
        let request = Arc::new(request);
        let factory_request = request.clone();
        let stream = with_stream_retry(
            Box::new(move || {
                let provider = provider.clone();
                let request = factory_request.clone();
                Box::pin(async move { provider.stream(&request).await })
            }),
            self.deps.config.retry.clone(),
            self.cancel.clone(),
        );
        collect_turn(stream).await
    }

    /// Gate one call. Returns `Some(reason)` when the run must abort.
    async fn confirm(&self, call: &ToolCall) -> Option<String> {
        match self.deps.gate.verdict(&call.name, &call.arguments) {
            GateVerdict::AutoApproved => None,
            GateVerdict::NeedsConfirmation => {
                let Some(handler) = &self.deps.interaction else {
                    return Some(format!(
                        "tool '{}' requires confirmation but the run is headless",
                        call.name
                    ));
                };
                let request = ApprovalRequest {
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    tool_call_id: call.id.clone(),
                };
                let decision = handler.approve(&request).await;
                self.deps.gate.record(&call.name, &decision);
                match decision {
                    ApprovalDecision::ApproveOnce | ApprovalDecision::ApproveAlways => None,
                    ApprovalDecision::Reject => {
                        Some(format!("user rejected tool '{}'", call.name))
                    }
                    ApprovalDecision::RejectWithReply(reply) => Some(reply),
                }
            }
        }
    }

    async fn divert_ask_user(
        &self,
        handler: &dyn InteractionHandler,
        call: &ToolCall,
    ) -> Result<String, String> {
        let args: AskUserArgs = serde_json::from_str(&call.arguments)
            .map_err(|e| format!("malformed ask-user arguments: {e}"))?;
        Ok(handler.ask_user(&args).await)
    }

    async fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        let Some(tool) = self.deps.tools.get(&call.name) else {
            warn!(tool = %call.name, "tool not found");
            return error_output(format!("tool not found: {}", call.name));
        };

        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                return error_output(format!(
                    "arguments for '{}' are not valid JSON: {e}",
                    call.name
                ));
            }
        };

        let ctx = ToolContext {
            tool_call_id: call.id.clone(),
            run_id: self.run_id.clone(),
            working_directory: self.deps.config.working_directory.clone(),
            cancellation: self.cancel.clone(),
        };

        debug!(tool = %call.name, tool_call_id = %call.id, "dispatching tool");
        match tool.execute(args, &ctx).await {
            Ok(output) => output,
            Err(e) => error_output(e.to_string()),
        }
    }

    async fn maybe_compress(
        &self,
        messages: &mut Vec<Message>,
        usage_total: &mut TokenUsage,
        turn_output: &crate::turn::TurnOutput,
    ) -> Result<(), String> {
        let Some(compressor) = &self.deps.compressor else {
            return Ok(());
        };
        let Some(usage) = &turn_output.usage else {
            return Ok(());
        };
        let projected = usage.input_tokens
            + usage.cache_read_tokens.unwrap_or(0)
            + usage.cache_creation_tokens.unwrap_or(0)
            + usage.output_tokens;
        if projected <= self.deps.config.max_context_tokens {
            return Ok(());
        }

        info!(
            projected,
            ceiling = self.deps.config.max_context_tokens,
            "token budget exceeded, compressing"
        );
        match compressor.compress(messages).await {
            Ok(Compression::Compressed {
                summary,
                usage,
                preserved_tail,
            }) => {
                usage_total.add(&usage);
                *messages = rebuild(&summary, preserved_tail);
                Ok(())
            }
            Ok(Compression::Unchanged) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    // ─── Hook contexts ───────────────────────────────────────────────────

    fn call_context(&self, call: &ToolCall) -> Map<String, Value> {
        let mut ctx = Map::new();
        let _ = ctx.insert("runId".into(), json!(self.run_id));
        let _ = ctx.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        let _ = ctx.insert("toolName".into(), json!(call.name));
        let _ = ctx.insert("toolCallId".into(), json!(call.id));
        let args: Value =
            serde_json::from_str(&call.arguments).unwrap_or(Value::String(call.arguments.clone()));
        let _ = ctx.insert("arguments".into(), args);
        ctx
    }

    fn result_context(&self, call: &ToolCall, output: &ToolOutput) -> Map<String, Value> {
        let mut ctx = self.call_context(call);
        let _ = ctx.insert("result".into(), json!(output.content));
        let _ = ctx.insert("isError".into(), json!(output.errored()));
        ctx
    }

    fn stop_context(&self, final_text: &str) -> Map<String, Value> {
        let mut ctx = Map::new();
        let _ = ctx.insert("runId".into(), json!(self.run_id));
        let _ = ctx.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
        let _ = ctx.insert("finalMessage".into(), json!(final_text));
        ctx
    }

    // ─── Terminal outcomes ───────────────────────────────────────────────

    fn aborted(
        &self,
        messages: Vec<Message>,
        usage: TokenUsage,
        reason: impl Into<String>,
    ) -> RunOutcome {
        RunOutcome {
            status: RunStatus::Aborted,
            messages,
            usage,
            final_text: String::new(),
            error: Some(reason.into()),
        }
    }

    fn failed(
        &self,
        messages: Vec<Message>,
        usage: TokenUsage,
        reason: impl Into<String>,
    ) -> RunOutcome {
        RunOutcome {
            status: RunStatus::Failed,
            messages,
            usage,
            final_text: String::new(),
            error: Some(reason.into()),
        }
    }
}

/// Render a halted hook summary into the structured detail surfaced to
/// the user.
fn hook_stop_detail(summary: &HookRunSummary) -> String {
    match summary.terminal() {
        Some(result) => match &result.outcome {
            quill_hooks::ActionOutcome::HardStop { exit_code, output } => format!(
                "hook '{}' halted the run (exit {}): {}",
                result.rule,
                exit_code.map_or_else(|| "abnormal".to_owned(), |c| c.to_string()),
                output
            ),
            quill_hooks::ActionOutcome::Failed { error } => {
                format!("hook '{}' failed: {error}", result.rule)
            }
            _ => format!("hook '{}' halted the run", result.rule),
        },
        None => "hook halted the run".to_owned(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
