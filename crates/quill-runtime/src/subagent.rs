//! Sub-agent delegation.
//!
//! A sub-agent run is a nested [`ConversationEngine`] run: a single seed
//! user message (the delegated prompt with the spec's role appended), a
//! tool registry narrowed to the spec's allow-list, and the parent's
//! approval state — the child's session approvals write back into the
//! parent's set for the remainder of the parent run.
//!
//! When the nested loop completes, `onSubagentComplete` hooks fire with
//! `{agentId, content, success, usage}`. A command action exiting ≥2
//! appends its detail as an error message and resumes the nested loop; a
//! prompt action answering `ask:"ai", continue:true` appends its message
//! as a new user turn and resumes. Continuations are capped — the
//! original design left this unbounded, which is a loop risk, not a
//! feature.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use quill_core::messages::{Message, TokenUsage};
use quill_core::tools::{ToolOutput, ToolParameterSchema, ToolSpec};
use quill_hooks::HookPoint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};

use crate::engine::{ConversationEngine, EngineDeps, RunStatus};

/// Ceiling on hook-requested continuations of one delegation.
pub const MAX_CONTINUATIONS: u32 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// Specs
// ─────────────────────────────────────────────────────────────────────────────

/// A sub-agent capability profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentSpec {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Tool allow-list (exact or hyphen-prefix entries).
    pub allowed_tools: Vec<String>,
    /// Role text appended to the delegated prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The built-in spec set. Always present; user specs sharing an id fully
/// shadow these.
#[must_use]
pub fn builtin_specs() -> Vec<SubagentSpec> {
    vec![
        SubagentSpec {
            id: "explorer".into(),
            name: "Explorer".into(),
            allowed_tools: vec!["filesystem-read".into(), "search".into()],
            role: Some(
                "You investigate and report. Read and search freely; never modify anything."
                    .into(),
            ),
        },
        SubagentSpec {
            id: "fixer".into(),
            name: "Fixer".into(),
            allowed_tools: vec!["filesystem".into(), "search".into(), "terminal".into()],
            role: Some("Make the smallest change that solves the task, then verify it.".into()),
        },
        SubagentSpec {
            id: "general".into(),
            name: "General".into(),
            allowed_tools: vec![
                "filesystem".into(),
                "search".into(),
                "terminal".into(),
                "askuser".into(),
            ],
            role: None,
        },
    ]
}

/// Registry of sub-agent specs: built-ins plus user overrides.
#[derive(Clone, Debug, Default)]
pub struct SubagentRegistry {
    specs: HashMap<String, SubagentSpec>,
}

impl SubagentRegistry {
    /// Built-ins only.
    #[must_use]
    pub fn new() -> Self {
        Self::with_overrides(Vec::new())
    }

    /// Built-ins shadowed by user-defined specs with matching ids.
    #[must_use]
    pub fn with_overrides(user_specs: Vec<SubagentSpec>) -> Self {
        let mut specs: HashMap<String, SubagentSpec> = builtin_specs()
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        for spec in user_specs {
            // A user copy fully replaces the built-in for matching and
            // tool-filtering purposes.
            let _ = specs.insert(spec.id.clone(), spec);
        }
        Self { specs }
    }

    /// Resolve a spec by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SubagentSpec> {
        self.specs.get(id)
    }

    /// All spec ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.specs.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delegation
// ─────────────────────────────────────────────────────────────────────────────

/// What a delegation returned to the parent as a single tool result.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationResult {
    /// Whether the nested run completed.
    pub success: bool,
    /// Final assistant text (or failure detail).
    pub result: String,
    /// Usage accumulated across every nested round.
    pub usage: TokenUsage,
}

/// Run one delegation to completion, including hook-driven continuations.
#[instrument(skip_all, fields(agent_id = %spec.id))]
pub async fn delegate(
    parent: &EngineDeps,
    spec: &SubagentSpec,
    task: &str,
) -> DelegationResult {
    // Child deps: narrowed tools, shared approval state via a child gate.
    let mut child_deps = parent.clone();
    child_deps.tools = parent.tools.filtered(&spec.allowed_tools);
    child_deps.gate = Arc::new(parent.gate.child_gate());

    let mut prompt = task.to_owned();
    if let Some(role) = &spec.role {
        prompt.push_str("\n\n");
        prompt.push_str(role);
    }

    let mut messages = vec![Message::user(prompt)];
    let mut usage_total = TokenUsage::default();
    let mut continuations = 0u32;

    loop {
        let engine = ConversationEngine::new(child_deps.clone());
        let outcome = engine.run(messages).await;
        usage_total.add(&outcome.usage);

        if outcome.status != RunStatus::Completed {
            let detail = outcome
                .error
                .unwrap_or_else(|| "sub-agent run did not complete".into());
            warn!(agent_id = %spec.id, detail, "delegation failed");
            return DelegationResult {
                success: false,
                result: detail,
                usage: usage_total,
            };
        }

        let summary = child_deps
            .hooks
            .execute(
                HookPoint::OnSubagentComplete,
                &completion_context(&spec.id, &outcome.final_text, &usage_total),
            )
            .await;

        // A halted hook appends its detail and resumes the loop; an
        // ai-continue directive appends its message as a fresh user turn.
        let resume_message = if summary.success {
            summary.continue_ai().map(str::to_owned)
        } else {
            summary.terminal().map(|result| {
                format!("[hook error from '{}']\n{}", result.rule, outcome_text(result))
            })
        };

        match resume_message {
            Some(text) if continuations < MAX_CONTINUATIONS => {
                continuations += 1;
                info!(agent_id = %spec.id, continuations, "hook requested continuation");
                messages = outcome.messages;
                messages.push(Message::user(text));
            }
            Some(_) => {
                warn!(
                    agent_id = %spec.id,
                    cap = MAX_CONTINUATIONS,
                    "continuation cap reached, finalizing"
                );
                return DelegationResult {
                    success: true,
                    result: outcome.final_text,
                    usage: usage_total,
                };
            }
            None => {
                return DelegationResult {
                    success: true,
                    result: outcome.final_text,
                    usage: usage_total,
                };
            }
        }
    }
}

fn completion_context(agent_id: &str, content: &str, usage: &TokenUsage) -> Map<String, Value> {
    let mut ctx = Map::new();
    let _ = ctx.insert("agentId".into(), json!(agent_id));
    let _ = ctx.insert("timestamp".into(), json!(chrono::Utc::now().to_rfc3339()));
    let _ = ctx.insert("content".into(), json!(content));
    let _ = ctx.insert("success".into(), json!(true));
    let _ = ctx.insert("usage".into(), json!(usage));
    ctx
}

fn outcome_text(result: &quill_hooks::ActionResult) -> String {
    match &result.outcome {
        quill_hooks::ActionOutcome::HardStop { output, .. } => output.clone(),
        quill_hooks::ActionOutcome::Failed { error } => error.clone(),
        _ => String::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The delegate tool
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct DelegateParams {
    agent: String,
    task: String,
}

/// The `agent-delegate` tool: runs a scope-restricted sub-agent and
/// returns its result as a single tool output.
pub struct DelegateTool {
    deps: EngineDeps,
    registry: SubagentRegistry,
}

impl DelegateTool {
    /// Build over the parent's engine dependencies.
    ///
    /// `deps.tools` should be the full registry (minus this tool) — each
    /// delegation narrows it per spec. Delegation is single-level: the
    /// child registry never contains `agent-delegate` itself.
    #[must_use]
    pub fn new(deps: EngineDeps, registry: SubagentRegistry) -> Self {
        Self { deps, registry }
    }
}

#[async_trait]
impl quill_tools::AgentTool for DelegateTool {
    fn name(&self) -> &str {
        "agent-delegate"
    }

    fn spec(&self) -> ToolSpec {
        let mut props = serde_json::Map::new();
        let _ = props.insert(
            "agent".into(),
            json!({
                "type": "string",
                "description": format!("Sub-agent id ({})", self.registry.ids().join(", ")),
            }),
        );
        let _ = props.insert(
            "task".into(),
            json!({"type": "string", "description": "Self-contained task description"}),
        );
        ToolSpec {
            name: self.name().into(),
            description: "Delegate a bounded task to a restricted-capability sub-agent".into(),
            parameters: ToolParameterSchema::object(props, vec!["agent".into(), "task".into()]),
        }
    }

    async fn execute(
        &self,
        args: Value,
        _ctx: &quill_tools::ToolContext,
    ) -> Result<ToolOutput, quill_tools::ToolError> {
        let params: DelegateParams = quill_tools::traits::decode_args(self.name(), args)?;
        let Some(spec) = self.registry.get(&params.agent) else {
            return Err(quill_tools::ToolError::Execution(format!(
                "unknown sub-agent '{}' (available: {})",
                params.agent,
                self.registry.ids().join(", ")
            )));
        };

        let result = delegate(&self.deps, spec, &params.task).await;
        Ok(ToolOutput {
            content: result.result.clone(),
            details: Some(json!({
                "success": result.success,
                "agentId": spec.id,
                "usage": result.usage,
            })),
            is_error: if result.success { None } else { Some(true) },
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────────────────────────────────────


// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::test_support::scripted_turns;
    use super::*;
    use quill_approval::{ApprovalGate, MemoryApprovalStore, SessionApprovals};
    use quill_core::events::StreamEvent;
    use quill_core::messages::ToolCall;
    use quill_core::tools::text_output;
    use quill_hooks::{HookAction, HookEngine, HookRule, StaticRuleSource};
    use quill_llm::provider::Provider;
    use quill_tools::{AgentTool, ToolContext, ToolRegistry};

    struct NamedStub(&'static str);

    #[async_trait]
    impl AgentTool for NamedStub {
        fn name(&self) -> &str {
            self.0
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.0.into(),
                description: "stub".into(),
                parameters: ToolParameterSchema::empty(),
            }
        }
        async fn execute(
            &self,
            _args: Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, quill_tools::ToolError> {
            Ok(text_output("stub"))
        }
    }

    fn full_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(NamedStub("filesystem-read")));
        tools.register(Arc::new(NamedStub("filesystem-edit")));
        tools.register(Arc::new(NamedStub("search-grep")));
        tools.register(Arc::new(NamedStub("terminal-execute")));
        tools
    }

    fn parent_deps(provider: Arc<dyn Provider>) -> EngineDeps {
        EngineDeps {
            provider,
            tools: full_registry(),
            gate: Arc::new(ApprovalGate::new(
                Arc::new(MemoryApprovalStore::new()),
                SessionApprovals::new(),
                vec![],
                true,
            )),
            hooks: Arc::new(HookEngine::new(Box::new(StaticRuleSource::new()))),
            compressor: None,
            guard: Arc::new(quill_tools::guard::OutputTokenGuard::new()),
            interaction: None,
            config: crate::engine::EngineConfig {
                model: "test-model".into(),
                ..Default::default()
            },
        }
    }

    fn text_turn(text: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::ContentDelta { delta: text.into() },
            StreamEvent::Done,
        ]
    }

    // ── registry ─────────────────────────────────────────────────────────

    #[test]
    fn builtins_always_exist() {
        let registry = SubagentRegistry::new();
        assert!(registry.get("explorer").is_some());
        assert!(registry.get("fixer").is_some());
        assert!(registry.get("general").is_some());
    }

    #[test]
    fn user_spec_fully_shadows_builtin() {
        let registry = SubagentRegistry::with_overrides(vec![SubagentSpec {
            id: "explorer".into(),
            name: "Locked-down explorer".into(),
            allowed_tools: vec!["search-grep".into()],
            role: None,
        }]);
        let spec = registry.get("explorer").unwrap();
        assert_eq!(spec.name, "Locked-down explorer");
        assert_eq!(spec.allowed_tools, vec!["search-grep".to_owned()]);
        // The built-in's role is gone — the override replaced it wholesale.
        assert!(spec.role.is_none());
    }

    #[test]
    fn filtering_respects_allow_list() {
        let registry = full_registry();
        let spec = SubagentSpec {
            id: "t".into(),
            name: "T".into(),
            allowed_tools: vec!["filesystem".into()],
            role: None,
        };
        let filtered = registry.filtered(&spec.allowed_tools);
        assert!(filtered.contains("filesystem-read"));
        assert!(filtered.contains("filesystem-edit"));
        assert!(!filtered.contains("terminal-execute"));
    }

    // ── delegation ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn delegation_returns_result_and_usage() {
        let provider = scripted_turns(vec![vec![
            StreamEvent::ContentDelta {
                delta: "found three call sites".into(),
            },
            StreamEvent::Usage {
                usage: TokenUsage {
                    input_tokens: 40,
                    output_tokens: 8,
                    ..Default::default()
                },
            },
            StreamEvent::Done,
        ]]);
        let deps = parent_deps(provider);
        let spec = SubagentRegistry::new().get("explorer").unwrap().clone();

        let result = delegate(&deps, &spec, "count the call sites").await;
        assert!(result.success);
        assert_eq!(result.result, "found three call sites");
        assert_eq!(result.usage.input_tokens, 40);
    }

    #[tokio::test]
    async fn delegation_reports_failure() {
        let provider: Arc<dyn Provider> =
            Arc::new(super::test_support::ScriptedProvider::failing());
        let mut deps = parent_deps(provider);
        deps.config.retry.max_retries = 0;
        let spec = SubagentRegistry::new().get("general").unwrap().clone();

        let result = delegate(&deps, &spec, "anything").await;
        assert!(!result.success);
        assert!(result.result.contains("500"));
    }

    #[tokio::test]
    async fn child_approvals_propagate_to_parent_session() {
        let provider = scripted_turns(vec![text_turn("done")]);
        let deps = parent_deps(provider);
        let spec = SubagentRegistry::new().get("explorer").unwrap().clone();

        // Simulate a child run recording an always-approval: the shared
        // session set must reflect it for the rest of the parent run.
        let child_gate = deps.gate.child_gate();
        child_gate.record(
            "filesystem-read",
            &quill_approval::ApprovalDecision::ApproveAlways,
        );
        let _ = delegate(&deps, &spec, "look around").await;
        assert!(deps.gate.session().contains("filesystem-read"));
    }

    #[tokio::test]
    async fn ai_continue_hook_resumes_loop() {
        // Round 1 completes; the prompt hook asks for continuation; round
        // 2 completes with the final answer.
        struct ContinueOnce {
            calls: parking_lot::Mutex<u32>,
        }
        #[async_trait]
        impl quill_hooks::PromptModel for ContinueOnce {
            async fn complete(
                &self,
                _system: &str,
                _prompt: &str,
            ) -> Result<String, quill_hooks::HookError> {
                let mut calls = self.calls.lock();
                *calls += 1;
                if *calls == 1 {
                    Ok(r#"{"ask":"ai","message":"also check the tests","continue":true}"#.into())
                } else {
                    Ok(r#"{"ask":"user","message":"done","continue":false}"#.into())
                }
            }
        }

        let rules = vec![HookRule {
            description: "reviewer".into(),
            matcher: None,
            actions: vec![HookAction::Prompt {
                prompt: "is the work complete?".into(),
                timeout_ms: 5_000,
                enabled: true,
            }],
        }];
        let provider = scripted_turns(vec![text_turn("first pass"), text_turn("second pass")]);
        let mut deps = parent_deps(provider);
        deps.hooks = Arc::new(
            HookEngine::new(Box::new(
                StaticRuleSource::new().with_rules(HookPoint::OnSubagentComplete, rules),
            ))
            .with_prompt_model(Arc::new(ContinueOnce {
                calls: parking_lot::Mutex::new(0),
            })),
        );
        let spec = SubagentRegistry::new().get("general").unwrap().clone();

        let result = delegate(&deps, &spec, "do the thing").await;
        assert!(result.success);
        // The loop resumed once and finalized on the second round.
        assert_eq!(result.result, "second pass");
    }

    #[tokio::test]
    async fn hook_hard_stop_appends_error_and_resumes() {
        let rules = vec![HookRule {
            description: "strict check".into(),
            matcher: Some("content:first*".into()),
            actions: vec![HookAction::Command {
                command: "echo rejected; exit 2".into(),
                timeout_ms: 5_000,
                enabled: true,
            }],
        }];
        let provider = scripted_turns(vec![text_turn("first pass"), text_turn("fixed pass")]);
        let mut deps = parent_deps(provider);
        deps.hooks = Arc::new(HookEngine::new(Box::new(
            StaticRuleSource::new().with_rules(HookPoint::OnSubagentComplete, rules),
        )));
        let spec = SubagentRegistry::new().get("general").unwrap().clone();

        let result = delegate(&deps, &spec, "do the thing").await;
        // The first round's hard stop fed an error message back in; the
        // matcher no longer matches "fixed pass", so the loop finalizes.
        assert!(result.success);
        assert_eq!(result.result, "fixed pass");
    }

    #[tokio::test]
    async fn continuation_cap_bounds_the_loop() {
        // The hook always hard-stops; the loop must stop resuming at the cap.
        let rules = vec![HookRule {
            description: "never satisfied".into(),
            matcher: None,
            actions: vec![HookAction::Command {
                command: "exit 2".into(),
                timeout_ms: 5_000,
                enabled: true,
            }],
        }];
        let turns: Vec<Vec<StreamEvent>> =
            (0..10).map(|i| text_turn(&format!("round {i}"))).collect();
        let provider = scripted_turns(turns);
        let mut deps = parent_deps(provider);
        deps.hooks = Arc::new(HookEngine::new(Box::new(
            StaticRuleSource::new().with_rules(HookPoint::OnSubagentComplete, rules),
        )));
        let spec = SubagentRegistry::new().get("general").unwrap().clone();

        let result = delegate(&deps, &spec, "loop forever").await;
        assert!(result.success);
        // 1 initial round + MAX_CONTINUATIONS resumed rounds.
        assert_eq!(result.result, format!("round {MAX_CONTINUATIONS}"));
    }

    // ── delegate tool ────────────────────────────────────────────────────

    #[tokio::test]
    async fn delegate_tool_runs_named_agent() {
        let provider = scripted_turns(vec![text_turn("explored")]);
        let deps = parent_deps(provider);
        let tool = DelegateTool::new(deps, SubagentRegistry::new());

        let ctx = ToolContext::new("tc-1", "run-1", "/tmp");
        let out = tool
            .execute(
                json!({"agent": "explorer", "task": "map the module layout"}),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.content, "explored");
        assert_eq!(out.details.as_ref().unwrap()["agentId"], "explorer");
        assert!(!out.errored());
    }

    #[tokio::test]
    async fn delegate_tool_rejects_unknown_agent() {
        let provider = scripted_turns(vec![]);
        let deps = parent_deps(provider);
        let tool = DelegateTool::new(deps, SubagentRegistry::new());

        let ctx = ToolContext::new("tc-1", "run-1", "/tmp");
        let err = tool
            .execute(json!({"agent": "nope", "task": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown sub-agent"));
    }

    #[test]
    fn delegate_tool_spec_lists_agents() {
        let provider = scripted_turns(vec![]);
        let deps = parent_deps(provider);
        let tool = DelegateTool::new(deps, SubagentRegistry::new());
        let spec = tool.spec();
        let agents = spec.parameters.properties.unwrap()["agent"]["description"]
            .as_str()
            .unwrap()
            .to_owned();
        assert!(agents.contains("explorer"));
        assert!(agents.contains("fixer"));
    }
}
