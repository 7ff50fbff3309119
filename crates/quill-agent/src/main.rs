//! Headless CLI runner for the Quill agent.
//!
//! Wires settings, providers, tools, approval state, hooks, and the
//! compressor into one [`ConversationEngine`] run: prompt in, final
//! assistant text out. Interactive confirmation and ask-user questions go
//! through a line-based stdin surface; Ctrl-C trips the cooperative
//! cancellation token.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quill_approval::{
    ApprovalDecision, ApprovalGate, ApprovalStore, FileApprovalStore, MemoryApprovalStore,
    SessionApprovals,
};
use quill_context::{ContextCompressor, ProviderSummarizer};
use quill_core::messages::Message;
use quill_core::retry::RetryConfig;
use quill_hooks::{FileRuleSource, HookEngine, HookError, PromptModel};
use quill_llm::anthropic::{AnthropicConfig, AnthropicProvider};
use quill_llm::google::{GeminiConfig, GeminiProvider};
use quill_llm::openai_chat::{OpenAiChatConfig, OpenAiChatProvider};
use quill_llm::openai_responses::{OpenAiResponsesConfig, OpenAiResponsesProvider};
use quill_llm::provider::{ChatRequest, Provider};
use quill_runtime::{
    ApprovalRequest, ConversationEngine, DelegateTool, EngineConfig, EngineDeps,
    InteractionHandler, RunStatus, SubagentRegistry, SubagentSpec,
};
use quill_settings::Settings;
use quill_tools::ToolRegistry;
use quill_tools::guard::OutputTokenGuard;

const SYSTEM_PROMPT: &str = "You are Quill, a coding agent working in the user's terminal. \
Use the available tools to inspect and modify the workspace. Prefer small, verifiable steps. \
When the task is done, reply with a concise summary and stop calling tools.";

#[derive(Parser, Debug)]
#[command(name = "quill", about = "Agentic coding assistant", version)]
struct Cli {
    /// The task or question for the agent.
    prompt: String,

    /// Model override.
    #[arg(long)]
    model: Option<String>,

    /// Settings file (defaults to ~/.quill/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Auto-approve every non-sensitive tool call.
    #[arg(long)]
    yolo: bool,

    /// Turn-count backstop override.
    #[arg(long)]
    max_turns: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider selection
// ─────────────────────────────────────────────────────────────────────────────

/// Which wire protocol a model name routes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Backend {
    Anthropic,
    Google,
    OpenAiResponses,
    OpenAiChat,
}

/// Route by model-name prefix. Claude models use the Messages API, Gemini
/// models the Gemini API, first-party OpenAI models the Responses API;
/// everything else is assumed to be an OpenAI-compatible chat endpoint.
fn backend_for(model: &str) -> Backend {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("claude") {
        Backend::Anthropic
    } else if lower.starts_with("gemini") {
        Backend::Google
    } else if lower.starts_with("gpt-") || lower.starts_with('o') {
        Backend::OpenAiResponses
    } else {
        Backend::OpenAiChat
    }
}

fn api_key(env_name: &str) -> Result<String> {
    std::env::var(env_name)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{env_name} is not set"))
}

fn build_provider(model: &str, settings: &Settings) -> Result<Arc<dyn Provider>> {
    let providers = &settings.providers;
    Ok(match backend_for(model) {
        Backend::Anthropic => Arc::new(AnthropicProvider::new(AnthropicConfig {
            api_key: api_key(&providers.anthropic_api_key_env)?,
            base_url: providers.anthropic_base_url.clone(),
            model: model.to_owned(),
        })),
        Backend::Google => Arc::new(GeminiProvider::new(GeminiConfig {
            api_key: api_key(&providers.google_api_key_env)?,
            base_url: providers.google_base_url.clone(),
            model: model.to_owned(),
        })),
        Backend::OpenAiResponses => Arc::new(OpenAiResponsesProvider::new(OpenAiResponsesConfig {
            api_key: api_key(&providers.openai_api_key_env)?,
            base_url: providers.openai_base_url.clone(),
            model: model.to_owned(),
        })),
        Backend::OpenAiChat => Arc::new(OpenAiChatProvider::new(OpenAiChatConfig {
            api_key: api_key(&providers.openai_api_key_env)?,
            base_url: providers.openai_base_url.clone(),
            model: model.to_owned(),
        })),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Compact model bridge for hook prompt actions
// ─────────────────────────────────────────────────────────────────────────────

struct CompactModel {
    provider: Arc<dyn Provider>,
}

#[async_trait]
impl PromptModel for CompactModel {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, HookError> {
        let request = ChatRequest {
            model: self.provider.model().to_owned(),
            messages: vec![Message::system(system), Message::user(prompt)],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(512),
        };
        let mut stream = self
            .provider
            .stream(&request)
            .await
            .map_err(|e| HookError::Model(e.to_string()))?;

        let mut text = String::new();
        while let Some(item) = stream.next().await {
            match item.map_err(|e| HookError::Model(e.to_string()))? {
                quill_core::events::StreamEvent::ContentDelta { delta } => text.push_str(&delta),
                quill_core::events::StreamEvent::Error { error } => {
                    return Err(HookError::Model(error));
                }
                _ => {}
            }
        }
        Ok(text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdin interaction surface
// ─────────────────────────────────────────────────────────────────────────────

struct StdinInteraction;

fn read_line_blocking() -> String {
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
    line.trim().to_owned()
}

#[async_trait]
impl InteractionHandler for StdinInteraction {
    async fn approve(&self, request: &ApprovalRequest) -> ApprovalDecision {
        println!(
            "\nTool approval needed: {} {}",
            request.tool_name, request.arguments
        );
        println!("  [y] approve once  [a] always approve  [n] reject  [r] reject with reply");
        let answer = tokio::task::spawn_blocking(read_line_blocking)
            .await
            .unwrap_or_default();
        match answer.as_str() {
            "y" | "yes" => ApprovalDecision::ApproveOnce,
            "a" | "always" => ApprovalDecision::ApproveAlways,
            "r" => {
                println!("reply:");
                let reply = tokio::task::spawn_blocking(read_line_blocking)
                    .await
                    .unwrap_or_default();
                ApprovalDecision::RejectWithReply(reply)
            }
            _ => ApprovalDecision::Reject,
        }
    }

    async fn ask_user(&self, args: &quill_tools::ask_user::AskUserArgs) -> String {
        println!("\n{}", args.question);
        for (i, option) in args.options.iter().enumerate() {
            println!("  {}. {option}", i + 1);
        }
        let answer = tokio::task::spawn_blocking(read_line_blocking)
            .await
            .unwrap_or_default();
        serde_json::json!({"answer": answer}).to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wiring
// ─────────────────────────────────────────────────────────────────────────────

fn base_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(quill_tools::fs::FileReadTool));
    tools.register(Arc::new(quill_tools::fs::FileWriteTool));
    tools.register(Arc::new(quill_tools::fs::FileEditTool));
    tools.register(Arc::new(quill_tools::search::GrepTool));
    tools.register(Arc::new(quill_tools::terminal::TerminalTool));
    tools.register(Arc::new(quill_tools::ask_user::AskUserTool));
    tools
}

fn approval_store(settings: &Settings) -> Arc<dyn ApprovalStore> {
    match &settings.approval.store_path {
        Some(path) => Arc::new(FileApprovalStore::load(path)),
        None => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_owned());
            let default = PathBuf::from(home).join(".quill").join("approvals.json");
            if default.parent().is_some_and(|p| p.exists()) {
                Arc::new(FileApprovalStore::load(default))
            } else {
                Arc::new(MemoryApprovalStore::with_tools(
                    settings.approval.always_allowed.iter().cloned(),
                ))
            }
        }
    }
}

fn hook_engine(settings: &Settings, compact: Arc<dyn Provider>) -> Arc<HookEngine> {
    let source = FileRuleSource::new(
        settings.hooks.project_path.clone(),
        settings.hooks.global_path.clone(),
    );
    Arc::new(
        HookEngine::new(Box::new(source))
            .with_prompt_model(Arc::new(CompactModel { provider: compact })),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => quill_settings::load_from_path(path)?,
        None => quill_settings::load()?,
    };
    if let Some(model) = &cli.model {
        settings.model = model.clone();
    }
    if cli.yolo {
        settings.approval.yolo = true;
    }
    if let Some(max_turns) = cli.max_turns {
        settings.max_turns = max_turns;
    }

    info!(model = %settings.model, compact = %settings.compact_model, "starting run");

    let provider = build_provider(&settings.model, &settings)?;
    let compact = build_provider(&settings.compact_model, &settings)?;

    let gate = Arc::new(ApprovalGate::new(
        approval_store(&settings),
        SessionApprovals::new(),
        settings.approval.sensitive_commands.clone(),
        settings.approval.yolo,
    ));

    let guard = Arc::new(OutputTokenGuard::with_limit(
        settings.tool_output_token_limit,
    ));
    let hooks = hook_engine(&settings, compact.clone());
    let compressor = Arc::new(ContextCompressor::new(Arc::new(ProviderSummarizer::new(
        compact,
    ))));

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    let _ = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            ctrl_c_cancel.cancel();
        }
    });

    let config = EngineConfig {
        model: settings.model.clone(),
        max_turns: settings.max_turns,
        max_context_tokens: settings.max_context_tokens,
        temperature: None,
        max_tokens: None,
        retry: RetryConfig::default(),
        working_directory: std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".into()),
    };

    let interaction: Arc<dyn InteractionHandler> = Arc::new(StdinInteraction);
    let mut deps = EngineDeps {
        provider,
        tools: base_tools(),
        gate,
        hooks,
        compressor: Some(compressor),
        guard,
        interaction: Some(interaction),
        config,
    };

    // The delegate tool captures the dependency set without itself, then
    // joins the registry the main run sees.
    let subagents = SubagentRegistry::with_overrides(
        settings
            .subagents
            .iter()
            .map(|s| SubagentSpec {
                id: s.id.clone(),
                name: s.name.clone(),
                allowed_tools: s.allowed_tools.clone(),
                role: s.role.clone(),
            })
            .collect(),
    );
    let delegate = DelegateTool::new(deps.clone(), subagents);
    deps.tools.register(Arc::new(delegate));

    let engine = ConversationEngine::with_cancellation(deps, cancel);
    let seed = vec![Message::system(SYSTEM_PROMPT), Message::user(&cli.prompt)];
    let outcome = engine.run(seed).await;

    match outcome.status {
        RunStatus::Completed => {
            println!("{}", outcome.final_text);
            info!(
                input_tokens = outcome.usage.input_tokens,
                output_tokens = outcome.usage.output_tokens,
                "run completed"
            );
            Ok(())
        }
        RunStatus::Aborted => {
            bail!(
                "run aborted: {}",
                outcome.error.unwrap_or_else(|| "unknown".into())
            )
        }
        RunStatus::Failed => {
            bail!(
                "run failed: {}",
                outcome.error.unwrap_or_else(|| "unknown".into())
            )
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_routing() {
        assert_eq!(backend_for("claude-sonnet-4-5"), Backend::Anthropic);
        assert_eq!(backend_for("gemini-2.5-pro"), Backend::Google);
        assert_eq!(backend_for("gpt-5"), Backend::OpenAiResponses);
        assert_eq!(backend_for("o3-mini"), Backend::OpenAiResponses);
        assert_eq!(backend_for("deepseek-chat"), Backend::OpenAiChat);
        assert_eq!(backend_for("llama-3.3-70b"), Backend::OpenAiChat);
    }

    #[test]
    fn backend_routing_is_case_insensitive() {
        assert_eq!(backend_for("Claude-Opus-4"), Backend::Anthropic);
        assert_eq!(backend_for("GEMINI-2.0-flash"), Backend::Google);
    }

    #[test]
    fn base_tools_cover_the_core_set() {
        let tools = base_tools();
        for name in [
            "filesystem-read",
            "filesystem-write",
            "filesystem-edit",
            "search-grep",
            "terminal-execute",
            "askuser-question",
        ] {
            assert!(tools.contains(name), "missing {name}");
        }
    }

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "quill",
            "fix the tests",
            "--model",
            "gpt-5",
            "--yolo",
            "--max-turns",
            "10",
        ]);
        assert_eq!(cli.prompt, "fix the tests");
        assert_eq!(cli.model.as_deref(), Some("gpt-5"));
        assert!(cli.yolo);
        assert_eq!(cli.max_turns, Some(10));
    }
}
