//! End-to-end engine loop tests with a scripted provider and real tools.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use quill_approval::{ApprovalGate, MemoryApprovalStore, SessionApprovals};
use quill_core::events::StreamEvent;
use quill_core::messages::{Message, ToolCall};
use quill_hooks::{HookEngine, StaticRuleSource};
use quill_llm::provider::{ChatRequest, EventStream, Provider, ProviderError, ProviderResult};
use quill_runtime::{ConversationEngine, EngineConfig, EngineDeps, RunStatus};
use quill_tools::ToolRegistry;
use quill_tools::guard::OutputTokenGuard;

/// Replays one scripted event list per `stream` call.
struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Vec<StreamEvent>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }
    fn model(&self) -> &str {
        "test-model"
    }
    async fn stream(&self, _request: &ChatRequest) -> ProviderResult<EventStream> {
        let events = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted");
        let items: Vec<Result<StreamEvent, ProviderError>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

fn deps(provider: Arc<dyn Provider>, tools: ToolRegistry, working_directory: &str) -> EngineDeps {
    EngineDeps {
        provider,
        tools,
        gate: Arc::new(ApprovalGate::new(
            Arc::new(MemoryApprovalStore::new()),
            SessionApprovals::new(),
            vec![],
            true,
        )),
        hooks: Arc::new(HookEngine::new(Box::new(StaticRuleSource::new()))),
        compressor: None,
        guard: Arc::new(OutputTokenGuard::new()),
        interaction: None,
        config: EngineConfig {
            model: "test-model".into(),
            working_directory: working_directory.into(),
            ..EngineConfig::default()
        },
    }
}

#[tokio::test]
async fn file_read_round_trip_completes_with_four_messages() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.ts"), "export const x = 1;").unwrap();

    let provider = ScriptedProvider::new(vec![
        vec![
            StreamEvent::ToolCalls {
                tool_calls: vec![ToolCall::new(
                    "tc-1",
                    "filesystem-read",
                    r#"{"path":"a.ts"}"#,
                )],
            },
            StreamEvent::Done,
        ],
        vec![
            StreamEvent::ContentDelta {
                delta: "The file exports x = 1.".into(),
            },
            StreamEvent::Done,
        ],
    ]);

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(quill_tools::fs::FileReadTool));

    let engine = ConversationEngine::new(deps(
        provider,
        tools,
        &dir.path().to_string_lossy(),
    ));
    let outcome = engine.run(vec![Message::user("what's in a.ts?")]).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.final_text, "The file exports x = 1.");

    // Exactly four messages: user, assistant-with-call, tool result,
    // final assistant.
    assert_eq!(outcome.messages.len(), 4);
    assert!(outcome.messages[0].is_user());
    assert_eq!(outcome.messages[1].tool_calls().len(), 1);
    let Message::Tool {
        tool_call_id,
        content,
        is_error,
    } = &outcome.messages[2]
    else {
        panic!("expected a tool message");
    };
    assert_eq!(tool_call_id, "tc-1");
    assert!(content.contains("export const x = 1;"));
    assert!(is_error.is_none());
    assert!(outcome.messages[3].is_assistant());
}

#[tokio::test]
async fn tool_results_pair_with_their_batch() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("one.txt"), "first file").unwrap();
    std::fs::write(dir.path().join("two.txt"), "second file").unwrap();

    let provider = ScriptedProvider::new(vec![
        vec![
            StreamEvent::ToolCalls {
                tool_calls: vec![
                    ToolCall::new("tc-1", "filesystem-read", r#"{"path":"one.txt"}"#),
                    ToolCall::new("tc-2", "filesystem-read", r#"{"path":"two.txt"}"#),
                ],
            },
            StreamEvent::Done,
        ],
        vec![
            StreamEvent::ContentDelta {
                delta: "Read both files.".into(),
            },
            StreamEvent::Done,
        ],
    ]);

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(quill_tools::fs::FileReadTool));

    let engine = ConversationEngine::new(deps(
        provider,
        tools,
        &dir.path().to_string_lossy(),
    ));
    let outcome = engine.run(vec![Message::user("read both")]).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    // The result count equals the batch size and the ids pair in order.
    let batch: Vec<&str> = outcome.messages[1]
        .tool_calls()
        .iter()
        .map(|tc| tc.id.as_str())
        .collect();
    let results: Vec<&str> = outcome
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(batch, results);
}
