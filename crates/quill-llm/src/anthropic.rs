//! Anthropic Messages API adapter.
//!
//! Wire shape: `POST {base}/v1/messages` with `x-api-key` and
//! `anthropic-version` headers, `stream: true`. SSE events discriminate on
//! `type`:
//! - `message_start` → input + cache token usage
//! - `content_block_start` → a `text` block, or a `tool_use` block
//!   carrying id and name
//! - `content_block_delta` → `text_delta` or `input_json_delta`
//! - `content_block_stop` → close the current block
//! - `message_delta` → stop reason and output tokens
//! - `message_stop` → terminal
//! - `error` → in-band failure

use async_trait::async_trait;
use quill_core::events::StreamEvent;
use quill_core::messages::{Message, TokenUsage};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::accumulate::ToolCallAccumulator;
use crate::pipeline::events_from_sse;
use crate::provider::{
    ChatRequest, EventStream, Provider, ProviderResult, response_to_api_error,
};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// API version header value.
const API_VERSION: &str = "2023-06-01";

/// Default max output tokens (the Messages API requires the field).
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Configuration for the Anthropic adapter.
#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    /// API key sent via `x-api-key`.
    pub api_key: String,
    /// Base URL.
    pub base_url: String,
    /// Model ID.
    pub model: String,
}

impl AnthropicConfig {
    /// Config with the default base URL.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: model.into(),
        }
    }
}

/// Anthropic Messages provider.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, request: &ChatRequest) -> ProviderResult<EventStream> {
        let body = build_request_body(&self.config.model, request);
        debug!(model = %self.config.model, "opening anthropic stream");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_api_error(response).await);
        }

        Ok(events_from_sse(
            response,
            false,
            "anthropic",
            StreamState::default(),
            process_event,
            finalize,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Build the Messages API request body.
///
/// System prompts lift into the top-level `system` field; assistant tool
/// calls become `tool_use` content blocks (arguments parsed into `input`);
/// tool results become `tool_result` blocks inside a `user` message.
fn build_request_body(model: &str, request: &ChatRequest) -> Value {
    let mut system: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();

    for message in &request.messages {
        match message {
            Message::System { content } => system.push(content),
            Message::User { content } => {
                messages.push(json!({"role": "user", "content": content}));
            }
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut blocks: Vec<Value> = Vec::new();
                if !content.is_empty() {
                    blocks.push(json!({"type": "text", "text": content}));
                }
                for tc in tool_calls {
                    let input: Value =
                        serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.name,
                        "input": input,
                    }));
                }
                messages.push(json!({"role": "assistant", "content": blocks}));
            }
            Message::Tool {
                tool_call_id,
                content,
                is_error,
            } => {
                let mut block = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                });
                if is_error.unwrap_or(false) {
                    block["is_error"] = json!(true);
                }
                messages.push(json!({"role": "user", "content": [block]}));
            }
        }
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": true,
    });
    if !system.is_empty() {
        body["system"] = json!(system.join("\n\n"));
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "input_schema": spec.parameters,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream handling
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnthropicEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    content_block: Option<WireContentBlock>,
    #[serde(default)]
    delta: Option<WireDelta>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireApiError>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type", default)]
    block_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(rename = "type", default)]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireApiError {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

/// State accumulated across events within one stream.
#[derive(Default)]
struct StreamState {
    tool_calls: ToolCallAccumulator,
    /// Index of the `tool_use` block currently receiving JSON deltas.
    open_tool_block: Option<u64>,
    input_tokens: u64,
    output_tokens: u64,
    cache_creation_tokens: u64,
    cache_read_tokens: u64,
    saw_usage: bool,
}

fn process_event(event: AnthropicEvent, state: &mut StreamState) -> Vec<StreamEvent> {
    match event.event_type.as_str() {
        "message_start" => {
            if let Some(usage) = event.message.and_then(|m| m.usage) {
                state.input_tokens = usage.input_tokens;
                state.cache_creation_tokens = usage.cache_creation_input_tokens;
                state.cache_read_tokens = usage.cache_read_input_tokens;
                state.saw_usage = true;
            }
            vec![]
        }

        "content_block_start" => {
            if let (Some(index), Some(block)) = (event.index, &event.content_block) {
                if block.block_type == "tool_use" {
                    state.open_tool_block = Some(index);
                    state.tool_calls.push(
                        index,
                        block.id.as_deref(),
                        block.name.as_deref(),
                        "",
                    );
                }
            }
            vec![]
        }

        "content_block_delta" => {
            let Some(delta) = &event.delta else {
                return vec![];
            };
            match delta.delta_type.as_str() {
                "text_delta" => delta
                    .text
                    .as_ref()
                    .filter(|t| !t.is_empty())
                    .map(|t| {
                        vec![StreamEvent::ContentDelta {
                            delta: t.clone(),
                        }]
                    })
                    .unwrap_or_default(),
                "input_json_delta" => {
                    if let (Some(index), Some(fragment)) =
                        (event.index.or(state.open_tool_block), &delta.partial_json)
                    {
                        state.tool_calls.push(index, None, None, fragment);
                    }
                    vec![]
                }
                _ => vec![],
            }
        }

        "content_block_stop" => {
            state.open_tool_block = None;
            vec![]
        }

        "message_delta" => {
            if let Some(usage) = event.usage {
                state.output_tokens = usage.output_tokens;
                state.saw_usage = true;
            }
            vec![]
        }

        "error" => {
            let (kind, message) = event
                .error
                .map_or_else(|| (String::new(), "unknown".to_owned()), |e| {
                    (e.error_type, e.message)
                });
            vec![StreamEvent::Error {
                error: format!("Anthropic API error ({kind}): {message}"),
            }]
        }

        // message_stop, ping
        _ => vec![],
    }
}

fn finalize(state: StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !state.tool_calls.is_empty() {
        events.push(StreamEvent::ToolCalls {
            tool_calls: state.tool_calls.finish(),
        });
    }
    if state.saw_usage {
        events.push(StreamEvent::Usage {
            usage: TokenUsage {
                input_tokens: state.input_tokens,
                output_tokens: state.output_tokens,
                cache_creation_tokens: if state.cache_creation_tokens > 0 {
                    Some(state.cache_creation_tokens)
                } else {
                    None
                },
                cache_read_tokens: if state.cache_read_tokens > 0 {
                    Some(state.cache_read_tokens)
                } else {
                    None
                },
            },
        });
    }
    events.push(StreamEvent::Done);
    events
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use quill_core::messages::ToolCall;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(s: &str) -> AnthropicEvent {
        serde_json::from_str(s).unwrap()
    }

    // ── request conversion ───────────────────────────────────────────────

    #[test]
    fn system_lifts_to_top_level() {
        let req = ChatRequest {
            messages: vec![Message::system("rules"), Message::user("hi")],
            ..Default::default()
        };
        let body = build_request_body("claude-test", &req);
        assert_eq!(body["system"], "rules");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_call_becomes_tool_use_block() {
        let req = ChatRequest {
            messages: vec![Message::Assistant {
                content: "Checking.".into(),
                tool_calls: vec![ToolCall::new("tu-1", "search-grep", r#"{"pattern":"x"}"#)],
                usage: None,
            }],
            ..Default::default()
        };
        let body = build_request_body("m", &req);
        let blocks = &body["messages"][0]["content"];
        assert_eq!(blocks[0]["type"], "text");
        assert_eq!(blocks[1]["type"], "tool_use");
        assert_eq!(blocks[1]["id"], "tu-1");
        assert_eq!(blocks[1]["input"]["pattern"], "x");
    }

    #[test]
    fn tool_result_becomes_user_block() {
        let req = ChatRequest {
            messages: vec![Message::tool_result("tu-1", "found 3", true)],
            ..Default::default()
        };
        let body = build_request_body("m", &req);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "tool_result");
        assert_eq!(msg["content"][0]["tool_use_id"], "tu-1");
        assert_eq!(msg["content"][0]["is_error"], true);
    }

    #[test]
    fn tools_use_input_schema() {
        let req = ChatRequest {
            tools: vec![quill_core::tools::ToolSpec {
                name: "filesystem-read".into(),
                description: "Read".into(),
                parameters: quill_core::tools::ToolParameterSchema::empty(),
            }],
            ..Default::default()
        };
        let body = build_request_body("m", &req);
        assert_eq!(body["tools"][0]["name"], "filesystem-read");
        assert!(body["tools"][0].get("input_schema").is_some());
    }

    // ── event handling ───────────────────────────────────────────────────

    #[test]
    fn message_start_captures_input_usage() {
        let mut state = StreamState::default();
        let _ = process_event(
            parse(
                r#"{"type":"message_start","message":{"usage":{"input_tokens":25,"cache_read_input_tokens":20}}}"#,
            ),
            &mut state,
        );
        assert_eq!(state.input_tokens, 25);
        assert_eq!(state.cache_read_tokens, 20);
    }

    #[test]
    fn text_delta_emits_content() {
        let mut state = StreamState::default();
        let events = process_event(
            parse(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
            ),
            &mut state,
        );
        assert_eq!(events, vec![StreamEvent::ContentDelta { delta: "hi".into() }]);
    }

    #[test]
    fn tool_use_block_accumulates_json() {
        let mut state = StreamState::default();
        let _ = process_event(
            parse(
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"tu-1","name":"filesystem-read"}}"#,
            ),
            &mut state,
        );
        let _ = process_event(
            parse(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
            ),
            &mut state,
        );
        let _ = process_event(
            parse(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"a.rs\"}"}}"#,
            ),
            &mut state,
        );
        let _ = process_event(parse(r#"{"type":"content_block_stop","index":1}"#), &mut state);
        let events = finalize(state);
        let StreamEvent::ToolCalls { tool_calls } = &events[0] else {
            panic!("expected tool calls");
        };
        assert_eq!(tool_calls[0].id, "tu-1");
        assert_eq!(tool_calls[0].arguments, r#"{"path":"a.rs"}"#);
    }

    #[test]
    fn message_delta_captures_output_tokens() {
        let mut state = StreamState::default();
        let _ = process_event(
            parse(r#"{"type":"message_delta","delta":{"type":""},"usage":{"output_tokens":42}}"#),
            &mut state,
        );
        assert_eq!(state.output_tokens, 42);
    }

    #[test]
    fn usage_splits_across_start_and_delta() {
        let mut state = StreamState::default();
        let _ = process_event(
            parse(r#"{"type":"message_start","message":{"usage":{"input_tokens":100}}}"#),
            &mut state,
        );
        let _ = process_event(
            parse(r#"{"type":"message_delta","usage":{"output_tokens":7}}"#),
            &mut state,
        );
        let events = finalize(state);
        assert!(matches!(
            &events[0],
            StreamEvent::Usage { usage }
                if usage.input_tokens == 100 && usage.output_tokens == 7
        ));
    }

    #[test]
    fn error_event_maps_to_error() {
        let mut state = StreamState::default();
        let events = process_event(
            parse(r#"{"type":"error","error":{"type":"overloaded_error","message":"busy"}}"#),
            &mut state,
        );
        assert!(events[0].is_error());
    }

    #[test]
    fn ping_ignored() {
        let mut state = StreamState::default();
        assert!(process_event(parse(r#"{"type":"ping"}"#), &mut state).is_empty());
    }

    // ── end to end ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn streams_full_message() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12}}}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let provider = AnthropicProvider::new(AnthropicConfig {
            api_key: "k".into(),
            base_url: server.uri(),
            model: "claude-test".into(),
        });
        let events: Vec<StreamEvent> = provider
            .stream(&ChatRequest::default())
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(events[0], StreamEvent::ContentDelta { delta: "Hello".into() });
        assert!(matches!(
            &events[1],
            StreamEvent::Usage { usage } if usage.input_tokens == 12 && usage.output_tokens == 2
        ));
        assert!(events[2].is_done());
    }
}
