//! OpenAI Responses API adapter.
//!
//! Wire shape: `POST {base}/responses` with `stream: true`. SSE events are
//! discriminated by a `type` field:
//! - `response.output_text.delta` → text
//! - `response.output_item.added` with a `function_call` item → tool call
//!   opened (carries `call_id` and `name`)
//! - `response.function_call_arguments.delta` → argument JSON fragment
//! - `response.failed` → in-band error
//! - `response.completed` → terminal event carrying `response.usage`

use async_trait::async_trait;
use quill_core::events::StreamEvent;
use quill_core::messages::{Message, TokenUsage};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::accumulate::ToolCallAccumulator;
use crate::pipeline::events_from_sse;
use crate::provider::{
    ChatRequest, EventStream, Provider, ProviderResult, response_to_api_error,
};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for the Responses API adapter.
#[derive(Clone, Debug)]
pub struct OpenAiResponsesConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Base URL.
    pub base_url: String,
    /// Model ID.
    pub model: String,
}

impl OpenAiResponsesConfig {
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

/// OpenAI Responses API provider.
pub struct OpenAiResponsesProvider {
    config: OpenAiResponsesConfig,
    client: reqwest::Client,
}

impl OpenAiResponsesProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(config: OpenAiResponsesConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiResponsesProvider {
    fn name(&self) -> &str {
        "openai-responses"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, request: &ChatRequest) -> ProviderResult<EventStream> {
        let body = build_request_body(&self.config.model, request);
        debug!(model = %self.config.model, "opening responses stream");

        let response = self
            .client
            .post(format!("{}/responses", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_api_error(response).await);
        }

        Ok(events_from_sse(
            response,
            false,
            "openai-responses",
            StreamState::default(),
            process_event,
            finalize,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Build the Responses API request body.
///
/// System content goes into `instructions`; the rest of the history maps to
/// `input` items — messages, `function_call` items, and
/// `function_call_output` items keyed by `call_id`.
fn build_request_body(model: &str, request: &ChatRequest) -> Value {
    let mut instructions: Vec<&str> = Vec::new();
    let mut input: Vec<Value> = Vec::new();

    for message in &request.messages {
        match message {
            Message::System { content } => instructions.push(content),
            Message::User { content } => {
                input.push(json!({"type": "message", "role": "user", "content": content}));
            }
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                if !content.is_empty() {
                    input.push(json!({
                        "type": "message",
                        "role": "assistant",
                        "content": content,
                    }));
                }
                for tc in tool_calls {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": tc.id,
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }));
                }
            }
            Message::Tool {
                tool_call_id,
                content,
                ..
            } => {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": tool_call_id,
                    "output": content,
                }));
            }
        }
    }

    let mut body = json!({
        "model": model,
        "input": input,
        "stream": true,
    });
    if !instructions.is_empty() {
        body["instructions"] = json!(instructions.join("\n\n"));
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = request.max_tokens {
        body["max_output_tokens"] = json!(m);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|spec| {
                json!({
                    "type": "function",
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.parameters,
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
struct ResponsesEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    item: Option<ResponsesItem>,
    /// `call_id` of the function call an arguments delta belongs to.
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    response: Option<ResponsesBody>,
}

#[derive(Debug, Deserialize)]
struct ResponsesItem {
    #[serde(rename = "type", default)]
    item_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    usage: Option<ResponsesUsage>,
    #[serde(default)]
    error: Option<ResponsesError>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<ResponsesInputDetails>,
}

#[derive(Debug, Deserialize)]
struct ResponsesInputDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ResponsesError {
    #[serde(default)]
    message: String,
}

/// State accumulated across events within one stream.
#[derive(Default)]
struct StreamState {
    tool_calls: ToolCallAccumulator,
    /// `item_id` → accumulator index, in arrival order.
    call_order: Vec<String>,
    usage: Option<TokenUsage>,
    completed: bool,
}

impl StreamState {
    fn index_for(&mut self, item_id: &str) -> u64 {
        if let Some(pos) = self.call_order.iter().position(|id| id == item_id) {
            return pos as u64;
        }
        self.call_order.push(item_id.to_owned());
        (self.call_order.len() - 1) as u64
    }
}

fn process_event(event: ResponsesEvent, state: &mut StreamState) -> Vec<StreamEvent> {
    match event.event_type.as_str() {
        "response.output_text.delta" => event
            .delta
            .filter(|d| !d.is_empty())
            .map(|delta| vec![StreamEvent::ContentDelta { delta }])
            .unwrap_or_default(),

        "response.output_item.added" => {
            if let Some(item) = &event.item {
                if item.item_type == "function_call" {
                    // The arguments-delta events reference the item `id`, so
                    // key ordering by it; the wire call_id becomes ours.
                    let key = item.id.clone().or_else(|| item.call_id.clone());
                    if let Some(key) = key {
                        let index = state.index_for(&key);
                        state.tool_calls.push(
                            index,
                            item.call_id.as_deref(),
                            item.name.as_deref(),
                            item.arguments.as_deref().unwrap_or(""),
                        );
                    }
                }
            }
            vec![]
        }

        "response.function_call_arguments.delta" => {
            if let (Some(item_id), Some(delta)) = (&event.item_id, &event.delta) {
                let index = state.index_for(item_id);
                state.tool_calls.push(index, None, None, delta);
            }
            vec![]
        }

        "response.failed" => {
            let message = event
                .response
                .and_then(|r| r.error)
                .map_or_else(|| "response failed".to_owned(), |e| e.message);
            vec![StreamEvent::Error {
                error: format!("OpenAI Responses error: {message}"),
            }]
        }

        "response.completed" => {
            state.completed = true;
            if let Some(usage) = event.response.and_then(|r| r.usage) {
                let cached = usage
                    .input_tokens_details
                    .as_ref()
                    .map(|d| d.cached_tokens)
                    .filter(|&c| c > 0);
                state.usage = Some(TokenUsage {
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cache_creation_tokens: None,
                    cache_read_tokens: cached,
                });
            }
            vec![]
        }

        // response.created, response.in_progress, output_item.done, etc.
        _ => vec![],
    }
}

fn finalize(state: StreamState) -> Vec<StreamEvent> {
    if !state.completed {
        warn!("responses stream ended without response.completed");
    }
    let mut events = Vec::new();
    if !state.tool_calls.is_empty() {
        events.push(StreamEvent::ToolCalls {
            tool_calls: state.tool_calls.finish(),
        });
    }
    if let Some(usage) = state.usage {
        events.push(StreamEvent::Usage { usage });
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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(s: &str) -> ResponsesEvent {
        serde_json::from_str(s).unwrap()
    }

    // ── request conversion ───────────────────────────────────────────────

    #[test]
    fn system_becomes_instructions() {
        let req = ChatRequest {
            model: String::new(),
            messages: vec![Message::system("be brief"), Message::user("hi")],
            ..Default::default()
        };
        let body = build_request_body("m", &req);
        assert_eq!(body["instructions"], "be brief");
        assert_eq!(body["input"][0]["role"], "user");
    }

    #[test]
    fn tool_turn_maps_to_call_items() {
        let req = ChatRequest {
            model: String::new(),
            messages: vec![
                Message::Assistant {
                    content: "On it.".into(),
                    tool_calls: vec![ToolCall::new("tc-9", "terminal-execute", "{}")],
                    usage: None,
                },
                Message::tool_result("tc-9", "exit 0", false),
            ],
            ..Default::default()
        };
        let body = build_request_body("m", &req);
        assert_eq!(body["input"][0]["type"], "message");
        assert_eq!(body["input"][1]["type"], "function_call");
        assert_eq!(body["input"][1]["call_id"], "tc-9");
        assert_eq!(body["input"][2]["type"], "function_call_output");
        assert_eq!(body["input"][2]["output"], "exit 0");
    }

    #[test]
    fn max_tokens_maps_to_max_output_tokens() {
        let req = ChatRequest {
            max_tokens: Some(256),
            ..Default::default()
        };
        let body = build_request_body("m", &req);
        assert_eq!(body["max_output_tokens"], 256);
    }

    // ── event handling ───────────────────────────────────────────────────

    #[test]
    fn text_delta_event() {
        let mut state = StreamState::default();
        let events = process_event(
            parse(r#"{"type":"response.output_text.delta","delta":"hey"}"#),
            &mut state,
        );
        assert_eq!(events, vec![StreamEvent::ContentDelta { delta: "hey".into() }]);
    }

    #[test]
    fn function_call_lifecycle() {
        let mut state = StreamState::default();
        let _ = process_event(
            parse(
                r#"{"type":"response.output_item.added","item":{"type":"function_call","id":"item-1","call_id":"tc-1","name":"search-grep","arguments":""}}"#,
            ),
            &mut state,
        );
        let _ = process_event(
            parse(
                r#"{"type":"response.function_call_arguments.delta","item_id":"item-1","delta":"{\"pattern\":\"fn\"}"}"#,
            ),
            &mut state,
        );
        let events = finalize(state);
        let StreamEvent::ToolCalls { tool_calls } = &events[0] else {
            panic!("expected tool calls");
        };
        assert_eq!(tool_calls[0].id, "tc-1");
        assert_eq!(tool_calls[0].name, "search-grep");
        assert_eq!(tool_calls[0].arguments, r#"{"pattern":"fn"}"#);
    }

    #[test]
    fn completed_captures_usage() {
        let mut state = StreamState::default();
        let _ = process_event(
            parse(
                r#"{"type":"response.completed","response":{"usage":{"input_tokens":50,"output_tokens":9,"input_tokens_details":{"cached_tokens":40}}}}"#,
            ),
            &mut state,
        );
        assert!(state.completed);
        let events = finalize(state);
        assert!(matches!(
            &events[0],
            StreamEvent::Usage { usage }
                if usage.input_tokens == 50 && usage.cache_read_tokens == Some(40)
        ));
    }

    #[test]
    fn failed_maps_to_error_event() {
        let mut state = StreamState::default();
        let events = process_event(
            parse(r#"{"type":"response.failed","response":{"error":{"message":"quota"}}}"#),
            &mut state,
        );
        assert!(events[0].is_error());
    }

    #[test]
    fn unknown_events_ignored() {
        let mut state = StreamState::default();
        let events = process_event(parse(r#"{"type":"response.in_progress"}"#), &mut state);
        assert!(events.is_empty());
    }

    // ── end to end ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn streams_text_and_usage() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hello\"}\n\n",
            "data: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let provider = OpenAiResponsesProvider::new(OpenAiResponsesConfig {
            api_key: "k".into(),
            base_url: server.uri(),
            model: "gpt-r".into(),
        });
        let events: Vec<StreamEvent> = provider
            .stream(&ChatRequest::default())
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;

        assert_eq!(
            events[0],
            StreamEvent::ContentDelta { delta: "Hello".into() }
        );
        assert!(matches!(&events[1], StreamEvent::Usage { usage } if usage.input_tokens == 5));
        assert!(events[2].is_done());
    }
}
