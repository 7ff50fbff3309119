//! Google Gemini adapter.
//!
//! Wire shape: `POST {base}/models/{model}:streamGenerateContent?alt=sse`
//! with the API key in the `x-goog-api-key` header. Chunks carry
//! `candidates[0].content.parts[]` — `text` parts or `functionCall` parts
//! with already-parsed `args` — plus cumulative `usageMetadata` on every
//! chunk (keep the last). There is no terminating sentinel, so the frame
//! buffer is flushed at EOF.
//!
//! Gemini assigns no tool-call IDs; they are synthesized per stream. Tool
//! results are sent back as `functionResponse` parts keyed by function
//! *name*, so the request converter resolves each `tool_call_id` to its
//! originating call's name.

use async_trait::async_trait;
use quill_core::events::StreamEvent;
use quill_core::messages::{Message, TokenUsage, ToolCall};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::pipeline::events_from_sse;
use crate::provider::{
    ChatRequest, EventStream, Provider, ProviderResult, response_to_api_error,
};

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Configuration for the Gemini adapter.
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    /// API key sent via `x-goog-api-key`.
    pub api_key: String,
    /// Base URL.
    pub base_url: String,
    /// Model ID.
    pub model: String,
}

impl GeminiConfig {
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

/// Google Gemini provider.
pub struct GeminiProvider {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a provider.
    #[must_use]
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, request: &ChatRequest) -> ProviderResult<EventStream> {
        let body = build_request_body(request);
        debug!(model = %self.config.model, "opening gemini stream");

        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url, self.config.model
        );
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_api_error(response).await);
        }

        Ok(events_from_sse(
            response,
            true,
            "google",
            StreamState::default(),
            process_chunk,
            finalize,
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request conversion
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve a tool result's call ID back to the originating call's name.
fn name_for_call<'a>(messages: &'a [Message], tool_call_id: &str) -> Option<&'a str> {
    messages.iter().rev().find_map(|m| {
        m.tool_calls()
            .iter()
            .find(|tc| tc.id == tool_call_id)
            .map(|tc| tc.name.as_str())
    })
}

/// Build the `generateContent` request body.
fn build_request_body(request: &ChatRequest) -> Value {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in &request.messages {
        match message {
            Message::System { content } => system_parts.push(json!({"text": content})),
            Message::User { content } => {
                contents.push(json!({"role": "user", "parts": [{"text": content}]}));
            }
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut parts: Vec<Value> = Vec::new();
                if !content.is_empty() {
                    parts.push(json!({"text": content}));
                }
                for tc in tool_calls {
                    let args: Value =
                        serde_json::from_str(&tc.arguments).unwrap_or_else(|_| json!({}));
                    parts.push(json!({"functionCall": {"name": tc.name, "args": args}}));
                }
                contents.push(json!({"role": "model", "parts": parts}));
            }
            Message::Tool {
                tool_call_id,
                content,
                ..
            } => {
                let name = name_for_call(&request.messages, tool_call_id).unwrap_or("unknown");
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": {"output": content},
                        }
                    }]
                }));
            }
        }
    }

    let mut body = json!({"contents": contents});
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({"parts": system_parts});
    }
    let mut generation = serde_json::Map::new();
    if let Some(t) = request.temperature {
        let _ = generation.insert("temperature".into(), json!(t));
    }
    if let Some(m) = request.max_tokens {
        let _ = generation.insert("maxOutputTokens".into(), json!(m));
    }
    if !generation.is_empty() {
        body["generationConfig"] = Value::Object(generation);
    }
    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request
            .tools
            .iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{"functionDeclarations": declarations}]);
    }
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream handling
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "functionCall", default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "cachedContentTokenCount", default)]
    cached_content_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// State accumulated across chunks within one stream.
#[derive(Default)]
struct StreamState {
    tool_calls: Vec<ToolCall>,
    usage: Option<TokenUsage>,
}

fn process_chunk(chunk: GeminiChunk, state: &mut StreamState) -> Vec<StreamEvent> {
    if let Some(err) = chunk.error {
        return vec![StreamEvent::Error {
            error: format!("Gemini API error ({}): {}", err.code, err.message),
        }];
    }

    // Usage is cumulative per chunk; the last report wins.
    if let Some(usage) = chunk.usage_metadata {
        state.usage = Some(TokenUsage {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            cache_creation_tokens: None,
            cache_read_tokens: if usage.cached_content_token_count > 0 {
                Some(usage.cached_content_token_count)
            } else {
                None
            },
        });
    }

    let mut events = Vec::new();
    for candidate in &chunk.candidates {
        let Some(content) = &candidate.content else {
            continue;
        };
        for part in &content.parts {
            if let Some(text) = &part.text {
                if !text.is_empty() {
                    events.push(StreamEvent::ContentDelta {
                        delta: text.clone(),
                    });
                }
            }
            if let Some(call) = &part.function_call {
                // Gemini sends complete calls, never fragments; assign a
                // stream-local ID.
                let id = format!("gemini_call_{}", state.tool_calls.len() + 1);
                state.tool_calls.push(ToolCall {
                    id,
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                });
            }
        }
    }
    events
}

fn finalize(state: StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !state.tool_calls.is_empty() {
        events.push(StreamEvent::ToolCalls {
            tool_calls: state.tool_calls,
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
