//! Anthropic Messages API adapter.
//!
//! Speaks the `/v1/messages` wire format, batch and streaming. Tool calls
//! arrive as id-keyed content blocks; tool results go back as a single
//! multi-part user message.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use rankpilot_core::conversation::{ConversationTurn, TokenUsage, ToolInvocation};

use crate::sse::{SseEvent, parse_sse_stream};
use crate::{
    ChunkStream, CompletedTurn, CompletionRequest, Credentials, LlmProvider, ModelApi, ModelInfo,
    StopReason, StreamChunk, ToolDefinition, UpstreamError,
};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(ANTHROPIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            stream,
            messages: request.messages.clone(),
            // System prompt is a top-level field on this vendor
            system: request.system.clone(),
            temperature: request.temperature,
            tools: request.tools.clone(),
        }
    }

    async fn post_messages(
        &self,
        body: &AnthropicRequest,
        api_key: &str,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("content-type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError { status, body }.into());
        }
        Ok(response)
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" | "stop_sequence" => StopReason::Stop,
        "max_tokens" => StopReason::Length,
        "tool_use" => StopReason::ToolCall,
        _ => StopReason::Other,
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    stream: bool,
    messages: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartBody,
}

#[derive(Debug, Deserialize)]
struct MessageStartBody {
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    index: usize,
    content_block: ContentBlock,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text {},
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    index: usize,
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum BlockDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStop {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaBody,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseError {
    error: SseErrorBody,
}

#[derive(Debug, Deserialize)]
struct SseErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessage {
    #[serde(default)]
    content: Vec<MessageContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum MessageContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

// --- Stream normalization ---

struct NormalizerState<S> {
    events: Pin<Box<S>>,
    pending: VecDeque<anyhow::Result<StreamChunk>>,
    /// Block index -> tool-call id, for blocks that are tool_use.
    open_tools: HashMap<usize, String>,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
    saw_usage: bool,
    finished: bool,
}

impl<S> NormalizerState<S> {
    fn handle_event(&mut self, event: SseEvent) {
        let event_type = event.event.as_deref().unwrap_or_default();
        let data = event.data.as_str();

        match event_type {
            "message_start" => {
                let Some(start) = parse_frame::<MessageStart>(event_type, data) else {
                    return;
                };
                if let Some(usage) = start.message.usage {
                    self.record_usage(&usage);
                }
            }
            "content_block_start" => {
                let Some(start) = parse_frame::<ContentBlockStart>(event_type, data) else {
                    return;
                };
                if let ContentBlock::ToolUse { id, name } = start.content_block {
                    self.open_tools.insert(start.index, id.clone());
                    self.pending
                        .push_back(Ok(StreamChunk::ToolCallStart { id, name }));
                }
            }
            "content_block_delta" => {
                let Some(delta) = parse_frame::<ContentBlockDelta>(event_type, data) else {
                    return;
                };
                match delta.delta {
                    BlockDelta::TextDelta { text } => {
                        if !text.is_empty() {
                            self.pending.push_back(Ok(StreamChunk::TextDelta { text }));
                        }
                    }
                    BlockDelta::InputJsonDelta { partial_json } => {
                        let Some(id) = self.open_tools.get(&delta.index) else {
                            trace!(index = delta.index, "Argument fragment for unknown block");
                            return;
                        };
                        if !partial_json.is_empty() {
                            self.pending.push_back(Ok(StreamChunk::ToolCallDelta {
                                id: id.clone(),
                                fragment: partial_json,
                            }));
                        }
                    }
                    BlockDelta::Other => {}
                }
            }
            "content_block_stop" => {
                let Some(stop) = parse_frame::<ContentBlockStop>(event_type, data) else {
                    return;
                };
                if let Some(id) = self.open_tools.remove(&stop.index) {
                    self.pending.push_back(Ok(StreamChunk::ToolCallEnd { id }));
                }
            }
            "message_delta" => {
                let Some(delta) = parse_frame::<MessageDelta>(event_type, data) else {
                    return;
                };
                if let Some(reason) = delta.delta.stop_reason.as_deref() {
                    self.stop_reason = Some(map_stop_reason(reason));
                }
                if let Some(usage) = delta.usage {
                    self.record_usage(&usage);
                }
            }
            // Explicit terminal event on this vendor
            "message_stop" => self.finish(),
            "error" => {
                let message = parse_frame::<SseError>(event_type, data)
                    .map(|e| e.error.message)
                    .unwrap_or_else(|| data.to_string());
                self.pending
                    .push_back(Err(anyhow::anyhow!("Anthropic stream error: {message}")));
                self.finish();
            }
            // ping and future event types
            _ => {}
        }
    }

    fn record_usage(&mut self, usage: &AnthropicUsage) {
        self.saw_usage = true;
        self.usage.absorb(&TokenUsage {
            input_tokens: usage.input_tokens.unwrap_or_default(),
            output_tokens: usage.output_tokens.unwrap_or_default(),
        });
    }

    /// Close any still-open tool blocks and emit the single turn-finished
    /// chunk. Also the synthesis path when the transport ends without a
    /// `message_stop` event.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut open: Vec<(usize, String)> = self.open_tools.drain().collect();
        open.sort();
        for (_, id) in open {
            self.pending.push_back(Ok(StreamChunk::ToolCallEnd { id }));
        }
        self.pending.push_back(Ok(StreamChunk::TurnFinished {
            stop_reason: self.stop_reason.unwrap_or(StopReason::Other),
            usage: self.saw_usage.then_some(self.usage),
        }));
    }
}

/// Structural parse of one frame; malformed payloads are skipped, not fatal.
fn parse_frame<T: serde::de::DeserializeOwned>(event_type: &str, data: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(frame) => Some(frame),
        Err(e) => {
            trace!(%e, event_type, data, "Skipping malformed frame");
            None
        }
    }
}

/// Normalize this vendor's SSE event protocol into canonical chunks.
///
/// Pure over the event stream, so it is testable without a transport. The
/// output always ends with exactly one `TurnFinished`.
pub(crate) fn normalize_chunks<S>(events: S) -> impl Stream<Item = anyhow::Result<StreamChunk>>
where
    S: Stream<Item = anyhow::Result<SseEvent>> + Send + 'static,
{
    futures::stream::unfold(
        NormalizerState {
            events: Box::pin(events),
            pending: VecDeque::new(),
            open_tools: HashMap::new(),
            stop_reason: None,
            usage: TokenUsage::default(),
            saw_usage: false,
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.events.next().await {
                    Some(Ok(event)) => state.handle_event(event),
                    Some(Err(e)) => {
                        state.pending.push_back(Err(e));
                        state.finish();
                    }
                    None => state.finish(),
                }
            }
        },
    )
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn api(&self) -> ModelApi {
        ModelApi::AnthropicMessages
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters_schema,
                })
            })
            .collect()
    }

    fn format_history(&self, turns: &[ConversationTurn]) -> Vec<serde_json::Value> {
        let mut messages: Vec<serde_json::Value> = Vec::new();

        for turn in turns {
            match turn {
                ConversationTurn::User { content, .. } => {
                    messages.push(json!({
                        "role": "user",
                        "content": [{ "type": "text", "text": content }],
                    }));
                }
                ConversationTurn::Assistant {
                    content,
                    tool_calls,
                    ..
                } => {
                    let mut blocks: Vec<serde_json::Value> = Vec::new();
                    if !content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": content }));
                    }
                    for call in tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    if !blocks.is_empty() {
                        messages.push(json!({ "role": "assistant", "content": blocks }));
                    }
                }
                // One multi-part user message for the whole batch on this vendor
                ConversationTurn::ToolResults { results, .. } => {
                    let blocks: Vec<serde_json::Value> = results
                        .iter()
                        .map(|r| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": r.call_id,
                                "content": r.content,
                                "is_error": r.is_error,
                            })
                        })
                        .collect();
                    messages.push(json!({ "role": "user", "content": blocks }));
                }
            }
        }

        messages
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<CompletedTurn> {
        let body = self.request_body(request, false);
        debug!(model = %body.model, base_url = %self.base_url, "Completing via Anthropic API");

        let response = self.post_messages(&body, &credentials.api_key).await?;
        let message: AnthropicMessage = response.json().await?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in message.content {
            match block {
                MessageContent::Text { text: t } => text.push_str(&t),
                MessageContent::ToolUse { id, name, input } => tool_calls.push(ToolInvocation {
                    id,
                    name,
                    arguments: input,
                }),
                MessageContent::Other => {}
            }
        }

        let usage = message
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens.unwrap_or_default(),
                output_tokens: u.output_tokens.unwrap_or_default(),
            })
            .unwrap_or_default();

        Ok(CompletedTurn {
            text,
            tool_calls,
            stop_reason: message
                .stop_reason
                .as_deref()
                .map(map_stop_reason)
                .unwrap_or(StopReason::Other),
            usage,
        })
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream> {
        let body = self.request_body(request, true);
        debug!(model = %body.model, base_url = %self.base_url, "Streaming via Anthropic API");

        let response = self.post_messages(&body, &credentials.api_key).await?;
        Ok(Box::pin(normalize_chunks(parse_sse_stream(response))))
    }

    async fn list_models(&self, credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", &credentials.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError { status, body }.into());
        }

        let body: ModelsResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.display_name.unwrap_or_else(|| m.id.clone()),
                id: m.id,
                api: ModelApi::AnthropicMessages,
            })
            .collect())
    }
}
