//! OpenAI Chat Completions API adapter.
//!
//! Speaks the `/v1/chat/completions` wire format, batch and streaming. The
//! streaming path normalizes position-indexed tool-call deltas into
//! id-keyed canonical chunks before anything downstream sees them.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

use rankpilot_core::conversation::{ConversationTurn, TokenUsage, ToolInvocation};

use crate::sse::{SseEvent, parse_sse_stream};
use crate::{
    ChunkStream, CompletedTurn, CompletionRequest, Credentials, LlmProvider, ModelApi, ModelInfo,
    StopReason, StreamChunk, ToolDefinition, UpstreamError,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> OpenAiRequest {
        // System prompt travels as a leading message on this vendor
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().cloned());

        OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            stream,
            temperature: request.temperature,
            tools: request.tools.clone(),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn post_completions(&self, body: &OpenAiRequest, api_key: &str) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {api_key}"))
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

/// This vendor constrains tool-call identifiers to `[A-Za-z0-9_-]`.
/// Non-conforming characters are substituted deterministically so the same
/// history always produces the same id, and absent ids are synthesized from
/// the call's position within the response.
pub(crate) fn sanitize_call_id(raw: &str, position: usize) -> String {
    if raw.is_empty() {
        return format!("call_{position}");
    }
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn map_finish_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::Stop,
        "length" => StopReason::Length,
        "tool_calls" => StopReason::ToolCall,
        _ => StopReason::Other,
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

// --- Stream normalization ---

/// One tool call the normalizer has opened, tracked by response position.
struct OpenCall {
    id: String,
    ended: bool,
}

struct NormalizerState<S> {
    events: Pin<Box<S>>,
    pending: VecDeque<anyhow::Result<StreamChunk>>,
    open_calls: Vec<Option<OpenCall>>,
    stop_reason: Option<StopReason>,
    usage: Option<TokenUsage>,
    finished: bool,
}

impl<S> NormalizerState<S> {
    fn handle_event(&mut self, event: SseEvent) {
        let data = event.data.trim();

        // This vendor terminates with a literal end-of-stream marker
        if data == "[DONE]" {
            self.finish();
            return;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                trace!(%e, data, "Skipping malformed chunk");
                return;
            }
        };

        // Usage arrives in a trailing chunk with empty choices; it rides out
        // on the turn-finished chunk rather than being emitted on its own.
        if let Some(usage) = chunk.usage {
            self.usage = Some(TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                self.handle_tool_call_delta(tc);
            }
        }

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                self.pending
                    .push_back(Ok(StreamChunk::TextDelta { text: content }));
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.stop_reason = Some(map_finish_reason(reason));
        }
    }

    fn handle_tool_call_delta(&mut self, tc: ToolCallDelta) {
        if self.open_calls.len() <= tc.index {
            self.open_calls.resize_with(tc.index + 1, || None);
        }

        if self.open_calls[tc.index].is_none() {
            // First delta for this position carries the id (usually) and name
            let id = sanitize_call_id(tc.id.as_deref().unwrap_or_default(), tc.index);
            let name = tc
                .function
                .as_ref()
                .and_then(|f| f.name.clone())
                .unwrap_or_default();
            self.pending.push_back(Ok(StreamChunk::ToolCallStart {
                id: id.clone(),
                name,
            }));
            self.open_calls[tc.index] = Some(OpenCall { id, ended: false });
        }

        let Some(call) = self.open_calls[tc.index].as_ref() else {
            return;
        };
        if let Some(args) = tc.function.and_then(|f| f.arguments) {
            if !args.is_empty() {
                self.pending.push_back(Ok(StreamChunk::ToolCallDelta {
                    id: call.id.clone(),
                    fragment: args,
                }));
            }
        }
    }

    /// Close every open call and emit the single turn-finished chunk. Also
    /// the synthesis path when the transport ends without `[DONE]`.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        for call in self.open_calls.iter_mut().flatten() {
            if !call.ended {
                call.ended = true;
                self.pending.push_back(Ok(StreamChunk::ToolCallEnd {
                    id: call.id.clone(),
                }));
            }
        }
        self.pending.push_back(Ok(StreamChunk::TurnFinished {
            stop_reason: self.stop_reason.unwrap_or(StopReason::Other),
            usage: self.usage,
        }));
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
            open_calls: Vec::new(),
            stop_reason: None,
            usage: None,
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
                        // Surface the transport error, then still close the
                        // sequence so the loop is never left waiting.
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
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn api(&self) -> ModelApi {
        ModelApi::OpenAiCompletions
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    fn format_history(&self, turns: &[ConversationTurn]) -> Vec<serde_json::Value> {
        let mut messages: Vec<serde_json::Value> = Vec::new();

        for turn in turns {
            match turn {
                ConversationTurn::User { content, .. } => {
                    messages.push(json!({ "role": "user", "content": content }));
                }
                ConversationTurn::Assistant {
                    content,
                    tool_calls,
                    ..
                } => {
                    let mut msg = json!({ "role": "assistant" });
                    if !content.is_empty() {
                        msg["content"] = json!(content);
                    }
                    if !tool_calls.is_empty() {
                        let calls: Vec<serde_json::Value> = tool_calls
                            .iter()
                            .enumerate()
                            .map(|(i, call)| {
                                json!({
                                    "id": sanitize_call_id(&call.id, i),
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": call.arguments.to_string(),
                                    }
                                })
                            })
                            .collect();
                        msg["tool_calls"] = json!(calls);
                    }
                    if msg.get("content").is_some() || msg.get("tool_calls").is_some() {
                        messages.push(msg);
                    }
                }
                // One tool-role message per result on this vendor
                ConversationTurn::ToolResults { results, .. } => {
                    for (i, result) in results.iter().enumerate() {
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": sanitize_call_id(&result.call_id, i),
                            "content": result.content,
                        }));
                    }
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
        debug!(model = %body.model, base_url = %self.base_url, "Completing via OpenAI API");

        let response = self.post_completions(&body, &credentials.api_key).await?;
        let parsed: ChatCompletionResponse = response.json().await?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let Some(choice) = parsed.choices.into_iter().next() else {
            anyhow::bail!("OpenAI response contained no choices");
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, tc)| {
                let arguments = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
                    warn!(%e, tool = %tc.function.name, "Unparseable tool arguments, degrading to empty object");
                    json!({})
                });
                ToolInvocation {
                    id: sanitize_call_id(tc.id.as_deref().unwrap_or_default(), i),
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(CompletedTurn {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            stop_reason: choice
                .finish_reason
                .as_deref()
                .map(map_finish_reason)
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
        debug!(model = %body.model, base_url = %self.base_url, "Streaming via OpenAI API");

        let response = self.post_completions(&body, &credentials.api_key).await?;
        Ok(Box::pin(normalize_chunks(parse_sse_stream(response))))
    }

    async fn list_models(&self, credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("authorization", format!("Bearer {}", credentials.api_key))
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
                name: m.id.clone(),
                id: m.id,
                api: ModelApi::OpenAiCompletions,
            })
            .collect())
    }
}
