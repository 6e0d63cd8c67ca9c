//! LLM provider abstraction.
//!
//! Each vendor implements the [`LlmProvider`] trait. The rest of the engine
//! consumes only canonical [`StreamChunk`] sequences and [`CompletedTurn`]
//! values — vendors are added by adding implementations, never by modifying
//! the orchestration loop.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rankpilot_core::conversation::{ConversationTurn, TokenUsage, ToolInvocation};

pub mod anthropic;
pub mod openai;
pub mod sse;

/// Supported LLM API protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelApi {
    AnthropicMessages,
    OpenAiCompletions,
}

/// Credentials for authenticating with an LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

/// Non-success response from a vendor API. Aborts the current round;
/// streaming output already emitted stays emitted.
#[derive(Debug, Clone, Error)]
#[error("upstream error {status}: {body}")]
pub struct UpstreamError {
    pub status: u16,
    pub body: String,
}

/// A request to the LLM. `messages` and `tools` are already in the vendor
/// shape produced by [`LlmProvider::format_history`] and
/// [`LlmProvider::format_tools`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<serde_json::Value>>,
    pub system: Option<String>,
}

/// Why the model stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolCall,
    Other,
}

/// Canonical streaming chunk — the sole contract between an adapter's
/// streaming path and the rest of the engine. Nothing downstream may depend
/// on vendor event shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    TextDelta {
        text: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        fragment: String,
    },
    ToolCallEnd {
        id: String,
    },
    /// Always the final chunk of a stream, exactly once — synthesized by the
    /// adapter if the transport ends without an explicit stop signal.
    TurnFinished {
        stop_reason: StopReason,
        usage: Option<TokenUsage>,
    },
}

/// Result of a non-streaming completion call.
#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

/// Canonical tool schema handed to `format_tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Model metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub api: ModelApi,
}

/// A finite, non-restartable sequence of canonical chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<StreamChunk>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "anthropic", "openai").
    fn id(&self) -> &str;

    /// API protocol used by this provider.
    fn api(&self) -> ModelApi;

    /// Map canonical tool schemas into the vendor's tool shape.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Map conversation turns into the vendor's message shape.
    fn format_history(&self, turns: &[ConversationTurn]) -> Vec<serde_json::Value>;

    /// Issue one non-streaming completion call.
    ///
    /// Fails with [`UpstreamError`] (carried through `anyhow`) on any
    /// non-success HTTP status.
    async fn complete(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<CompletedTurn>;

    /// Issue a streaming completion call and normalize the response body
    /// into canonical chunks. The sequence always ends with exactly one
    /// [`StreamChunk::TurnFinished`].
    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream>;

    /// List available models from this provider.
    async fn list_models(&self, credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>>;
}
