//! Agent runtime — orchestrates LLM interactions with tool-calling loops.
//!
//! The runtime takes a user message, streams the model's response, executes
//! tool calls round by round, and produces an ordered sequence of
//! [`AgentEvent`]s for the caller, terminated by exactly one `Done` or one
//! terminal `Error`.

use serde::{Deserialize, Serialize};

use rankpilot_core::conversation::{TokenUsage, ToolInvocation};

pub mod accumulator;
pub mod history;
pub mod memory;
pub mod prompt;
pub mod runtime;

pub use runtime::run_agent;

/// Events emitted by the agent runtime during a run. One per discrete state
/// change, never replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Streaming assistant text.
    #[serde(rename = "text_delta")]
    TextDelta { delta: String },

    /// The batch of tool invocations the model requested this round.
    #[serde(rename = "tool_calls")]
    ToolCalls { calls: Vec<ToolInvocation> },

    /// One tool call completed successfully.
    #[serde(rename = "tool_result")]
    ToolResult {
        call_id: String,
        tool: String,
        content: String,
    },

    /// One tool call failed; the round continues.
    #[serde(rename = "tool_error")]
    ToolError {
        call_id: String,
        tool: String,
        message: String,
    },

    /// Cumulative token usage for the run so far.
    #[serde(rename = "usage")]
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Terminal failure; no further events follow.
    #[serde(rename = "error")]
    Error { message: String },

    /// Successful completion; no further events follow.
    #[serde(rename = "done")]
    Done { usage: TokenUsage },
}

/// Result of a completed agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub text: String,
    pub rounds: u32,
    pub tool_calls: u32,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub aborted: bool,
    pub error: Option<RunError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Non-success vendor response.
    Upstream,
    /// Any other provider/transport failure.
    Provider,
}
