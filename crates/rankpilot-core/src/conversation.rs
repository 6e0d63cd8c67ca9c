//! Conversation model — turns, tool invocations, and tool results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single tool invocation requested by the model.
///
/// The `id` is the vendor-issued call identifier and is opaque to the core.
/// Invocations are immutable once finalized by the accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The outcome of executing one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub content: String,
    pub is_error: bool,
}

/// Token counts reported by a provider for one or more turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Fold another usage report into this one, keeping the larger of each
    /// counter. Providers report usage cumulatively within a turn.
    pub fn absorb(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
    }

    /// Sum two usage reports across turns.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One turn in the stored conversation, serialized one-per-line in the
/// JSONL transcript file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConversationTurn {
    #[serde(rename = "user")]
    User {
        id: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "assistant")]
    Assistant {
        id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "tool_results")]
    ToolResults {
        id: String,
        results: Vec<ToolResult>,
        timestamp: DateTime<Utc>,
    },
}

fn new_turn_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            id: new_turn_id(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        tool_calls: Vec<ToolInvocation>,
        usage: Option<TokenUsage>,
    ) -> Self {
        Self::Assistant {
            id: new_turn_id(),
            content: content.into(),
            tool_calls,
            usage,
            timestamp: Utc::now(),
        }
    }

    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::ToolResults {
            id: new_turn_id(),
            results,
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User { id, .. } | Self::Assistant { id, .. } | Self::ToolResults { id, .. } => id,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    /// True for assistant turns that still carry structured tool calls,
    /// i.e. turns the history normalizer has not flattened yet.
    pub fn has_tool_calls(&self) -> bool {
        matches!(self, Self::Assistant { tool_calls, .. } if !tool_calls.is_empty())
    }
}
