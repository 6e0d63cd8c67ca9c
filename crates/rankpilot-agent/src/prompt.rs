//! System prompt builder for the agent.

use rankpilot_core::config::Config;
use rankpilot_tools::ToolRegistry;

const DEFAULT_IDENTITY: &str = "You are RankPilot, an SEO assistant. You analyze search \
     performance, inspect pages, and draft content improvements using the tools available \
     to you. Prefer tool data over guesses and keep answers concise.";

/// Build the system prompt for a run.
pub fn build_system_prompt(config: &Config, tools: &ToolRegistry) -> String {
    let mut parts = Vec::new();

    parts.push(config.system_prompt().unwrap_or(DEFAULT_IDENTITY).to_string());

    let now = chrono::Utc::now();
    parts.push(format!(
        "Current time: {}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    let tool_names = tools.list();
    if !tool_names.is_empty() {
        parts.push(format!("Available tools: {}", tool_names.join(", ")));
    }

    parts.join("\n\n")
}
