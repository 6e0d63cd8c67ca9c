//! History normalization — flatten past tool exchanges and trim turn count.
//!
//! Vendor-issued tool-call ids from a prior session or provider are
//! meaningless to a different vendor, and one vendor rejects requests
//! carrying reference ids it does not recognize. Flattening rewrites every
//! prior tool exchange into plain narrative text before the history reaches
//! any wire adapter, so a provider switch never produces invalid
//! cross-vendor references.

use rankpilot_core::conversation::{ConversationTurn, ToolInvocation, ToolResult};

/// Per-result text cap inside a flattened summary.
pub const RESULT_PREVIEW_CHARS: usize = 400;

/// Normalize loaded history: flatten tool exchanges, then trim to at most
/// `max_turns` turns with the boundary snapped forward to a user turn.
///
/// Running this on already-normalized history is a no-op.
pub fn normalize_history(
    turns: Vec<ConversationTurn>,
    max_turns: usize,
) -> Vec<ConversationTurn> {
    trim(flatten(turns), max_turns)
}

fn flatten(turns: Vec<ConversationTurn>) -> Vec<ConversationTurn> {
    let mut out = Vec::with_capacity(turns.len());
    let mut iter = turns.into_iter().peekable();

    while let Some(turn) = iter.next() {
        match turn {
            ConversationTurn::Assistant {
                id,
                content,
                tool_calls,
                usage,
                timestamp,
            } if !tool_calls.is_empty() => {
                // Consume the paired results turn, if the round completed
                let results = if matches!(iter.peek(), Some(ConversationTurn::ToolResults { .. }))
                {
                    match iter.next() {
                        Some(ConversationTurn::ToolResults { results, .. }) => results,
                        _ => Vec::new(),
                    }
                } else {
                    Vec::new()
                };

                out.push(ConversationTurn::Assistant {
                    id,
                    content: render_exchange(&content, &tool_calls, &results),
                    tool_calls: Vec::new(),
                    usage,
                    timestamp,
                });
            }
            // An orphan results turn still carries information; keep the
            // content, lose the ids.
            ConversationTurn::ToolResults {
                id,
                results,
                timestamp,
            } => {
                let lines: Vec<String> = results
                    .iter()
                    .map(|r| render_result(&r.tool, r))
                    .collect();
                out.push(ConversationTurn::Assistant {
                    id,
                    content: lines.join("\n"),
                    tool_calls: Vec::new(),
                    usage: None,
                    timestamp,
                });
            }
            other => out.push(other),
        }
    }

    out
}

fn render_exchange(
    content: &str,
    tool_calls: &[ToolInvocation],
    results: &[ToolResult],
) -> String {
    let mut parts = Vec::new();
    if !content.is_empty() {
        parts.push(content.to_string());
    }

    for call in tool_calls {
        match results.iter().find(|r| r.call_id == call.id) {
            Some(result) => parts.push(render_result(&call.name, result)),
            None => parts.push(format!("Tool call ({}): no result recorded", call.name)),
        }
    }
    // Results answering no recorded call still get rendered
    for result in results {
        if !tool_calls.iter().any(|c| c.id == result.call_id) {
            parts.push(render_result(&result.tool, result));
        }
    }

    parts.join("\n")
}

fn render_result(tool: &str, result: &ToolResult) -> String {
    let status = if result.is_error { "error" } else { "ok" };
    format!("Tool result ({tool}, {status}): {}", preview(&result.content))
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(RESULT_PREVIEW_CHARS) {
        Some((byte_pos, _)) => format!("{}...", &text[..byte_pos]),
        None => text.to_string(),
    }
}

fn trim(mut turns: Vec<ConversationTurn>, max_turns: usize) -> Vec<ConversationTurn> {
    if turns.len() <= max_turns {
        return turns;
    }
    let candidate = turns.len() - max_turns;
    // Snap the boundary forward to the next user turn so a round never
    // starts mid exchange; with no user turn in the window, keep the
    // unsnapped boundary rather than dropping everything.
    let start = turns[candidate..]
        .iter()
        .position(ConversationTurn::is_user)
        .map(|offset| candidate + offset)
        .unwrap_or(candidate);
    turns.split_off(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_exchange() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("find declining keywords"),
            ConversationTurn::assistant(
                "Let me check.",
                vec![ToolInvocation {
                    id: "toolu_abc".into(),
                    name: "gsc_query".into(),
                    arguments: json!({"type": "declining"}),
                }],
                None,
            ),
            ConversationTurn::tool_results(vec![ToolResult {
                call_id: "toolu_abc".into(),
                tool: "gsc_query".into(),
                content: "keyword | clicks\nrunning shoes | 120".into(),
                is_error: false,
            }]),
            ConversationTurn::assistant("Two keywords are declining.", Vec::new(), None),
        ]
    }

    #[test]
    fn flattening_removes_all_tool_structures() {
        let normalized = normalize_history(tool_exchange(), 40);

        assert_eq!(normalized.len(), 3);
        assert!(normalized.iter().all(|t| !t.has_tool_calls()));
        assert!(
            !normalized
                .iter()
                .any(|t| matches!(t, ConversationTurn::ToolResults { .. }))
        );

        // The flattened turn keeps the original text and the result content
        let ConversationTurn::Assistant { content, .. } = &normalized[1] else {
            panic!("expected assistant turn");
        };
        assert!(content.contains("Let me check."));
        assert!(content.contains("Tool result (gsc_query, ok)"));
        assert!(content.contains("running shoes"));
        assert!(!content.contains("toolu_abc"));
    }

    #[test]
    fn turn_count_is_monotonically_non_increasing() {
        let turns = tool_exchange();
        let before = turns.len();
        let normalized = normalize_history(turns, 40);
        assert!(normalized.len() <= before);
    }

    #[test]
    fn flattening_flattened_history_is_a_noop() {
        let once = normalize_history(tool_exchange(), 40);
        let twice = normalize_history(once.clone(), 40);
        assert_eq!(once, twice);
    }

    #[test]
    fn long_results_are_previewed() {
        let big = "x".repeat(2 * RESULT_PREVIEW_CHARS);
        let turns = vec![
            ConversationTurn::assistant(
                "",
                vec![ToolInvocation {
                    id: "c1".into(),
                    name: "crawl_page".into(),
                    arguments: json!({}),
                }],
                None,
            ),
            ConversationTurn::tool_results(vec![ToolResult {
                call_id: "c1".into(),
                tool: "crawl_page".into(),
                content: big,
                is_error: false,
            }]),
        ];

        let normalized = normalize_history(turns, 40);
        let ConversationTurn::Assistant { content, .. } = &normalized[0] else {
            panic!("expected assistant turn");
        };
        assert!(content.len() < RESULT_PREVIEW_CHARS + 100);
        assert!(content.ends_with("..."));
    }

    #[test]
    fn orphan_results_are_rewritten_without_ids() {
        let turns = vec![ConversationTurn::tool_results(vec![ToolResult {
            call_id: "toolu_lost".into(),
            tool: "gsc_query".into(),
            content: "table".into(),
            is_error: true,
        }])];

        let normalized = normalize_history(turns, 40);
        let ConversationTurn::Assistant { content, .. } = &normalized[0] else {
            panic!("expected assistant turn");
        };
        assert!(content.contains("Tool result (gsc_query, error)"));
        assert!(!content.contains("toolu_lost"));
    }

    #[test]
    fn trim_snaps_forward_to_a_user_turn() {
        let mut turns = Vec::new();
        for i in 0..10 {
            turns.push(ConversationTurn::user(format!("question {i}")));
            turns.push(ConversationTurn::assistant(format!("answer {i}"), Vec::new(), None));
        }

        // 20 turns trimmed to 5: candidate boundary lands on an assistant
        // turn, so the window shrinks to start at the next user turn.
        let trimmed = normalize_history(turns, 5);
        assert_eq!(trimmed.len(), 4);
        assert!(trimmed[0].is_user());
        let ConversationTurn::User { content, .. } = &trimmed[0] else {
            panic!("expected user turn");
        };
        assert_eq!(content, "question 8");
    }

    #[test]
    fn trim_without_user_turn_keeps_unsnapped_boundary() {
        let turns: Vec<ConversationTurn> = (0..6)
            .map(|i| ConversationTurn::assistant(format!("note {i}"), Vec::new(), None))
            .collect();

        let trimmed = normalize_history(turns, 3);
        assert_eq!(trimmed.len(), 3);
    }

    #[test]
    fn short_history_is_untouched() {
        let turns = vec![
            ConversationTurn::user("hi"),
            ConversationTurn::assistant("hello", Vec::new(), None),
        ];
        let normalized = normalize_history(turns.clone(), 40);
        assert_eq!(normalized, turns);
    }
}
