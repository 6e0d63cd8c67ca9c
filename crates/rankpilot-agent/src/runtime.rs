//! Agent runtime loop — orchestrates LLM streaming + tool calling.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rankpilot_core::config::Config;
use rankpilot_core::conversation::{ConversationTurn, TokenUsage, ToolInvocation, ToolResult};
use rankpilot_providers::{
    CompletionRequest, Credentials, LlmProvider, StopReason, StreamChunk, ToolDefinition,
    UpstreamError,
};
use rankpilot_tools::{ToolContext, ToolOutput, ToolRegistry};

use crate::accumulator::ToolCallAccumulator;
use crate::prompt::build_system_prompt;
use crate::{AgentEvent, RunError, RunErrorKind, RunOutcome};

/// Character budget for one stored tool result.
pub const TOOL_RESULT_CHAR_BUDGET: usize = 8_000;

/// Marker appended to results cut at the budget.
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

const LENGTH_WARNING: &str = "\n\n[response truncated: maximum output length reached]";

/// Cap a tool result at the character budget. The prefix is identical to the
/// original up to the budget; the marker makes the cut visible to the model.
pub fn truncate_result(content: &str, budget: usize) -> String {
    match content.char_indices().nth(budget) {
        Some((byte_pos, _)) => {
            let mut truncated = content[..byte_pos].to_string();
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        }
        None => content.to_string(),
    }
}

/// Run the agent loop: stream the model, execute tools, append results,
/// repeat until the model stops requesting tools or the round cap is hit.
///
/// `turns` is rewritten in place: history is normalized up front, then the
/// user turn and every turn the run produces are appended. Events flow out
/// through `event_tx`, terminated by exactly one `Done` or one terminal
/// `Error`.
#[allow(clippy::too_many_arguments)]
pub async fn run_agent(
    turns: &mut Vec<ConversationTurn>,
    conversation_id: &str,
    message: &str,
    config: &Arc<Config>,
    tools: &ToolRegistry,
    provider: &Arc<dyn LlmProvider>,
    credentials: &Credentials,
    event_tx: mpsc::UnboundedSender<AgentEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<RunOutcome> {
    let start = Instant::now();
    let max_rounds = config.max_rounds();

    // Normalize before the first round so vendor-scoped call ids from a
    // prior session or provider never reach the wire adapter.
    let loaded = std::mem::take(turns);
    *turns = crate::history::normalize_history(loaded, config.max_history_turns());

    let system_prompt = build_system_prompt(config, tools);
    turns.push(ConversationTurn::user(message));

    let tool_defs = if tools.is_empty() {
        None
    } else {
        let definitions: Vec<ToolDefinition> = tools
            .tools()
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters_schema(),
            })
            .collect();
        Some(provider.format_tools(&definitions))
    };

    let mut total_usage = TokenUsage::default();
    let mut tool_call_count: u32 = 0;
    let mut rounds: u32 = 0;
    let mut final_text = String::new();
    let mut aborted = false;
    let mut run_error: Option<RunError> = None;

    'rounds: for round in 0..max_rounds {
        rounds = round + 1;
        debug!(round, "Agent loop round");

        let request = CompletionRequest {
            model: config.default_model(),
            messages: provider.format_history(turns),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            tools: tool_defs.clone(),
            system: Some(system_prompt.clone()),
        };

        let stream = match provider.stream(&request, credentials).await {
            Ok(s) => s,
            Err(e) => {
                error!(%e, "Provider stream error");
                let kind = if e.downcast_ref::<UpstreamError>().is_some() {
                    RunErrorKind::Upstream
                } else {
                    RunErrorKind::Provider
                };
                let _ = event_tx.send(AgentEvent::Error {
                    message: e.to_string(),
                });
                run_error = Some(RunError {
                    kind,
                    message: e.to_string(),
                });
                break 'rounds;
            }
        };

        let mut stream = std::pin::pin!(stream);
        let mut acc = ToolCallAccumulator::new();
        let mut round_text = String::new();
        let mut round_usage: Option<TokenUsage> = None;
        let mut stop_reason: Option<StopReason> = None;

        loop {
            let chunk_result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Run cancelled mid-stream");
                    aborted = true;
                    break;
                }
                chunk = stream.next() => match chunk {
                    Some(c) => c,
                    None => break,
                },
            };

            match chunk_result {
                Ok(StreamChunk::TextDelta { text }) => {
                    round_text.push_str(&text);
                    let _ = event_tx.send(AgentEvent::TextDelta { delta: text });
                }
                Ok(StreamChunk::ToolCallStart { id, name }) => acc.start(&id, &name),
                Ok(StreamChunk::ToolCallDelta { id, fragment }) => acc.append(&id, &fragment),
                Ok(StreamChunk::ToolCallEnd { id }) => acc.finish(&id),
                Ok(StreamChunk::TurnFinished {
                    stop_reason: reason,
                    usage,
                }) => {
                    if let Some(usage) = usage {
                        total_usage.accumulate(&usage);
                        round_usage = Some(usage);
                    }
                    stop_reason = Some(reason);
                }
                Err(e) => {
                    error!(%e, "Stream chunk error");
                    let _ = event_tx.send(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    run_error = Some(RunError {
                        kind: RunErrorKind::Provider,
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }

        // Still-open calls are finalized, never silently dropped
        let calls = acc.finish_all();

        // Text and calls already produced stay in the transcript even when
        // the stream ended badly — emitted output is never rolled back.
        turns.push(ConversationTurn::assistant(
            round_text.clone(),
            calls.clone(),
            round_usage,
        ));

        if run_error.is_some() {
            // The terminal error event is already out; nothing may follow it
            break 'rounds;
        }

        let _ = event_tx.send(AgentEvent::Usage {
            input_tokens: total_usage.input_tokens,
            output_tokens: total_usage.output_tokens,
        });

        if calls.is_empty() {
            if round == 0 && round_text.is_empty() {
                // Model produced nothing at all: a quirk worth logging, but
                // not an error
                warn!("Model returned an empty first-round response");
            }
            final_text = round_text;
            if stop_reason == Some(StopReason::Length) {
                final_text.push_str(LENGTH_WARNING);
                let _ = event_tx.send(AgentEvent::TextDelta {
                    delta: LENGTH_WARNING.to_string(),
                });
            }
            break 'rounds;
        }

        if aborted {
            break 'rounds;
        }

        tool_call_count += calls.len() as u32;
        let _ = event_tx.send(AgentEvent::ToolCalls {
            calls: calls.clone(),
        });

        // Strictly sequential, in call order: deterministic output and no
        // concurrent side effects on the same resources.
        let mut results: Vec<ToolResult> = Vec::new();
        for call in &calls {
            let output = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Run cancelled during tool execution");
                    aborted = true;
                    break;
                }
                output = execute_tool(call, conversation_id, config, tools) => output,
            };

            let content = truncate_result(&output.content, TOOL_RESULT_CHAR_BUDGET);
            if output.is_error {
                let _ = event_tx.send(AgentEvent::ToolError {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    message: content.clone(),
                });
            } else {
                let _ = event_tx.send(AgentEvent::ToolResult {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    content: content.clone(),
                });
            }
            results.push(ToolResult {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                content,
                is_error: output.is_error,
            });
        }

        // Completed results are preserved even when the run was cancelled
        if !results.is_empty() {
            turns.push(ConversationTurn::tool_results(results));
        }

        if aborted {
            break 'rounds;
        }
        if rounds == max_rounds {
            info!(max_rounds, "Round cap reached, finalizing with last content");
            final_text = round_text;
        }
    }

    if run_error.is_none() {
        let _ = event_tx.send(AgentEvent::Done { usage: total_usage });

        // Best-effort memory notes; failure never affects the emitted result
        if let Some(dir) = config.memory_dir() {
            crate::memory::spawn_note_extraction(
                Arc::clone(provider),
                credentials.clone(),
                config.default_model(),
                dir,
                conversation_id.to_string(),
                message.to_string(),
                final_text.clone(),
            );
        }
    }

    Ok(RunOutcome {
        text: final_text,
        rounds,
        tool_calls: tool_call_count,
        usage: total_usage,
        duration_ms: start.elapsed().as_millis() as u64,
        aborted,
        error: run_error,
    })
}

/// Execute one tool invocation. Unknown tools and execution failures both
/// become error-flagged results; only this invocation fails, siblings still
/// execute.
async fn execute_tool(
    call: &ToolInvocation,
    conversation_id: &str,
    config: &Arc<Config>,
    tools: &ToolRegistry,
) -> ToolOutput {
    let context = ToolContext {
        conversation_id: conversation_id.to_string(),
        workspace: config.workspace_dir(),
        config: Arc::clone(config),
    };

    match tools.get(&call.name) {
        Some(tool) => {
            info!(tool = %call.name, "Executing tool");
            match tool.execute(call.arguments.clone(), &context).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(%e, tool = %call.name, "Tool execution error");
                    ToolOutput::error(format!("Tool error: {e}"))
                }
            }
        }
        None => {
            warn!(tool = %call.name, "Model requested an unregistered tool");
            ToolOutput::error(format!("Unknown tool: {}", call.name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use rankpilot_providers::{ChunkStream, CompletedTurn, ModelApi, ModelInfo};
    use rankpilot_tools::Tool;

    enum ScriptedRound {
        Stream(Vec<StreamChunk>),
        Fail { status: u16 },
        Hang,
    }

    struct ScriptedProvider {
        rounds: Mutex<VecDeque<ScriptedRound>>,
    }

    impl ScriptedProvider {
        fn new(rounds: Vec<ScriptedRound>) -> Self {
            Self {
                rounds: Mutex::new(rounds.into()),
            }
        }

        fn remaining(&self) -> usize {
            self.rounds.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn api(&self) -> ModelApi {
            ModelApi::AnthropicMessages
        }

        fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
            tools.iter().map(|t| json!({"name": t.name})).collect()
        }

        fn format_history(&self, turns: &[ConversationTurn]) -> Vec<serde_json::Value> {
            turns.iter().map(|t| json!({"id": t.id()})).collect()
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<CompletedTurn> {
            anyhow::bail!("not scripted")
        }

        async fn stream(
            &self,
            _request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<ChunkStream> {
            let round = self
                .rounds
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted");
            match round {
                ScriptedRound::Stream(chunks) => {
                    Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
                }
                ScriptedRound::Fail { status } => Err(UpstreamError {
                    status,
                    body: "rate limited".into(),
                }
                .into()),
                ScriptedRound::Hang => Ok(Box::pin(futures::stream::pending())),
            }
        }

        async fn list_models(&self, _credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    struct GscTool;

    #[async_trait]
    impl Tool for GscTool {
        fn name(&self) -> &str {
            "gsc_query"
        }

        fn description(&self) -> &str {
            "Query search analytics"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {"type": {"type": "string"}}})
        }

        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _context: &ToolContext,
        ) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::text("keyword | clicks\nrunning shoes | 120"))
        }
    }

    struct BigOutputTool;

    #[async_trait]
    impl Tool for BigOutputTool {
        fn name(&self) -> &str {
            "crawl_page"
        }

        fn description(&self) -> &str {
            "Fetch a page"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }

        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _context: &ToolContext,
        ) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::text("x".repeat(TOOL_RESULT_CHAR_BUDGET + 500)))
        }
    }

    fn gsc_round(call_id: &str) -> ScriptedRound {
        ScriptedRound::Stream(vec![
            StreamChunk::ToolCallStart {
                id: call_id.into(),
                name: "gsc_query".into(),
            },
            StreamChunk::ToolCallDelta {
                id: call_id.into(),
                fragment: "{\"type\":\"declining\"}".into(),
            },
            StreamChunk::ToolCallEnd { id: call_id.into() },
            StreamChunk::TurnFinished {
                stop_reason: StopReason::ToolCall,
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
            },
        ])
    }

    fn text_round(text: &str, stop_reason: StopReason) -> ScriptedRound {
        ScriptedRound::Stream(vec![
            StreamChunk::TextDelta { text: text.into() },
            StreamChunk::TurnFinished {
                stop_reason,
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
            },
        ])
    }

    fn registry(tools: Vec<Box<dyn Tool>>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    async fn run(
        provider: &Arc<ScriptedProvider>,
        tools: &ToolRegistry,
        turns: &mut Vec<ConversationTurn>,
        cancel: CancellationToken,
    ) -> (RunOutcome, Vec<AgentEvent>) {
        let config = Arc::new(Config::default());
        let credentials = Credentials::new("test-key");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let provider: Arc<dyn LlmProvider> = provider.clone();

        let outcome = run_agent(
            turns,
            "default",
            "find declining keywords",
            &config,
            tools,
            &provider,
            &credentials,
            tx,
            cancel,
        )
        .await
        .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (outcome, events)
    }

    fn count<F: Fn(&AgentEvent) -> bool>(events: &[AgentEvent], pred: F) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[tokio::test]
    async fn two_round_tool_scenario() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            gsc_round("call_1"),
            text_round("Two keywords are slipping.", StopReason::Stop),
        ]));
        let tools = registry(vec![Box::new(GscTool)]);
        let mut turns = Vec::new();

        let (outcome, events) =
            run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        assert_eq!(outcome.rounds, 2);
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(outcome.text, "Two keywords are slipping.");
        assert!(outcome.error.is_none());
        assert!(!outcome.aborted);
        // Usage accumulates across both rounds
        assert_eq!(outcome.usage.input_tokens, 20);
        assert_eq!(outcome.usage.output_tokens, 10);

        // user, assistant(with call), tool_results, assistant
        assert_eq!(turns.len(), 4);
        assert!(turns[1].has_tool_calls());
        let ConversationTurn::ToolResults { results, .. } = &turns[2] else {
            panic!("expected tool results turn");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].call_id, "call_1");
        assert!(results[0].content.contains("running shoes"));

        // Two tool-related events, text, then done — exactly once each
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::ToolCalls { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::ToolResult { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::ToolError { .. })), 0);
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::TextDelta { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::Done { .. })), 1);
        assert!(matches!(events.last(), Some(AgentEvent::Done { .. })));
    }

    #[tokio::test]
    async fn round_cap_terminates_without_error() {
        // A model that always wants another tool call
        let provider = Arc::new(ScriptedProvider::new((0..10).map(|_| gsc_round("call_1")).collect()));
        let tools = registry(vec![Box::new(GscTool)]);
        let mut turns = Vec::new();

        let (outcome, events) =
            run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        assert_eq!(outcome.rounds, 5);
        assert!(outcome.error.is_none());
        // Exactly five rounds consumed from the script
        assert_eq!(provider.remaining(), 5);
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::Done { .. })), 1);
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort_siblings() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::Stream(vec![
                StreamChunk::ToolCallStart {
                    id: "u1".into(),
                    name: "unknown_tool".into(),
                },
                StreamChunk::ToolCallEnd { id: "u1".into() },
                StreamChunk::ToolCallStart {
                    id: "c2".into(),
                    name: "gsc_query".into(),
                },
                StreamChunk::ToolCallDelta {
                    id: "c2".into(),
                    fragment: "{}".into(),
                },
                StreamChunk::ToolCallEnd { id: "c2".into() },
                StreamChunk::TurnFinished {
                    stop_reason: StopReason::ToolCall,
                    usage: None,
                },
            ]),
            text_round("Done.", StopReason::Stop),
        ]));
        let tools = registry(vec![Box::new(GscTool)]);
        let mut turns = Vec::new();

        let (outcome, events) =
            run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        assert!(outcome.error.is_none());
        let ConversationTurn::ToolResults { results, .. } = &turns[2] else {
            panic!("expected tool results turn");
        };
        assert_eq!(results.len(), 2);
        assert!(results[0].is_error);
        assert!(results[0].content.contains("Unknown tool"));
        assert!(!results[1].is_error);

        assert_eq!(count(&events, |e| matches!(e, AgentEvent::ToolError { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::ToolResult { .. })), 1);
    }

    #[tokio::test]
    async fn oversized_tool_result_is_truncated_with_marker() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedRound::Stream(vec![
                StreamChunk::ToolCallStart {
                    id: "c1".into(),
                    name: "crawl_page".into(),
                },
                StreamChunk::ToolCallEnd { id: "c1".into() },
                StreamChunk::TurnFinished {
                    stop_reason: StopReason::ToolCall,
                    usage: None,
                },
            ]),
            text_round("Summarized.", StopReason::Stop),
        ]));
        let tools = registry(vec![Box::new(BigOutputTool)]);
        let mut turns = Vec::new();

        let (_, _) = run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        let ConversationTurn::ToolResults { results, .. } = &turns[2] else {
            panic!("expected tool results turn");
        };
        let content = &results[0].content;
        assert!(content.ends_with(TRUNCATION_MARKER));
        let prefix = &content[..content.len() - TRUNCATION_MARKER.len()];
        assert_eq!(prefix.len(), TOOL_RESULT_CHAR_BUDGET);
        assert!(prefix.chars().all(|c| c == 'x'));
    }

    #[tokio::test]
    async fn length_stop_appends_visible_warning() {
        let provider =
            Arc::new(ScriptedProvider::new(vec![text_round("partial answer", StopReason::Length)]));
        let tools = ToolRegistry::new();
        let mut turns = Vec::new();

        let (outcome, events) =
            run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        assert!(outcome.text.starts_with("partial answer"));
        assert!(outcome.text.contains("[response truncated"));
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::Done { .. })), 1);
    }

    #[tokio::test]
    async fn upstream_error_is_terminal_and_appends_nothing() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedRound::Fail { status: 429 }]));
        let tools = ToolRegistry::new();
        let mut turns = Vec::new();

        let (outcome, events) =
            run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        let error = outcome.error.expect("expected a run error");
        assert_eq!(error.kind, RunErrorKind::Upstream);
        assert!(error.message.contains("429"));

        // Only the user turn made it into the transcript
        assert_eq!(turns.len(), 1);
        assert!(turns[0].is_user());

        assert_eq!(count(&events, |e| matches!(e, AgentEvent::Error { .. })), 1);
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::Done { .. })), 0);
    }

    #[tokio::test]
    async fn empty_first_round_is_a_soft_warning() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedRound::Stream(vec![
            StreamChunk::TurnFinished {
                stop_reason: StopReason::Stop,
                usage: None,
            },
        ])]));
        let tools = ToolRegistry::new();
        let mut turns = Vec::new();

        let (outcome, events) =
            run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        assert!(outcome.error.is_none());
        assert!(outcome.text.is_empty());
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::Done { .. })), 1);
    }

    #[tokio::test]
    async fn cancellation_preserves_partial_progress() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedRound::Hang]));
        let tools = ToolRegistry::new();
        let mut turns = Vec::new();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (outcome, events) = run(&provider, &tools, &mut turns, cancel).await;

        assert!(outcome.aborted);
        assert!(outcome.error.is_none());
        assert_eq!(count(&events, |e| matches!(e, AgentEvent::Done { .. })), 1);
    }

    #[tokio::test]
    async fn loaded_history_is_flattened_before_the_first_round() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_round("Hi again.", StopReason::Stop)]));
        let tools = ToolRegistry::new();

        // Prior session, possibly from a different vendor
        let mut turns = vec![
            ConversationTurn::user("audit the homepage"),
            ConversationTurn::assistant(
                "Crawling.",
                vec![ToolInvocation {
                    id: "toolu_old".into(),
                    name: "crawl_page".into(),
                    arguments: json!({"url": "https://example.com"}),
                }],
                None,
            ),
            ConversationTurn::tool_results(vec![ToolResult {
                call_id: "toolu_old".into(),
                tool: "crawl_page".into(),
                content: "<html>".into(),
                is_error: false,
            }]),
        ];

        let (outcome, _) = run(&provider, &tools, &mut turns, CancellationToken::new()).await;

        assert!(outcome.error.is_none());
        assert!(turns.iter().all(|t| !t.has_tool_calls()));
        assert!(
            !turns
                .iter()
                .any(|t| matches!(t, ConversationTurn::ToolResults { .. }))
        );
    }

    #[test]
    fn truncate_result_is_char_boundary_safe() {
        let content = "é".repeat(10);
        let truncated = truncate_result(&content, 4);
        assert!(truncated.starts_with("éééé"));
        assert!(truncated.ends_with(TRUNCATION_MARKER));

        let short = truncate_result("short", 100);
        assert_eq!(short, "short");
    }
}
