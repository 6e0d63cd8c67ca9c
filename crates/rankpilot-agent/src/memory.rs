//! Post-run memory note extraction — best-effort and fire-and-forget.
//!
//! After a run completes, one non-streaming model call distills the exchange
//! into a short note appended to a notes file, so future sessions can recall
//! what was discussed. The task runs detached; its failure never affects the
//! emitted result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use rankpilot_core::conversation::ConversationTurn;
use rankpilot_providers::{CompletionRequest, Credentials, LlmProvider};

const EXCHANGE_SNIPPET_CHARS: usize = 1_500;

const EXTRACTION_SYSTEM_PROMPT: &str = "You distill conversations into memory notes. Reply \
     with one short sentence capturing the single most useful fact to remember from the \
     exchange, or the word 'none' if there is nothing worth keeping.";

/// Spawn the extraction task. Returns immediately.
#[allow(clippy::too_many_arguments)]
pub fn spawn_note_extraction(
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    model: String,
    dir: PathBuf,
    conversation_id: String,
    user_message: String,
    reply: String,
) {
    tokio::spawn(async move {
        let result = extract_note(
            provider.as_ref(),
            &credentials,
            &model,
            &dir,
            &conversation_id,
            &user_message,
            &reply,
        )
        .await;
        if let Err(e) = result {
            debug!(%e, "Memory note extraction failed");
        }
    });
}

async fn extract_note(
    provider: &dyn LlmProvider,
    credentials: &Credentials,
    model: &str,
    dir: &Path,
    conversation_id: &str,
    user_message: &str,
    reply: &str,
) -> anyhow::Result<()> {
    if reply.is_empty() {
        return Ok(());
    }

    let prompt = format!(
        "User: {}\n\nAssistant: {}",
        snippet(user_message),
        snippet(reply)
    );
    let request = CompletionRequest {
        model: model.to_string(),
        messages: provider.format_history(&[ConversationTurn::user(prompt)]),
        max_tokens: 256,
        temperature: Some(0.3),
        tools: None,
        system: Some(EXTRACTION_SYSTEM_PROMPT.to_string()),
    };

    let completed = provider.complete(&request, credentials).await?;
    let note = completed.text.trim();
    if note.is_empty() || note.eq_ignore_ascii_case("none") {
        return Ok(());
    }

    write_note(dir, conversation_id, note).await
}

async fn write_note(dir: &Path, conversation_id: &str, note: &str) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    let entry = serde_json::json!({
        "timestamp": chrono::Utc::now(),
        "conversation_id": conversation_id,
        "note": note,
    });

    let path = dir.join("notes.jsonl");
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(serde_json::to_string(&entry)?.as_bytes())
        .await?;
    file.write_all(b"\n").await?;
    file.flush().await?;

    debug!(conversation_id, "Appended memory note");
    Ok(())
}

fn snippet(text: &str) -> String {
    match text.char_indices().nth(EXCHANGE_SNIPPET_CHARS) {
        Some((byte_pos, _)) => format!("{}...", &text[..byte_pos]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rankpilot_providers::{
        ChunkStream, CompletedTurn, ModelApi, ModelInfo, StopReason, ToolDefinition,
    };
    use rankpilot_core::conversation::TokenUsage;

    /// Answers every completion with a canned note.
    struct CannedProvider {
        note: &'static str,
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn id(&self) -> &str {
            "canned"
        }

        fn api(&self) -> ModelApi {
            ModelApi::AnthropicMessages
        }

        fn format_tools(&self, _tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
            Vec::new()
        }

        fn format_history(&self, turns: &[ConversationTurn]) -> Vec<serde_json::Value> {
            turns
                .iter()
                .map(|t| serde_json::json!({"id": t.id()}))
                .collect()
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<CompletedTurn> {
            Ok(CompletedTurn {
                text: self.note.to_string(),
                tool_calls: Vec::new(),
                stop_reason: StopReason::Stop,
                usage: TokenUsage::default(),
            })
        }

        async fn stream(
            &self,
            _request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<ChunkStream> {
            anyhow::bail!("streaming not supported in this test")
        }

        async fn list_models(&self, _credentials: &Credentials) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_extract_note_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CannedProvider {
            note: "example.com is losing clicks on running-shoe queries.",
        };

        extract_note(
            &provider,
            &Credentials::new("test"),
            "test-model",
            dir.path(),
            "default",
            "find declining keywords",
            "Two keywords are slipping.",
        )
        .await
        .unwrap();

        let data = std::fs::read_to_string(dir.path().join("notes.jsonl")).unwrap();
        let note: serde_json::Value = serde_json::from_str(data.lines().next().unwrap()).unwrap();
        assert_eq!(note["conversation_id"], "default");
        assert_eq!(
            note["note"],
            "example.com is losing clicks on running-shoe queries."
        );
    }

    #[tokio::test]
    async fn test_none_reply_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CannedProvider { note: "none" };

        extract_note(
            &provider,
            &Credentials::new("test"),
            "test-model",
            dir.path(),
            "default",
            "hello",
            "hi there",
        )
        .await
        .unwrap();

        assert!(!dir.path().join("notes.jsonl").exists());
    }

    #[tokio::test]
    async fn test_empty_assistant_reply_skips_the_model_call() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CannedProvider {
            note: "should never be asked",
        };

        extract_note(
            &provider,
            &Credentials::new("test"),
            "test-model",
            dir.path(),
            "default",
            "hello",
            "",
        )
        .await
        .unwrap();

        assert!(!dir.path().join("notes.jsonl").exists());
    }
}
