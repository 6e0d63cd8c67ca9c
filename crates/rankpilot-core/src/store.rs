//! JSONL-based conversation store — one transcript file per conversation.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::conversation::ConversationTurn;
use crate::error::Result;

/// Persistence collaborator: the core reads an ordered turn list at
/// conversation start and writes the updated list at conversation end.
/// Format and location are owned by the store, not the core.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a conversation's turns. A conversation that has never been
    /// saved yields an empty history, not an error.
    async fn load(&self, id: &str) -> Result<Vec<ConversationTurn>>;

    /// Replace the stored turn list for a conversation.
    async fn save(&self, id: &str, turns: &[ConversationTurn]) -> Result<()>;

    /// List stored conversation ids.
    async fn list(&self) -> Result<Vec<String>>;

    /// Delete a conversation. Deleting an unknown id is a no-op.
    async fn delete(&self, id: &str) -> Result<()>;
}

/// File-based store using JSONL transcripts.
///
/// Layout: `<base>/conversations/<id>.jsonl` — one turn per line.
pub struct JsonlConversationStore {
    base: PathBuf,
}

impl JsonlConversationStore {
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    /// Default store location: `~/.rankpilot/`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir()
    }

    fn conversations_dir(&self) -> PathBuf {
        self.base.join("conversations")
    }

    fn transcript_path(&self, id: &str) -> PathBuf {
        self.conversations_dir()
            .join(format!("{}.jsonl", sanitize_id(id)))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.conversations_dir()).await?;
        Ok(())
    }
}

/// Map a conversation id to a safe file stem.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ConversationStore for JsonlConversationStore {
    async fn load(&self, id: &str) -> Result<Vec<ConversationTurn>> {
        let path = self.transcript_path(id);
        if !path.exists() {
            debug!(id, "No stored conversation, starting empty");
            return Ok(Vec::new());
        }

        let data = tokio::fs::read_to_string(&path).await?;
        let mut turns = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ConversationTurn>(line) {
                Ok(turn) => turns.push(turn),
                // A corrupt line costs one turn, not the whole history.
                Err(e) => warn!(id, %e, "Skipping corrupt transcript line"),
            }
        }
        debug!(id, turns = turns.len(), "Loaded conversation");
        Ok(turns)
    }

    async fn save(&self, id: &str, turns: &[ConversationTurn]) -> Result<()> {
        self.ensure_dirs().await?;

        let path = self.transcript_path(id);
        let mut data = String::new();
        for turn in turns {
            let line = serde_json::to_string(turn)?;
            data.push_str(&line);
            data.push('\n');
        }

        // Atomic write: write to temp then rename
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(id, turns = turns.len(), "Saved conversation");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let dir = self.conversations_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".jsonl") {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.transcript_path(id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
            debug!(id, "Deleted conversation");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ToolInvocation, ToolResult};

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf());

        let turns = vec![
            ConversationTurn::user("find declining keywords"),
            ConversationTurn::assistant(
                "Checking.",
                vec![ToolInvocation {
                    id: "call_1".into(),
                    name: "gsc_query".into(),
                    arguments: serde_json::json!({"type": "declining"}),
                }],
                None,
            ),
            ConversationTurn::tool_results(vec![ToolResult {
                call_id: "call_1".into(),
                tool: "gsc_query".into(),
                content: "keyword | clicks\nfoo | 12".into(),
                is_error: false,
            }]),
        ];

        store.save("default", &turns).await.unwrap();
        let loaded = store.load("default").await.unwrap();
        assert_eq!(loaded, turns);
    }

    #[tokio::test]
    async fn test_missing_conversation_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf());
        let loaded = store.load("never-saved").await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf());

        store
            .save("default", &[ConversationTurn::user("hello")])
            .await
            .unwrap();

        // Append garbage behind the valid line
        let path = dir.path().join("conversations/default.jsonl");
        let mut data = std::fs::read_to_string(&path).unwrap();
        data.push_str("{not json\n");
        std::fs::write(&path, data).unwrap();

        let loaded = store.load("default").await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlConversationStore::new(dir.path().to_path_buf());

        store.save("a", &[]).await.unwrap();
        store.save("b", &[]).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);

        store.delete("a").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["b"]);

        // Unknown id is a no-op
        store.delete("missing").await.unwrap();
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("site/example.com"), "site_example_com");
        assert_eq!(sanitize_id("default"), "default");
    }
}
