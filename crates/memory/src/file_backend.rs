//! File-backed history store using append-only JSON lines.
//!
//! Each line is one `{conversation_id, message}` record. The whole file is
//! replayed into memory on open; every append writes its batch with a
//! single write so a batch never interleaves with another.
//!
//! Default location: `~/.lexstream/history.jsonl`

use async_trait::async_trait;
use lexstream_core::error::HistoryError;
use lexstream_core::history::{HistoryStore, ensure_storable};
use lexstream_core::message::{ConversationId, Message};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct Record {
    conversation_id: ConversationId,
    message: Message,
}

/// JSONL history with an in-memory index.
pub struct FileHistory {
    path: PathBuf,
    conversations: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl FileHistory {
    /// Open (or lazily create) the history file at `path`.
    ///
    /// Lines that fail to decode are skipped with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let conversations = Self::replay(&path).await?;
        debug!(
            path = %path.display(),
            conversations = conversations.len(),
            "File history loaded"
        );
        Ok(Self {
            path,
            conversations: RwLock::new(conversations),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn replay(path: &Path) -> Result<HashMap<ConversationId, Vec<Message>>, HistoryError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(HistoryError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let mut conversations: HashMap<ConversationId, Vec<Message>> = HashMap::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => conversations
                    .entry(record.conversation_id)
                    .or_default()
                    .push(record.message),
                Err(e) => warn!(line = line_no + 1, error = %e, "Skipping corrupted history record"),
            }
        }
        Ok(conversations)
    }

    fn encode(id: &ConversationId, turns: &[Message]) -> Result<String, HistoryError> {
        let mut buf = String::new();
        for message in turns {
            let record = Record {
                conversation_id: id.clone(),
                message: message.clone(),
            };
            let line = serde_json::to_string(&record)
                .map_err(|e| HistoryError::Storage(format!("Failed to encode turn: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        Ok(buf)
    }
}

#[async_trait]
impl HistoryStore for FileHistory {
    fn name(&self) -> &str {
        "file"
    }

    async fn append(&self, id: &ConversationId, turns: Vec<Message>) -> Result<(), HistoryError> {
        ensure_storable(&turns)?;
        if turns.is_empty() {
            return Ok(());
        }
        let buf = Self::encode(id, &turns)?;

        // Holding the write lock across the disk write keeps file order and
        // index order identical.
        let mut conversations = self.conversations.write().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                HistoryError::Storage(format!("Failed to create history directory: {e}"))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to open history file: {e}")))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to write history file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| HistoryError::Storage(format!("Failed to flush history file: {e}")))?;

        conversations.entry(id.clone()).or_default().extend(turns);
        Ok(())
    }

    async fn load(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    async fn conversation_count(&self) -> Result<usize, HistoryError> {
        Ok(self.conversations.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexstream_core::message::MessageToolCall;

    fn temp_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        (dir, path)
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let (_dir, path) = temp_path();
        let store = FileHistory::open(&path).await.unwrap();
        assert_eq!(store.conversation_count().await.unwrap(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn turns_survive_reopen() {
        let (_dir, path) = temp_path();
        let id = ConversationId::from("c1");
        let call = MessageToolCall {
            id: "call_1".into(),
            name: "tavily_search_results_json".into(),
            arguments: r#"{"query":"easements"}"#.into(),
        };

        {
            let store = FileHistory::open(&path).await.unwrap();
            store
                .append(&id, vec![Message::user("Explain easements")])
                .await
                .unwrap();
            store
                .append(
                    &id,
                    vec![
                        Message::assistant_with_tools("", vec![call]),
                        Message::tool_result("call_1", "tavily_search_results_json", "[]"),
                    ],
                )
                .await
                .unwrap();
        }

        let store = FileHistory::open(&path).await.unwrap();
        let turns = store.load(&id).await.unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].content, "Explain easements");
        assert_eq!(turns[1].tool_calls[0].id, "call_1");
        assert_eq!(turns[2].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("history.jsonl");
        let store = FileHistory::open(&path).await.unwrap();
        store
            .append(&ConversationId::from("c"), vec![Message::user("hi")])
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn corrupted_lines_are_skipped() {
        let (_dir, path) = temp_path();
        let id = ConversationId::from("c1");
        {
            let store = FileHistory::open(&path).await.unwrap();
            store.append(&id, vec![Message::user("first")]).await.unwrap();
        }
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{this is not json}\n");
        std::fs::write(&path, content).unwrap();
        {
            let store = FileHistory::open(&path).await.unwrap();
            store.append(&id, vec![Message::assistant("second")]).await.unwrap();
        }

        let store = FileHistory::open(&path).await.unwrap();
        let turns = store.load(&id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "second");
    }

    #[tokio::test]
    async fn system_turns_never_reach_disk() {
        let (_dir, path) = temp_path();
        let store = FileHistory::open(&path).await.unwrap();
        let result = store
            .append(&ConversationId::from("c"), vec![Message::system("rules")])
            .await;
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
