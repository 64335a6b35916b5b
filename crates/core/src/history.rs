//! History store trait: durable, append-only turn sequences per conversation.
//!
//! The agent loop reads the full sequence before every completion request and
//! appends every turn it produces. Backends: in-memory, JSONL file, SQLite.

use async_trait::async_trait;
use crate::error::HistoryError;
use crate::message::{ConversationId, Message, Role};

/// The core HistoryStore trait.
///
/// Sequences are append-only: a snapshot taken before an `append` is always
/// a prefix of a snapshot taken after it.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "memory", "file", "sqlite").
    fn name(&self) -> &str;

    /// Append turns to a conversation, creating it if needed.
    ///
    /// The batch lands contiguously and in the given order.
    async fn append(&self, id: &ConversationId, turns: Vec<Message>) -> Result<(), HistoryError>;

    /// Load the full turn sequence in append order. Unknown ids yield an empty sequence.
    async fn load(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError>;

    /// Whether any turn has been stored for this conversation.
    async fn contains(&self, id: &ConversationId) -> Result<bool, HistoryError> {
        Ok(!self.load(id).await?.is_empty())
    }

    /// Number of conversations currently held.
    async fn conversation_count(&self) -> Result<usize, HistoryError>;
}

/// Reject batches that would break the stored-sequence rules.
///
/// System turns are injected per request and never persisted.
pub fn ensure_storable(turns: &[Message]) -> Result<(), HistoryError> {
    if let Some(turn) = turns.iter().find(|t| t.role == Role::System) {
        return Err(HistoryError::Storage(format!(
            "system turn {} cannot be persisted",
            turn.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_turns_are_rejected() {
        let err = ensure_storable(&[Message::user("q"), Message::system("rules")]).unwrap_err();
        assert!(err.to_string().contains("system turn"));
    }

    #[test]
    fn conversational_turns_are_accepted() {
        let turns = vec![
            Message::user("q"),
            Message::assistant("a"),
            Message::tool_result("c1", "search", "[]"),
        ];
        assert!(ensure_storable(&turns).is_ok());
    }
}
