//! In-memory history store, the default for ephemeral deployments.
//!
//! Conversations live until the process exits. Retention beyond that is
//! left to whoever runs the process; nothing here ever drops a turn.

use async_trait::async_trait;
use lexstream_core::error::HistoryError;
use lexstream_core::history::{HistoryStore, ensure_storable};
use lexstream_core::message::{ConversationId, Message};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// A map of conversation id to its append-only turn sequence.
#[derive(Default)]
pub struct InMemoryHistory {
    conversations: RwLock<HashMap<ConversationId, Vec<Message>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, id: &ConversationId, turns: Vec<Message>) -> Result<(), HistoryError> {
        ensure_storable(&turns)?;
        if turns.is_empty() {
            return Ok(());
        }

        let mut conversations = self.conversations.write().await;
        let stored = conversations.entry(id.clone()).or_insert_with(|| {
            debug!(conversation = %id, "Starting conversation");
            Vec::new()
        });
        stored.extend(turns);

        Ok(())
    }

    async fn load(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(id).cloned().unwrap_or_default())
    }

    async fn conversation_count(&self) -> Result<usize, HistoryError> {
        Ok(self.conversations.read().await.len())
    }
}
