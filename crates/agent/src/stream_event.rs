//! Events streamed to the client while a turn is being answered.
//!
//! Each variant is one wire frame. The `type` tag values and field names
//! are the wire contract; front ends switch on them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A new conversation was started under this id. Only ever first.
    Checkpoint { checkpoint_id: String },

    /// One fragment of assistant text, forwarded as generated.
    Content { content: String },

    /// The model asked for a web search.
    SearchStart { query: String },

    /// URLs returned by one completed search.
    SearchResults { urls: Vec<String> },

    /// Nothing follows. Exactly one per request.
    End,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Checkpoint { .. } => "checkpoint",
            Self::Content { .. } => "content",
            Self::SearchStart { .. } => "search_start",
            Self::SearchResults { .. } => "search_results",
            Self::End => "end",
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}
