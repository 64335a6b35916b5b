//! # lexstream core
//!
//! Domain types, traits, and error definitions for the lexstream research
//! assistant. This crate has **zero framework dependencies**. It defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the agent loop is defined as a trait here:
//! the completion [`Provider`], the [`Tool`]s behind the [`ToolRegistry`],
//! and the [`HistoryStore`]. Implementations live in their respective
//! crates, so the loop can be driven by scripted stubs in tests.

pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, HistoryError, ProviderError, Result, ToolError};
pub use history::HistoryStore;
pub use message::{ConversationId, Message, MessageToolCall, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
