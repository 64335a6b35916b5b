//! Completion backends for lexstream.
//!
//! All backends implement the `lexstream_core::Provider` trait. The router
//! selects one from configuration and the [`CompletionClient`] drives it.

pub mod completion;
pub mod openai_compat;
pub mod router;

pub use completion::{CompletionClient, CompletionEvent, CompletionSettings, CompletionStream};
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config};
