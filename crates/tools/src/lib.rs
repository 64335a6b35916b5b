//! Tools for lexstream.
//!
//! The research assistant has one capability: web search. The registry
//! built here is what the agent loop advertises to the model and executes
//! tool calls against.

pub mod web_search;

use lexstream_config::AppConfig;
use lexstream_core::tool::ToolRegistry;
use std::sync::Arc;

pub use web_search::{
    SEARCH_TOOL_NAME, SearchBackend, SearchHit, TavilySearchBackend, WebSearchTool,
};

/// Build the registry from configuration.
///
/// The search tool is always registered. A missing API key surfaces as a
/// failed tool call the model can read, not as a startup error.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let mut backend = TavilySearchBackend::new(config.search.api_key.clone().unwrap_or_default());
    if let Some(url) = &config.search.api_url {
        backend = backend.with_api_url(url);
    }
    registry_with_backend(Arc::new(backend), config.search.max_results)
}

/// Build a registry around an arbitrary search backend.
pub fn registry_with_backend(backend: Arc<dyn SearchBackend>, max_results: usize) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(WebSearchTool::new(backend, max_results)));
    registry
}
