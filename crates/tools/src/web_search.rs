//! Web search tool backed by a pluggable [`SearchBackend`].
//!
//! The tool is exposed to the model as `tavily_search_results_json`. Its
//! output is a JSON array of hits, and the same array is returned as
//! structured data so the agent loop can surface the result URLs.

use async_trait::async_trait;
use lexstream_core::error::ToolError;
use lexstream_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Name the model uses to request a search.
pub const SEARCH_TOOL_NAME: &str = "tavily_search_results_json";

pub const TAVILY_API_URL: &str = "https://api.tavily.com/search";

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// A web search engine.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run `query`, returning at most `max_results` hits.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Tavily search API backend.
#[derive(Clone)]
pub struct TavilySearchBackend {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl TavilySearchBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            api_url: TAVILY_API_URL.into(),
        }
    }

    /// Point the backend at a different endpoint (proxies, test servers).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

mod tavily_api {
    use super::SearchHit;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    pub struct SearchRequest<'a> {
        pub api_key: &'a str,
        pub query: &'a str,
        pub max_results: usize,
    }

    #[derive(Debug, Deserialize)]
    pub struct SearchResponse {
        #[serde(default)]
        pub results: Vec<SearchHit>,
    }
}

#[async_trait]
impl SearchBackend for TavilySearchBackend {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: SEARCH_TOOL_NAME.into(),
            reason,
        };

        if self.api_key.is_empty() {
            return Err(failed("search API key is not configured (set TAVILY_API_KEY)".into()));
        }

        let response = self
            .client
            .post(&self.api_url)
            .json(&tavily_api::SearchRequest {
                api_key: &self.api_key,
                query,
                max_results,
            })
            .send()
            .await
            .map_err(|e| failed(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("search API error: {status} - {body}")));
        }

        let parsed: tavily_api::SearchResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("failed to parse search response: {e}")))?;

        let mut hits = parsed.results;
        hits.truncate(max_results);
        Ok(hits)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

/// The search tool offered to the model.
pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    max_results: usize,
}

impl WebSearchTool {
    /// `max_results` is both the default and the cap per call.
    pub fn new(backend: Arc<dyn SearchBackend>, max_results: usize) -> Self {
        Self {
            backend,
            max_results: max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "A search engine optimized for comprehensive, accurate, and trusted results. \
         Useful for when you need to answer questions about current events or look up \
         statutes, case law, and legal commentary. Input should be a search query."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "search query to look up"
                },
                "max_results": {
                    "type": "integer",
                    "description": format!("Number of results to return (default and maximum {})", self.max_results),
                    "minimum": 1
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let limit = arguments["max_results"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, self.max_results))
            .unwrap_or(self.max_results);

        debug!(backend = %self.backend.name(), query, limit, "Running web search");
        let hits = self.backend.search(query, limit).await?;

        let data = serde_json::to_value(&hits).map_err(|e| ToolError::ExecutionFailed {
            tool_name: SEARCH_TOOL_NAME.into(),
            reason: format!("failed to encode results: {e}"),
        })?;

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: data.to_string(),
            data: Some(data),
        })
    }
}
