//! Tools the model may invoke, and the executor that dispatches to them.
//!
//! Tools are what let the model reach outside its own weights; in this
//! system that means web search. [`ToolRegistry`] is the tool executor: it
//! resolves a requested name and runs the matching tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// One invocation the model asked for, with decoded arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Echoed back on the result turn so the model can pair them
    pub id: String,

    pub name: String,

    pub arguments: serde_json::Value,
}

/// Outcome of a successful tool run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,

    pub success: bool,

    /// Text the model reads on the tool-result turn
    pub output: String,

    /// Machine-readable form of `output`, for the loop rather than the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A capability offered to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to request this tool.
    fn name(&self) -> &str;

    /// Shown to the model; decides when it reaches for the tool.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// The schema entry advertised with every completion request.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Name-indexed set of tools.
///
/// Ordered by name so the schema sent with every completion request is
/// byte-for-byte the same across requests.
#[derive(Default)]
pub struct ToolRegistry {
    by_name: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `tool`, replacing any tool already registered under its name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.by_name.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.by_name.get(name).map(Box::as_ref)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.by_name.values().map(|tool| tool.to_definition()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.by_name.keys().map(String::as_str).collect()
    }

    /// Run `call` against the tool it names.
    ///
    /// The returned result always carries `call.id`, whatever the tool set.
    pub async fn execute(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let Some(tool) = self.get(&call.name) else {
            return Err(ToolError::NotFound(call.name.clone()));
        };
        debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");
        let result = tool.execute(call.arguments.clone()).await?;
        Ok(ToolResult {
            call_id: call.id.clone(),
            ..result
        })
    }
}
