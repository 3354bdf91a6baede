//! MCP tool implementations.
//!
//! Each tool parses its JSON arguments into a typed input, runs, and returns
//! the text content of the `tools/call` result.

mod arithmetic;
mod identity;

pub use arithmetic::DoubleTool;
pub use identity::WhoamiTool;

use std::sync::Arc;

use serde::Serialize;

use crate::client::BearerAuthResult;
use crate::error::ToolResult;

/// Tool execution context.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Verified caller, absent only when auth is bypassed in tests.
    pub auth: Option<BearerAuthResult>,

    /// Session the call arrived on; `None` in stateless mode.
    pub session_id: Option<String>,
}

impl ToolContext {
    /// Create a new tool context.
    #[must_use]
    pub const fn new(auth: Option<BearerAuthResult>, session_id: Option<String>) -> Self {
        Self { auth, session_id }
    }
}

/// Trait for MCP tools.
#[async_trait::async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name (e.g., "double").
    fn name(&self) -> &'static str;

    /// Tool description for LLM.
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input.
    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult<String>;
}

/// MCP tool info for tools/list response.
#[derive(Debug, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// The set of tools a server exposes.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn McpTool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(tools: Vec<Arc<dyn McpTool>>) -> Self {
        Self { tools }
    }

    /// Get tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn McpTool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Descriptions for `tools/list`.
    #[must_use]
    pub fn list(&self) -> Vec<McpToolInfo> {
        self.tools
            .iter()
            .map(|t| McpToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.iter().map(|t| t.name())).finish()
    }
}

/// Register all tools.
#[must_use]
pub fn register_all_tools() -> ToolRegistry {
    ToolRegistry::new(vec![Arc::new(DoubleTool), Arc::new(WhoamiTool)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = register_all_tools();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("double").is_some());
        assert!(registry.get("missing").is_none());
        let names: Vec<_> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["double", "whoami"]);
    }
}
