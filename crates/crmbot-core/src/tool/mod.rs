pub mod bulk;
pub mod describe;
pub mod document;
pub mod propose;
pub mod query;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::ToolError;

/// Trait for agent tools. A tool instance is bound to one subject id
/// for the duration of a conversation turn and holds no other state.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls.
    fn name(&self) -> &str;

    /// Description the reasoning backend uses to decide invocation.
    fn description(&self) -> &str;

    /// JSON Schema for tool parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Execute the tool. Input validation errors are rejected here,
    /// before anything reaches the external system.
    async fn execute(
        &self,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Extension trait to render a tool in function-call schema format.
pub trait ToolSchema: Tool {
    fn to_schema(&self) -> serde_json::Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name(),
                "description": self.description(),
                "parameters": self.parameters(),
            }
        })
    }
}

impl<T: Tool + ?Sized> ToolSchema for T {}

/// Lock-free tool registry using DashMap. Built fresh per turn.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| r.value().clone())
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions in function-call format.
    pub fn get_definitions(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|entry| entry.value().to_schema())
            .collect()
    }

    /// Execute a tool by name with given parameters.
    pub async fn execute(
        &self,
        name: &str,
        params: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!("Executing tool: {}", name);
        tool.execute(params).await
    }

    /// Get list of registered tool names.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject an empty subject id before any credential or network work.
pub(crate) fn require_identity(sub_id: &str) -> Result<(), ToolError> {
    if sub_id.trim().is_empty() {
        Err(ToolError::MissingIdentity)
    } else {
        Ok(())
    }
}

pub(crate) fn require_str<'a>(
    params: &'a HashMap<String, serde_json::Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput(format!("'{key}' parameter is required")))
}

pub(crate) fn opt_str<'a>(
    params: &'a HashMap<String, serde_json::Value>,
    key: &str,
) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub(crate) fn opt_u64(params: &HashMap<String, serde_json::Value>, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PingTool;

    #[async_trait]
    impl Tool for PingTool {
        fn name(&self) -> &str {
            "ping"
        }

        fn description(&self) -> &str {
            "Respond with pong."
        }

        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(
            &self,
            _params: HashMap<String, serde_json::Value>,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(json!({"pong": true}))
        }
    }

    #[tokio::test]
    async fn test_registry_roundtrip() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(PingTool));
        assert!(registry.has("ping"));
        assert_eq!(registry.len(), 1);

        let out = registry.execute("ping", HashMap::new()).await.unwrap();
        assert_eq!(out["pong"], true);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn test_schema_format() {
        let schema = PingTool.to_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "ping");
    }

    #[test]
    fn test_require_identity() {
        assert!(require_identity("user-1").is_ok());
        assert!(matches!(
            require_identity("   "),
            Err(ToolError::MissingIdentity)
        ));
    }
}
