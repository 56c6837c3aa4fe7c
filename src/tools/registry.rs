use anyhow::anyhow;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

/// A tool executed in-process and offered to the model as a function.
#[async_trait]
pub trait NativeTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> serde_json::Value;
    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// Ordered set of native tools available to one chat request.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn NativeTool>>,
    // tool name -> position in `tools`
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new_empty() -> Self {
        Self::default()
    }

    /// Adds a tool, replacing any earlier tool with the same name.
    #[must_use]
    pub fn with_native_tool(mut self, tool: Arc<dyn NativeTool>) -> Self {
        let name = tool.name().to_string();
        if let Some(&pos) = self.index.get(&name) {
            self.tools[pos] = tool;
        } else {
            self.index.insert(name, self.tools.len());
            self.tools.push(tool);
        }
        self
    }

    /// Tool names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions in `OpenAI` function schema format.
    #[must_use]
    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.schema(),
                    }
                })
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let pos = self
            .index
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("unknown tool: {name}"))?;
        self.tools[pos].call(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Echo(&'static str);

    #[async_trait]
    impl NativeTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            self.0
        }

        fn schema(&self) -> serde_json::Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn test_call_registered_tool() {
        let registry = ToolRegistry::new_empty().with_native_tool(Arc::new(Echo("first")));
        let out = registry.call_tool("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let registry = ToolRegistry::new_empty();
        let err = registry.call_tool("missing", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool: missing"));
    }

    #[test]
    fn test_duplicate_name_replaces() {
        let registry = ToolRegistry::new_empty()
            .with_native_tool(Arc::new(Echo("first")))
            .with_native_tool(Arc::new(Echo("second")));
        assert_eq!(registry.len(), 1);
        let tools = registry.openai_tools_json();
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["description"], "second");
    }
}
