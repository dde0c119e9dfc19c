use std::collections::HashMap;

use async_trait::async_trait;
use helmsman_core::errors::ToolError;
use serde_json::Value;

/// Executes a tool by id. Only the resilience layer calls this directly.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_id: &str, input: Value) -> Result<Value, ToolError>;
}

/// A single named tool implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

/// Dispatches to registered [`Tool`]s by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.contains_key(tool_id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, tool_id: &str, input: Value) -> Result<Value, ToolError> {
        match self.tools.get(tool_id) {
            Some(tool) => tool.execute(input).await,
            None => Err(ToolError::Permanent(format!("no implementation registered for `{tool_id}`"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use helmsman_core::errors::ToolError;
    use serde_json::{json, Value};

    use super::{Tool, ToolExecutor, ToolRegistry};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, input: Value) -> Result<Value, ToolError> {
            Ok(json!({ "echo": input }))
        }
    }

    #[tokio::test]
    async fn dispatches_by_name_and_rejects_unknown_tools() {
        let mut registry = ToolRegistry::default();
        registry.register(EchoTool);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("echo"));

        let output = registry.execute("echo", json!({ "q": 1 })).await.expect("echo");
        assert_eq!(output, json!({ "echo": { "q": 1 } }));

        let error = registry.execute("missing", Value::Null).await.expect_err("unknown tool");
        assert!(!error.is_transient());
    }
}
