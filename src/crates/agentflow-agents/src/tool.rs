//! Tool abstraction and registry
//!
//! Tools are how agents act on the world: search, calculation, APIs, files.
//! The [`Tool`] trait keeps the surface minimal (name, description, JSON
//! schema, async execute); the [`ToolRegistry`] provides name-keyed lookup
//! and validated execution for the executors.

use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Declarative description of a tool, as shown to models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the input object (`null` means unconstrained)
    pub parameters: Value,
}

/// An action an agent can take
///
/// Implementations should honor cancellation of the calling context; the
/// executors enforce deadlines around `execute` regardless.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the tool input; `Value::Null` accepts anything
    fn parameters(&self) -> Value {
        Value::Null
    }

    async fn execute(&self, input: Value) -> Result<Value>;

    /// The spec advertised to models
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Name-keyed tool lookup shared by executors
///
/// Read-heavy: lookups take a read lock, registration takes a write lock.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of tools
    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Result<Self> {
        let registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    /// Register a tool; names must be unique
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().expect("tool registry lock poisoned");

        if tools.contains_key(&name) {
            return Err(AgentError::InvalidConfiguration(format!(
                "tool '{}' is already registered",
                name
            )));
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Registered tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Specs of every registered tool, sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        let tools = self.tools.read().expect("tool registry lock poisoned");
        let mut specs: Vec<ToolSpec> = tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("tool registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up, validate input against the tool's schema, and execute
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        let schema = tool.parameters();
        let violations = tooling::validation::check_against_schema(&schema, &input);
        if !violations.is_empty() {
            return Err(AgentError::tool(name, violations.join("; ")));
        }

        tool.execute(input).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) struct Calculator;

    #[async_trait]
    impl Tool for Calculator {
        fn name(&self) -> &str {
            "calculator"
        }

        fn description(&self) -> &str {
            "Evaluate basic arithmetic over two operands"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "number"},
                    "b": {"type": "number"},
                    "op": {"type": "string", "enum": ["add", "mul"]}
                },
                "required": ["a", "b", "op"]
            })
        }

        async fn execute(&self, input: Value) -> Result<Value> {
            let a = input["a"].as_f64().unwrap_or(0.0);
            let b = input["b"].as_f64().unwrap_or(0.0);
            let result = match input["op"].as_str() {
                Some("add") => a + b,
                Some("mul") => a * b,
                other => {
                    return Err(AgentError::tool(
                        "calculator",
                        format!("unsupported op: {:?}", other),
                    ))
                }
            };
            Ok(json!({ "result": result }))
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Calculator)).unwrap();

        let output = registry
            .execute("calculator", json!({"a": 6, "b": 7, "op": "mul"}))
            .await
            .unwrap();
        assert_eq!(output, json!({"result": 42.0}));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Calculator)).unwrap();

        let err = registry.register(Arc::new(Calculator)).unwrap_err();
        assert!(matches!(err, AgentError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_schema_validation_rejects_bad_input() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Calculator)).unwrap();

        let err = registry
            .execute("calculator", json!({"a": 1}))
            .await
            .unwrap_err();
        match err {
            AgentError::Tool { message, .. } => {
                assert!(message.contains("b"));
                assert!(message.contains("op"));
            }
            other => panic!("unexpected: {}", other),
        }
    }

    #[test]
    fn test_specs_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Calculator)).unwrap();

        let specs = registry.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "calculator");
        assert!(specs[0].parameters.is_object());
    }
}
