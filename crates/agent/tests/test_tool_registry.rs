//! Tests for tool registry

use async_trait::async_trait;
use engage_agent::tools::{to_provider_tool, DayOfWeekTool, ToolError, ToolRegistry, ToolTrait};
use engage_agent::AgentError;
use serde_json::{json, Value};

struct EchoTool;

#[async_trait]
impl ToolTrait for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let text = args["text"].as_str().ok_or("text is required")?;
        Ok(text.to_string())
    }
}

#[test]
fn test_registry_new() {
    let registry = ToolRegistry::new();
    assert!(registry.is_empty());
    assert!(registry.names().is_empty());
}

#[test]
fn test_registry_names_are_sorted() {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(DayOfWeekTool);
    assert_eq!(registry.names(), vec!["day_of_week", "echo"]);
}

#[test]
fn test_register_replaces_same_name() {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);
    registry.register(EchoTool);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_definitions() {
    let mut registry = ToolRegistry::new();
    registry.register(DayOfWeekTool);

    let definitions = registry.definitions();
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].function.name, "day_of_week");
    assert_eq!(definitions[0].tool_type, "function");
}

#[test]
fn test_to_provider_tool() {
    let tool = to_provider_tool(&EchoTool);
    assert_eq!(tool.function.description, "Echo the text argument.");
    assert_eq!(tool.function.parameters["required"], json!(["text"]));
}

#[tokio::test]
async fn test_execute() {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);

    let out = registry.execute("echo", json!({"text": "hi"})).await.unwrap();
    assert_eq!(out, "hi");
}

#[tokio::test]
async fn test_execute_failure_names_the_tool() {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool);

    let err = registry.execute("echo", json!({})).await.unwrap_err();
    assert!(matches!(err, AgentError::ToolExecution(_)));
    assert_eq!(err.to_string(), "tool failed: echo: text is required");
}

#[tokio::test]
async fn test_execute_missing_tool() {
    let registry = ToolRegistry::new();
    let err = registry.execute("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, AgentError::ToolNotFound(name) if name == "nope"));
}
