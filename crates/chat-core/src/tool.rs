//! Tool System
//!
//! Every chat command is a tool. Tools are registered at startup and
//! invoked by the transport with the arguments collected from the user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ChatError, Result};
use crate::session::ChatId;

/// Tool call request from the chat transport
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool identifier
    pub name: String,

    /// Chat the call originates from
    pub chat_id: ChatId,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: HashMap<String, serde_json::Value>,

    /// Optional call ID for tracking
    #[serde(default)]
    pub id: Option<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, chat_id: ChatId) -> Self {
        Self {
            name: name.into(),
            chat_id,
            arguments: HashMap::new(),
            id: None,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(key.into(), value);
        self
    }

    /// String argument
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(|v| v.as_str())
    }

    /// Integer argument, accepting both JSON numbers and numeric strings
    pub fn i64_arg(&self, key: &str) -> Option<i64> {
        self.arguments.get(key).and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// Raw textual form of a numeric argument.
    ///
    /// Chat input is text, so decimal amounts are kept as strings to avoid
    /// a lossy trip through `f64`.
    pub fn number_text(&self, key: &str) -> Option<String> {
        self.arguments.get(key).and_then(|v| match v {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) => Some(s.trim().replace(',', ".")),
            _ => None,
        })
    }

    /// Argument that must be present
    pub fn required_str(&self, key: &str) -> Result<&str> {
        self.str_arg(key)
            .ok_or_else(|| ChatError::ToolValidation(format!("'{key}' is required")))
    }
}

/// Reply to a tool call.
///
/// A failed result is a normal reply the user should see (unknown ticker,
/// not enough shares); malformed calls are `ChatError`s instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,

    /// Echo of `ToolCall::id`
    pub id: Option<String>,
    pub success: bool,

    /// Text for the chat reply
    pub output: String,

    /// Machine-readable payload for adapters that render their own views
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: true,
            output: output.into(),
            data: None,
        }
    }

    pub fn failure(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(name, reason)
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// One argument a tool accepts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,

    /// JSON type name as the chat adapter should prompt for it
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Closed set of accepted values, checked by `Tool::validate`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
}

impl ParameterSchema {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
            enum_values: None,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| serde_json::json!(v)).collect());
        self
    }
}

/// Tool definition schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description
    pub description: String,

    pub parameters: Vec<ParameterSchema>,

    /// Menu section the adapter lists the tool under
    #[serde(default)]
    pub category: Option<String>,

    /// Whether calling the tool changes the ledger
    #[serde(default)]
    pub has_side_effects: bool,
}

/// Tool trait - implement to add new chat commands
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    /// Run the call; domain failures come back as `ToolResult::failure`
    async fn execute(&self, call: &ToolCall) -> Result<ToolResult>;

    /// Check required arguments and enum values against the schema
    fn validate(&self, call: &ToolCall) -> Result<()> {
        let schema = self.schema();

        for param in &schema.parameters {
            if param.required && !call.arguments.contains_key(&param.name) {
                return Err(ChatError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }

            if let (Some(allowed), Some(value)) =
                (&param.enum_values, call.arguments.get(&param.name))
            {
                if !allowed.contains(value) {
                    return Err(ChatError::ToolValidation(format!(
                        "Unsupported value {value} for {}",
                        param.name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Registry for available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Add a tool under its schema name, replacing any previous one
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let schema = tool.schema();
        self.tools.insert(schema.name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Validate the call against the tool's schema, run it and tag the reply with the call id
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ChatError::ToolNotFound(call.name.clone()))?;

        tool.validate(call)?;

        let result = tool.execute(call).await?;
        Ok(match &call.id {
            Some(id) => result.with_id(id.clone()),
            None => result,
        })
    }

    /// Get all tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Registered names in no particular order
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".into(),
                description: "Echo the text back".into(),
                parameters: vec![
                    ParameterSchema::required("text", "string", "Text to echo"),
                    ParameterSchema::optional("mode", "string", "Output mode")
                        .with_enum(&["plain", "upper"]),
                ],
                category: None,
                has_side_effects: false,
            }
        }

        async fn execute(&self, call: &ToolCall) -> Result<ToolResult> {
            let text = call.required_str("text")?;
            let output = match call.str_arg("mode") {
                Some("upper") => text.to_uppercase(),
                _ => text.to_string(),
            };
            Ok(ToolResult::success("echo", output))
        }
    }

    #[tokio::test]
    async fn test_registry_executes_and_tags_id() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let mut call = ToolCall::new("echo", 7)
            .with_arg("text", serde_json::json!("hi"))
            .with_arg("mode", serde_json::json!("upper"));
        call.id = Some("call-1".into());

        let result = registry.execute(&call).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "HI");
        assert_eq!(result.id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn test_registry_rejects_missing_and_unknown() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let missing = ToolCall::new("echo", 7);
        assert!(matches!(
            registry.execute(&missing).await,
            Err(ChatError::ToolValidation(_))
        ));

        let bad_enum = ToolCall::new("echo", 7)
            .with_arg("text", serde_json::json!("x"))
            .with_arg("mode", serde_json::json!("shout"));
        assert!(matches!(
            registry.execute(&bad_enum).await,
            Err(ChatError::ToolValidation(_))
        ));

        let unknown = ToolCall::new("nope", 7);
        assert!(matches!(
            registry.execute(&unknown).await,
            Err(ChatError::ToolNotFound(_))
        ));
    }

    #[test]
    fn test_numeric_args_accept_text() {
        let call = ToolCall::new("x", 1)
            .with_arg("page", serde_json::json!("3"))
            .with_arg("sum", serde_json::json!("1000,50"))
            .with_arg("qty", serde_json::json!(12));

        assert_eq!(call.i64_arg("page"), Some(3));
        assert_eq!(call.i64_arg("qty"), Some(12));
        assert_eq!(call.number_text("sum").as_deref(), Some("1000.50"));
        assert!(call.i64_arg("missing").is_none());
    }
}
