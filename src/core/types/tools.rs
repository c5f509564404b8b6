//! Tool calling and response format types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Function definition carried inside a tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Tool definition (only `function` tools exist on this wire)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Tool type, always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function
    pub function: FunctionDef,
}

impl Tool {
    pub fn function(function: FunctionDef) -> Self {
        Self {
            tool_type: "function".to_string(),
            function,
        }
    }
}

/// A tool call emitted by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id
    pub id: String,
    /// Call type, always "function"
    #[serde(rename = "type")]
    pub call_type: String,
    /// The invoked function with JSON-encoded arguments
    pub function: FunctionCall,
}

/// Function name plus serialized arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON string, exactly as the provider emitted it
    pub arguments: String,
}

/// Tool selection strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// "none", "auto", or "required"
    Mode(String),
    /// A specific tool: {"type":"function","function":{"name":...}}
    Specific {
        #[serde(rename = "type")]
        choice_type: String,
        function: NamedFunction,
    },
}

/// Bare function name used by a specific tool choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedFunction {
    pub name: String,
}

impl ToolChoice {
    /// The specific tool name, if one was forced
    pub fn forced_name(&self) -> Option<&str> {
        match self {
            ToolChoice::Specific { function, .. } => Some(&function.name),
            ToolChoice::Mode(_) => None,
        }
    }
}

/// Response format specification (JSON mode)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFormat {
    /// "text", "json_object", or "json_schema"
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_choice_shapes() {
        let auto: ToolChoice = serde_json::from_str("\"auto\"").unwrap();
        assert!(auto.forced_name().is_none());

        let specific: ToolChoice = serde_json::from_str(
            r#"{"type":"function","function":{"name":"get_weather"}}"#,
        )
        .unwrap();
        assert_eq!(specific.forced_name(), Some("get_weather"));
    }

    #[test]
    fn test_tool_roundtrip() {
        let tool = Tool::function(FunctionDef {
            name: "lookup".into(),
            description: Some("Lookup a record".into()),
            parameters: Some(serde_json::json!({"type": "object", "properties": {}})),
        });
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "lookup");
    }
}
