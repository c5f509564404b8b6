//! Message types for chat completions

use serde::{Deserialize, Serialize};

use crate::core::types::tools::ToolCall;
use crate::utils::error::{GatewayError, Result};

/// Message role enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Tool result message
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Image reference inside a content block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    /// Data URI or remote HTTP(S) URL
    pub url: String,
    /// Detail hint (auto, low, high)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// One block of multimodal content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text
    Text { text: String },
    /// Image by URL or data URI
    ImageUrl { image_url: ImageUrl },
}

/// Message content: a bare string or an ordered block sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content
    Text(String),
    /// Multi-part content
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten to plain text (image blocks are dropped)
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Whether any block carries an image
    pub fn has_images(&self) -> bool {
        matches!(self, MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })))
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Chat message following the OpenAI wire shape. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role
    pub role: MessageRole,
    /// Message content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    /// Name of the message sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls issued by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call this message responds to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Validate structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.role == MessageRole::Tool && self.tool_call_id.is_none() {
            return Err(GatewayError::bad_request(
                "tool messages must have tool_call_id",
            ));
        }
        Ok(())
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(content: impl Into<MessageContent>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_message_requires_tool_call_id() {
        let msg = ChatMessage {
            role: MessageRole::Tool,
            content: Some("result".into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        };
        assert!(msg.validate().is_err());

        let msg = ChatMessage::tool("result", "call_abc");
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_content_deserializes_both_shapes() {
        let plain: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(plain.content.unwrap().as_text(), "hi");

        let multi: ChatMessage = serde_json::from_str(
            r#"{"role":"user","content":[
                {"type":"text","text":"look at"},
                {"type":"image_url","image_url":{"url":"https://example.com/a.png"}}
            ]}"#,
        )
        .unwrap();
        let content = multi.content.unwrap();
        assert!(content.has_images());
        assert_eq!(content.as_text(), "look at");
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
        let role: MessageRole = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, MessageRole::Tool);
    }
}
