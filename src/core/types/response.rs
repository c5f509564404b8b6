//! Completion response and stream chunk types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::types::message::{ChatMessage, MessageRole};
use crate::core::types::tools::ToolCall;

/// Normalized finish reasons. Every adapter maps its native values into
/// this set; anything unrecognized becomes `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

/// Token usage reported by the provider. Counts are taken verbatim; the
/// gateway does not estimate tokens post-hoc for chat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Tokens served from the provider prompt cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u32>,
    /// Tokens written to the provider prompt cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u32>,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cache_read_input_tokens: None,
            cache_creation_input_tokens: None,
        }
    }
}

/// One completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: Option<FinishReason>,
}

/// Advisory fields attached by adapters, not part of the public wire body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiddenParams {
    /// Advisory cost stamp; authoritative recording happens in the spend
    /// pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_cost: Option<rust_decimal::Decimal>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Chat completion response following the OpenAI API format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Which provider served the request (gateway extension)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip)]
    pub hidden_params: HiddenParams,
}

impl CompletionResponse {
    pub fn new(id: String, model: String, choices: Vec<Choice>, usage: Option<Usage>) -> Self {
        Self {
            id,
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model,
            choices,
            usage,
            provider: None,
            hidden_params: HiddenParams::default(),
        }
    }
}

/// Delta payload inside a stream choice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<MessageRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// One choice inside a stream chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    pub index: u32,
    pub delta: DeltaMessage,
    pub finish_reason: Option<FinishReason>,
}

/// One streaming chunk. Usage appears only on the terminal chunk, when the
/// provider reports it at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<StreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl StreamChunk {
    /// Content-bearing chunk
    pub fn content(id: &str, model: &str, text: &str, first: bool) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: DeltaMessage {
                    role: first.then_some(MessageRole::Assistant),
                    content: Some(text.to_string()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
            provider: None,
        }
    }

    /// Terminal chunk with a concrete finish reason
    pub fn terminal(id: &str, model: &str, finish_reason: FinishReason, usage: Option<Usage>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: DeltaMessage::default(),
                finish_reason: Some(finish_reason),
            }],
            usage,
            provider: None,
        }
    }

    /// The finish reason of the first choice, if this is a terminal chunk
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }
}

/// One embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingData {
    pub object: String,
    pub index: u32,
    pub embedding: Vec<f32>,
}

/// Embedding response following the OpenAI API format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub object: String,
    pub model: String,
    pub data: Vec<EmbeddingData>,
    pub usage: Usage,
}

impl EmbeddingResponse {
    pub fn new(model: String, vectors: Vec<Vec<f32>>, usage: Usage) -> Self {
        Self {
            object: "list".to_string(),
            model,
            data: vectors
                .into_iter()
                .enumerate()
                .map(|(index, embedding)| EmbeddingData {
                    object: "embedding".to_string(),
                    index: index as u32,
                    embedding,
                })
                .collect(),
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            "\"tool_calls\""
        );
        assert_eq!(
            serde_json::to_string(&FinishReason::ContentFilter).unwrap(),
            "\"content_filter\""
        );
        let parsed: FinishReason = serde_json::from_str("\"length\"").unwrap();
        assert_eq!(parsed, FinishReason::Length);
    }

    #[test]
    fn test_usage_totals() {
        let usage = Usage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn test_hidden_params_not_serialized() {
        let mut response = CompletionResponse::new(
            "chatcmpl-1".into(),
            "gpt-4o-mini".into(),
            vec![],
            Some(Usage::new(1, 1)),
        );
        response.hidden_params.response_cost = Some(rust_decimal::Decimal::new(15, 6));

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("hidden_params").is_none());
    }

    #[test]
    fn test_chunk_helpers() {
        let chunk = StreamChunk::content("id-1", "m", "hello", true);
        assert_eq!(chunk.choices[0].delta.role, Some(MessageRole::Assistant));
        assert!(chunk.finish_reason().is_none());

        let terminal =
            StreamChunk::terminal("id-1", "m", FinishReason::Stop, Some(Usage::new(3, 4)));
        assert_eq!(terminal.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(terminal.usage.as_ref().unwrap().total_tokens, 7);
    }
}
