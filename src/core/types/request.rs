//! Completion and embedding request types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::types::message::ChatMessage;
use crate::core::types::tools::{ResponseFormat, Tool, ToolChoice};
use crate::utils::error::{GatewayError, Result};

/// Stop sequences: a single string or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    /// Normalize to a vector
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s.clone()],
            StopSequences::Many(v) => v.clone(),
        }
    }
}

/// Chat completion request following the OpenAI API format
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompletionRequest {
    /// Public model name (or "provider/model")
    pub model: String,
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature, 0.0..=2.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter, 0.0..=1.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Number of choices to return
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// Enable streaming
    #[serde(default)]
    pub stream: bool,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    /// Maximum tokens to generate (legacy parameter)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Maximum completion tokens (newer parameter; exclusive with max_tokens)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
    /// Presence penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// End-user identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Response format (JSON mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Seed for reproducible generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    /// Tool selection strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Parallel tool calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    /// Per-request timeout in seconds (gateway parameter, not forwarded)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Additional provider-specific parameters
    #[serde(flatten)]
    pub extra_params: HashMap<String, Value>,
}

impl CompletionRequest {
    /// Validate parameter bounds and mutual exclusions
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(GatewayError::bad_request("messages cannot be empty"));
        }

        for message in &self.messages {
            message.validate()?;
        }

        if self.max_tokens.is_some() && self.max_completion_tokens.is_some() {
            return Err(GatewayError::bad_request(
                "Only one of max_tokens and max_completion_tokens can be set",
            ));
        }

        if let Some(max_tokens) = self.max_tokens.or(self.max_completion_tokens) {
            if max_tokens == 0 {
                return Err(GatewayError::bad_request("max_tokens must be at least 1"));
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(GatewayError::bad_request(
                    "temperature must be between 0 and 2",
                ));
            }
        }

        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(GatewayError::bad_request("top_p must be between 0 and 1"));
            }
        }

        if let Some(n) = self.n {
            if n == 0 {
                return Err(GatewayError::bad_request("n must be at least 1"));
            }
        }

        Ok(())
    }

    /// Effective output-token cap, whichever parameter was used
    pub fn effective_max_tokens(&self) -> Option<u32> {
        self.max_tokens.or(self.max_completion_tokens)
    }
}

/// Embedding input: string, string list, or pre-tokenized ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Text(String),
    Texts(Vec<String>),
    Tokens(Vec<u32>),
    TokenBatches(Vec<Vec<u32>>),
}

impl EmbeddingInput {
    /// Flatten text inputs into a list (token inputs are passed through raw)
    pub fn texts(&self) -> Vec<String> {
        match self {
            EmbeddingInput::Text(s) => vec![s.clone()],
            EmbeddingInput::Texts(v) => v.clone(),
            _ => Vec::new(),
        }
    }
}

/// Embedding request following the OpenAI API format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Public model name
    pub model: String,
    /// Input text(s)
    pub input: EmbeddingInput,
    /// "float" or "base64"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    /// Output dimensionality override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    /// End-user identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        }
    }

    #[test]
    fn test_max_tokens_mutual_exclusion() {
        let mut req = minimal_request();
        req.max_tokens = Some(100);
        assert!(req.validate().is_ok());

        req.max_completion_tokens = Some(200);
        assert!(req.validate().is_err());

        req.max_tokens = None;
        assert!(req.validate().is_ok());
        assert_eq!(req.effective_max_tokens(), Some(200));
    }

    #[test]
    fn test_parameter_bounds() {
        let mut req = minimal_request();
        req.temperature = Some(2.5);
        assert!(req.validate().is_err());

        req.temperature = Some(2.0);
        assert!(req.validate().is_ok());

        req.top_p = Some(1.5);
        assert!(req.validate().is_err());

        req.top_p = Some(0.9);
        assert!(req.validate().is_ok());

        req.n = Some(0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_empty_messages_rejected() {
        let req = CompletionRequest {
            model: "gpt-4o-mini".into(),
            ..Default::default()
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_stop_normalization() {
        let one = StopSequences::One("\n".into());
        assert_eq!(one.to_vec(), vec!["\n".to_string()]);

        let many = StopSequences::Many(vec!["a".into(), "b".into()]);
        assert_eq!(many.to_vec().len(), 2);
    }

    #[test]
    fn test_extra_params_flatten() {
        let req: CompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[{"role":"user","content":"x"}],"top_k":40}"#,
        )
        .unwrap();
        assert_eq!(req.extra_params.get("top_k").unwrap(), 40);
    }
}
