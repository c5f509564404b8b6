//! Provider adapters
//!
//! Each adapter translates the gateway's normalized request/response/stream
//! format to and from one upstream provider's wire protocol, executes the
//! HTTP call, and classifies errors into the gateway taxonomy.

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod cohere;
pub mod gemini;
pub mod groq;
pub mod mistral;
pub mod ollama;
pub mod openai;
pub mod openai_compat;
pub mod registry;
pub mod shared;
pub mod vllm;

pub use registry::ProviderRegistry;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use crate::core::types::{
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelType,
    StreamChunk,
};
use crate::utils::error::{GatewayError, Result};

/// Lazy finite sequence of normalized stream chunks. Not restartable.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Upstream provider families served by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Azure,
    Bedrock,
    Gemini,
    Cohere,
    Mistral,
    Groq,
    Vllm,
    Ollama,
}

impl ProviderKind {
    /// All known kinds, in registry iteration order
    pub const ALL: [ProviderKind; 10] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Azure,
        ProviderKind::Bedrock,
        ProviderKind::Gemini,
        ProviderKind::Cohere,
        ProviderKind::Mistral,
        ProviderKind::Groq,
        ProviderKind::Vllm,
        ProviderKind::Ollama,
    ];

    /// The `provider_type` string stored in the control plane
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Azure => "azure",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Groq => "groq",
            ProviderKind::Vllm => "vllm",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "azure" => Ok(ProviderKind::Azure),
            "bedrock" => Ok(ProviderKind::Bedrock),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "cohere" => Ok(ProviderKind::Cohere),
            "mistral" => Ok(ProviderKind::Mistral),
            "groq" => Ok(ProviderKind::Groq),
            "vllm" => Ok(ProviderKind::Vllm),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(GatewayError::config(format!(
                "Unknown provider type: {}",
                other
            ))),
        }
    }
}

/// Capability set declared by each adapter
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub chat: bool,
    pub streaming: bool,
    pub embeddings: bool,
    pub tools: bool,
    pub vision: bool,
    pub json_mode: bool,
    /// Model types this adapter can serve
    pub model_types: &'static [ModelType],
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            chat: true,
            streaming: true,
            embeddings: false,
            tools: false,
            vision: false,
            json_mode: false,
            model_types: &[ModelType::Chat],
        }
    }
}

/// Credentials and overrides resolved for one dispatch.
///
/// Deployment-level fields have already won over provider-level ones by the
/// time this struct is built; adapters fall back to their environment
/// variable only when `api_key` is absent.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub settings: HashMap<String, Value>,
    pub timeout: Option<Duration>,
}

impl ProviderCredentials {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// A string-valued setting (e.g. `api_version`, `region`)
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    /// Effective per-dispatch timeout
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("kind", &self.kind()).finish()
    }
}

/// The adapter contract. One implementation per upstream provider family.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider kind served by this adapter
    fn kind(&self) -> ProviderKind;

    /// Stable provider name for logs and spend records
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Declared capability set
    fn capabilities(&self) -> ProviderCapabilities;

    /// Whether this adapter recognizes the given model name
    fn supports_model(&self, model: &str) -> bool;

    /// Pure request translation to the provider wire body.
    ///
    /// Image blocks must already be resolved to data URIs; the async chat
    /// path downloads remote URLs before calling this.
    fn transform_request(&self, request: &CompletionRequest) -> Result<Value>;

    /// Pure response translation from the provider wire body
    fn transform_response(&self, body: &Value, model: &str) -> Result<CompletionResponse>;

    /// Pure stream-event translation; `None` means the event is skipped
    fn transform_chunk(&self, chunk: &Value, model: &str) -> Result<Option<StreamChunk>>;

    /// Unary chat completion
    async fn chat(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<CompletionResponse>;

    /// Streaming chat completion
    async fn chat_stream(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<ChunkStream>;

    /// Embedding request; most adapters do not serve embeddings
    async fn embed(
        &self,
        _request: &EmbeddingRequest,
        _creds: &ProviderCredentials,
    ) -> Result<EmbeddingResponse> {
        Err(GatewayError::bad_request(format!(
            "Provider {} does not support embeddings",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_string_roundtrip() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_google_alias() {
        assert_eq!(
            ProviderKind::from_str("google").unwrap(),
            ProviderKind::Gemini
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(ProviderKind::from_str("petals").is_err());
    }
}
