//! Groq provider adapter
//!
//! Groq exposes an OpenAI-compatible surface at its own base URL.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::providers::{
    openai_compat, shared, ChunkStream, Provider, ProviderCapabilities, ProviderCredentials,
    ProviderKind,
};
use crate::core::types::{CompletionRequest, CompletionResponse, StreamChunk};
use crate::utils::error::{GatewayError, Result};

const DEFAULT_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Groq adapter
#[derive(Debug, Default)]
pub struct GroqProvider;

impl GroqProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_key(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_key
            .clone()
            .or_else(|| shared::env_api_key(ProviderKind::Groq))
            .ok_or_else(|| GatewayError::authentication("Groq API key is required"))
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "groq")
    }
}

#[async_trait]
impl Provider for GroqProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Groq
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tools: true,
            json_mode: true,
            ..Default::default()
        }
    }

    fn supports_model(&self, model: &str) -> bool {
        let model = self.upstream_model(model);
        model.starts_with("llama-3") || model.starts_with("llama3-") || model.starts_with("gemma")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        Ok(openai_compat::build_chat_body(
            request,
            self.upstream_model(&request.model),
        ))
    }

    fn transform_response(&self, body: &Value, model: &str) -> Result<CompletionResponse> {
        openai_compat::parse_chat_response(body, model)
    }

    fn transform_chunk(&self, chunk: &Value, model: &str) -> Result<Option<StreamChunk>> {
        openai_compat::parse_chunk(chunk, model)
    }

    async fn chat(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<CompletionResponse> {
        let api_key = self.resolve_key(creds)?;
        let url = format!("{}/chat/completions", self.base_url(creds));
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", api_key))];
        let body = self.transform_request(request)?;

        openai_compat::execute_chat(
            self.name(),
            &url,
            &headers,
            body,
            creds.timeout_or(shared::DEFAULT_TIMEOUT),
            &request.model,
        )
        .await
    }

    async fn chat_stream(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<ChunkStream> {
        let api_key = self.resolve_key(creds)?;
        let url = format!("{}/chat/completions", self.base_url(creds));
        let headers = vec![("Authorization".to_string(), format!("Bearer {}", api_key))];

        let mut body = self.transform_request(request)?;
        body["stream"] = serde_json::json!(true);

        openai_compat::execute_chat_stream(
            self.name(),
            &url,
            &headers,
            body,
            creds.timeout_or(shared::DEFAULT_TIMEOUT),
            &request.model,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_model() {
        let provider = GroqProvider::new();
        assert!(provider.supports_model("llama-3.1-70b-versatile"));
        assert!(provider.supports_model("groq/gemma-7b-it"));
        assert!(!provider.supports_model("gpt-4o"));
    }
}
