//! vLLM provider adapter
//!
//! Self-hosted vLLM servers expose the OpenAI surface, usually without
//! authentication. Requests are zero-cost in the pricing table.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::providers::{
    openai_compat, shared, ChunkStream, Provider, ProviderCapabilities, ProviderCredentials,
    ProviderKind,
};
use crate::core::types::{
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelType,
    StreamChunk,
};
use crate::utils::error::Result;

const DEFAULT_API_BASE: &str = "http://localhost:8000/v1";

/// vLLM adapter
#[derive(Debug, Default)]
pub struct VllmProvider;

impl VllmProvider {
    pub fn new() -> Self {
        Self
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "vllm")
    }

    /// Bearer header only when a key was configured; bare servers need none
    fn headers(&self, creds: &ProviderCredentials) -> Vec<(String, String)> {
        creds
            .api_key
            .as_ref()
            .map(|key| vec![("Authorization".to_string(), format!("Bearer {}", key))])
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for VllmProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Vllm
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            embeddings: true,
            tools: true,
            json_mode: true,
            model_types: &[ModelType::Chat, ModelType::Embedding],
            ..Default::default()
        }
    }

    fn supports_model(&self, model: &str) -> bool {
        // Without the control plane only the prefixed form is recognizable;
        // vLLM serves arbitrary model ids.
        model.starts_with("vllm/")
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
        let url = format!("{}/chat/completions", self.base_url(creds));
        let body = self.transform_request(request)?;

        openai_compat::execute_chat(
            self.name(),
            &url,
            &self.headers(creds),
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
        let url = format!("{}/chat/completions", self.base_url(creds));

        let mut body = self.transform_request(request)?;
        body["stream"] = serde_json::json!(true);

        openai_compat::execute_chat_stream(
            self.name(),
            &url,
            &self.headers(creds),
            body,
            creds.timeout_or(shared::DEFAULT_TIMEOUT),
            &request.model,
        )
        .await
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        creds: &ProviderCredentials,
    ) -> Result<EmbeddingResponse> {
        let url = format!("{}/embeddings", self.base_url(creds));
        let body =
            openai_compat::build_embedding_body(request, self.upstream_model(&request.model));

        openai_compat::execute_embedding(
            self.name(),
            &url,
            &self.headers(creds),
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
    fn test_no_auth_header_without_key() {
        let provider = VllmProvider::new();
        assert!(provider.headers(&ProviderCredentials::default()).is_empty());

        let creds = ProviderCredentials::with_api_key("token");
        let headers = provider.headers(&creds);
        assert_eq!(headers[0].1, "Bearer token");
    }

    #[test]
    fn test_default_base_url() {
        let provider = VllmProvider::new();
        assert_eq!(
            provider.base_url(&ProviderCredentials::default()),
            "http://localhost:8000/v1"
        );
    }
}
