//! Mistral provider adapter
//!
//! Mistral's La Plateforme is OpenAI-compatible for chat and embeddings.

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
use crate::utils::error::{GatewayError, Result};

const DEFAULT_API_BASE: &str = "https://api.mistral.ai/v1";

/// Mistral adapter
#[derive(Debug, Default)]
pub struct MistralProvider;

impl MistralProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_key(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_key
            .clone()
            .or_else(|| shared::env_api_key(ProviderKind::Mistral))
            .ok_or_else(|| GatewayError::authentication("Mistral API key is required"))
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "mistral")
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![("Authorization".to_string(), format!("Bearer {}", api_key))]
    }
}

#[async_trait]
impl Provider for MistralProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mistral
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
        let model = self.upstream_model(model);
        model.starts_with("mistral-")
            || model.starts_with("mixtral-")
            || model.starts_with("open-mistral-")
            || model.starts_with("open-mixtral-")
            || model.starts_with("codestral-")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        let mut body =
            openai_compat::build_chat_body(request, self.upstream_model(&request.model));
        // Mistral rejects OpenAI-only knobs it never adopted
        if let Some(obj) = body.as_object_mut() {
            obj.remove("frequency_penalty");
            obj.remove("presence_penalty");
            obj.remove("user");
            obj.remove("seed");
        }
        Ok(body)
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
        let body = self.transform_request(request)?;

        openai_compat::execute_chat(
            self.name(),
            &url,
            &self.headers(&api_key),
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

        let mut body = self.transform_request(request)?;
        body["stream"] = serde_json::json!(true);

        openai_compat::execute_chat_stream(
            self.name(),
            &url,
            &self.headers(&api_key),
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
        let api_key = self.resolve_key(creds)?;
        let url = format!("{}/embeddings", self.base_url(creds));
        let body =
            openai_compat::build_embedding_body(request, self.upstream_model(&request.model));

        openai_compat::execute_embedding(
            self.name(),
            &url,
            &self.headers(&api_key),
            body,
            creds.timeout_or(shared::DEFAULT_TIMEOUT),
            &request.model,
        )
        .await
    }
}
