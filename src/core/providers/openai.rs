//! OpenAI provider adapter

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

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI adapter. The wire format is the gateway's canonical format, so
/// the transforms are close to pass-through.
#[derive(Debug, Default)]
pub struct OpenAiProvider;

impl OpenAiProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_key(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_key
            .clone()
            .or_else(|| shared::env_api_key(ProviderKind::OpenAi))
            .ok_or_else(|| GatewayError::authentication("OpenAI API key is required"))
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", api_key),
        )]
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "openai")
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            embeddings: true,
            tools: true,
            vision: true,
            json_mode: true,
            model_types: &[ModelType::Chat, ModelType::Embedding],
            ..Default::default()
        }
    }

    fn supports_model(&self, model: &str) -> bool {
        let model = self.upstream_model(model);
        model.starts_with("gpt-")
            || model.starts_with("o1")
            || model.starts_with("chatgpt-")
            || model.starts_with("text-embedding-")
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
        // Ask for usage on the final chunk so spend can be recorded
        body["stream_options"] = serde_json::json!({"include_usage": true});

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
