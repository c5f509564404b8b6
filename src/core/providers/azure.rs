//! Azure OpenAI provider adapter
//!
//! Same wire format as OpenAI, but the endpoint embeds the deployment name
//! and authentication uses the `api-key` header plus an `api-version` query
//! parameter. The upstream model name doubles as the Azure deployment name.

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

const DEFAULT_API_VERSION: &str = "2024-06-01";

/// Azure OpenAI adapter
#[derive(Debug, Default)]
pub struct AzureProvider;

impl AzureProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_key(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_key
            .clone()
            .or_else(|| shared::env_api_key(ProviderKind::Azure))
            .ok_or_else(|| GatewayError::authentication("Azure OpenAI API key is required"))
    }

    fn endpoint(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_base
            .clone()
            .or_else(|| std::env::var("AZURE_OPENAI_ENDPOINT").ok())
            .map(|base| base.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                GatewayError::config(
                    "Azure OpenAI endpoint is required (api_base or AZURE_OPENAI_ENDPOINT)",
                )
            })
    }

    fn api_version<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.setting("api_version").unwrap_or(DEFAULT_API_VERSION)
    }

    fn deployment<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "azure")
    }

    fn url(&self, creds: &ProviderCredentials, model: &str, operation: &str) -> Result<String> {
        Ok(format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint(creds)?,
            self.deployment(model),
            operation,
            self.api_version(creds)
        ))
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![("api-key".to_string(), api_key.to_string())]
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Azure
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
        // Azure deployments carry arbitrary names; only the prefix form is
        // recognizable without the control plane.
        model.starts_with("azure/")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        // The deployment name lives in the URL; Azure ignores a body model,
        // but sending the deployment keeps request logs consistent.
        Ok(openai_compat::build_chat_body(
            request,
            self.deployment(&request.model),
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
        let url = self.url(creds, &request.model, "chat/completions")?;
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
        let url = self.url(creds, &request.model, "chat/completions")?;

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
        let url = self.url(creds, &request.model, "embeddings")?;
        let body = openai_compat::build_embedding_body(request, self.deployment(&request.model));

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_shape() {
        let provider = AzureProvider::new();
        let mut creds = ProviderCredentials::with_api_key("key");
        creds.api_base = Some("https://myorg.openai.azure.com/".into());
        creds.settings.insert(
            "api_version".into(),
            serde_json::json!("2024-02-15-preview"),
        );

        let url = provider
            .url(&creds, "azure/gpt4-prod", "chat/completions")
            .unwrap();
        assert_eq!(
            url,
            "https://myorg.openai.azure.com/openai/deployments/gpt4-prod/chat/completions?api-version=2024-02-15-preview"
        );
    }

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let provider = AzureProvider::new();
        std::env::remove_var("AZURE_OPENAI_ENDPOINT");
        let creds = ProviderCredentials::with_api_key("key");
        assert!(provider.endpoint(&creds).is_err());
    }
}
