//! Ollama provider adapter
//!
//! Talks to a local Ollama daemon over `/api/chat` (newline-delimited JSON
//! streaming) and `/api/embeddings`. No authentication, always zero-cost.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::core::providers::{
    shared, ChunkStream, Provider, ProviderCapabilities, ProviderCredentials, ProviderKind,
};
use crate::core::types::{
    ChatMessage, Choice, CompletionRequest, CompletionResponse, ContentPart, EmbeddingRequest,
    EmbeddingResponse, FinishReason, MessageContent, MessageRole, ModelType, StreamChunk, Usage,
};
use crate::utils::error::{GatewayError, Result};
use crate::utils::vision;

const DEFAULT_API_BASE: &str = "http://localhost:11434";

/// Ollama adapter
#[derive(Debug, Default)]
pub struct OllamaProvider;

impl OllamaProvider {
    pub fn new() -> Self {
        Self
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "ollama")
    }

    /// Ollama messages are flat text plus an optional base64 `images` list
    fn convert_message(&self, message: &ChatMessage) -> Result<Value> {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            // No tool role on this wire; results read best as user turns
            MessageRole::Tool => "user",
        };

        let mut text = String::new();
        let mut images: Vec<String> = Vec::new();

        match &message.content {
            Some(MessageContent::Text(content)) => text = content.clone(),
            Some(MessageContent::Parts(parts)) => {
                for part in parts {
                    match part {
                        ContentPart::Text { text: fragment } => text.push_str(fragment),
                        ContentPart::ImageUrl { image_url } => {
                            let (_, data) = vision::parse_data_url(&image_url.url)?;
                            images.push(data);
                        }
                    }
                }
            }
            None => {}
        }

        let mut converted = json!({"role": role, "content": text});
        if !images.is_empty() {
            converted["images"] = json!(images);
        }
        Ok(converted)
    }

    fn parse_usage(&self, body: &Value) -> Usage {
        let prompt = body["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
        let completion = body["eval_count"].as_u64().unwrap_or(0) as u32;
        Usage::new(prompt, completion)
    }

    fn connection_hint(&self, creds: &ProviderCredentials, err: GatewayError) -> GatewayError {
        match err {
            GatewayError::Connection(message) => GatewayError::connection(format!(
                "Failed to connect to Ollama server at {}. Make sure Ollama is running: {}",
                self.base_url(creds),
                message
            )),
            other => other,
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            embeddings: true,
            vision: true,
            model_types: &[ModelType::Chat, ModelType::Embedding],
            ..Default::default()
        }
    }

    fn supports_model(&self, model: &str) -> bool {
        // A local daemon can serve any tag; only the prefixed form is
        // recognizable without asking it.
        model.starts_with("ollama/")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        let messages = request
            .messages
            .iter()
            .map(|m| self.convert_message(m))
            .collect::<Result<Vec<_>>>()?;

        let mut options = json!({});
        if let Some(temperature) = request.temperature {
            options["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            options["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.effective_max_tokens() {
            options["num_predict"] = json!(max_tokens);
        }
        if let Some(stop) = &request.stop {
            options["stop"] = json!(stop.to_vec());
        }

        let mut body = json!({
            "model": self.upstream_model(&request.model),
            "messages": messages,
            "stream": false,
        });
        if options.as_object().map_or(false, |o| !o.is_empty()) {
            body["options"] = options;
        }

        Ok(body)
    }

    fn transform_response(&self, body: &Value, model: &str) -> Result<CompletionResponse> {
        let content = body
            .pointer("/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        let finish_reason = if body["done"].as_bool().unwrap_or(false) {
            Some(FinishReason::Stop)
        } else {
            None
        };

        Ok(CompletionResponse {
            id: format!("ollama-{}", uuid::Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(content),
                finish_reason,
            }],
            usage: Some(self.parse_usage(body)),
            provider: Some(self.name().to_string()),
            hidden_params: Default::default(),
        })
    }

    fn transform_chunk(&self, chunk: &Value, model: &str) -> Result<Option<StreamChunk>> {
        if chunk["done"].as_bool().unwrap_or(false) {
            return Ok(Some(StreamChunk::terminal(
                "",
                model,
                FinishReason::Stop,
                Some(self.parse_usage(chunk)),
            )));
        }

        let content = chunk.pointer("/message/content").and_then(|c| c.as_str());
        Ok(content
            .filter(|c| !c.is_empty())
            .map(|content| StreamChunk::content("", model, content, false)))
    }

    async fn chat(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<CompletionResponse> {
        let url = format!("{}/api/chat", self.base_url(creds));
        let body = self.transform_request(request)?;

        let response = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.connection_hint(creds, shared::transport_error(e)))?;

        if !response.status().is_success() {
            return Err(shared::error_from_response(self.name(), response).await);
        }

        let body: Value = response.json().await.map_err(shared::transport_error)?;
        self.transform_response(&body, &request.model)
    }

    async fn chat_stream(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<ChunkStream> {
        let url = format!("{}/api/chat", self.base_url(creds));

        let mut body = self.transform_request(request)?;
        body["stream"] = json!(true);

        let response = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.connection_hint(creds, shared::transport_error(e)))?;

        if !response.status().is_success() {
            return Err(shared::error_from_response(self.name(), response).await);
        }

        let model = request.model.clone();
        let provider = self.name();
        let this = Self::new();
        let stream_id = format!("ollama-{}", uuid::Uuid::new_v4());

        let stream = try_stream! {
            let lines = shared::ndjson_stream(response);
            futures::pin_mut!(lines);

            let mut first = true;
            while let Some(line) = lines.next().await {
                let value: Value = serde_json::from_str(&line?)
                    .map_err(|e| GatewayError::api(502, format!("malformed stream line: {}", e)))?;
                if let Some(mut chunk) = this.transform_chunk(&value, &model)? {
                    chunk.id = stream_id.clone();
                    chunk.provider = Some(provider.to_string());
                    if first {
                        if let Some(choice) = chunk.choices.first_mut() {
                            choice.delta.role = Some(MessageRole::Assistant);
                        }
                        first = false;
                    }
                    let done = chunk.finish_reason().is_some();
                    yield chunk;
                    if done {
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embed(
        &self,
        request: &EmbeddingRequest,
        creds: &ProviderCredentials,
    ) -> Result<EmbeddingResponse> {
        let url = format!("{}/api/embeddings", self.base_url(creds));
        let model = self.upstream_model(&request.model);

        let texts = request.input.texts();
        if texts.is_empty() {
            return Err(GatewayError::bad_request(
                "Ollama embeddings require text input",
            ));
        }

        // The daemon embeds one prompt per call
        let mut vectors = Vec::with_capacity(texts.len());
        for text in &texts {
            let response = shared::http_client()
                .post(&url)
                .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
                .json(&json!({"model": model, "prompt": text}))
                .send()
                .await
                .map_err(|e| self.connection_hint(creds, shared::transport_error(e)))?;

            if !response.status().is_success() {
                return Err(shared::error_from_response(self.name(), response).await);
            }

            let body: Value = response.json().await.map_err(shared::transport_error)?;
            let vector = body["embedding"]
                .as_array()
                .ok_or_else(|| GatewayError::api(502, "embedding response missing vector"))?
                .iter()
                .filter_map(|v| v.as_f64())
                .map(|v| v as f32)
                .collect();
            vectors.push(vector);
        }

        Ok(EmbeddingResponse::new(
            request.model.clone(),
            vectors,
            Usage::default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_options() {
        let provider = OllamaProvider::new();
        let request = CompletionRequest {
            model: "ollama/llama3".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.5),
            max_tokens: Some(32),
            ..Default::default()
        };

        let body = provider.transform_request(&request).unwrap();
        assert_eq!(body["model"], "llama3");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.5);
        assert_eq!(body["options"]["num_predict"], 32);
    }

    #[test]
    fn test_response_translation() {
        let provider = OllamaProvider::new();
        let body = json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "hello there"},
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 3
        });

        let response = provider.transform_response(&body, "ollama/llama3").unwrap();
        assert_eq!(
            response.choices[0].message.content.as_ref().unwrap().as_text(),
            "hello there"
        );
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_chunk_translation() {
        let provider = OllamaProvider::new();

        let partial = json!({"message": {"content": "hel"}, "done": false});
        let chunk = provider.transform_chunk(&partial, "m").unwrap().unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hel"));

        let done = json!({"done": true, "prompt_eval_count": 4, "eval_count": 2});
        let chunk = provider.transform_chunk(&done, "m").unwrap().unwrap();
        assert_eq!(chunk.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(chunk.usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn test_image_conversion() {
        let provider = OllamaProvider::new();
        let message = ChatMessage {
            role: MessageRole::User,
            content: Some(MessageContent::Parts(vec![
                ContentPart::Text { text: "what is this".into() },
                ContentPart::ImageUrl {
                    image_url: crate::core::types::ImageUrl {
                        url: "data:image/png;base64,aWNvbg==".into(),
                        detail: None,
                    },
                },
            ])),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        };

        let converted = provider.convert_message(&message).unwrap();
        assert_eq!(converted["content"], "what is this");
        assert_eq!(converted["images"][0], "aWNvbg==");
    }
}
