//! AWS Bedrock provider adapter
//!
//! Invokes `bedrock-runtime` with SigV4-signed requests. The request body
//! shape depends on the model family (`anthropic.`, `meta.`, `mistral.`);
//! short model names are expanded to full Bedrock model ids. Streaming is
//! served by invoking the unary endpoint and re-emitting the result as
//! chunks, since the binary AWS event-stream framing is not worth a
//! dependency for the models this gateway fronts.

use async_stream::try_stream;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::providers::{
    shared, ChunkStream, Provider, ProviderCapabilities, ProviderCredentials, ProviderKind,
};
use crate::core::types::{
    ChatMessage, Choice, CompletionRequest, CompletionResponse, FinishReason, MessageContent,
    MessageRole, StreamChunk, Usage,
};
use crate::utils::error::{GatewayError, Result};
use crate::utils::sigv4::{self, AwsCredentials};

/// Bedrock adapter
#[derive(Debug, Default)]
pub struct BedrockProvider;

impl BedrockProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_credentials(&self, creds: &ProviderCredentials) -> Result<AwsCredentials> {
        // Deployment settings may carry explicit AWS credentials; the
        // environment is the fallback, as for every other adapter.
        match (creds.setting("aws_access_key_id"), creds.setting("aws_secret_access_key")) {
            (Some(access_key), Some(secret_key)) => Ok(AwsCredentials {
                access_key_id: access_key.to_string(),
                secret_access_key: secret_key.to_string(),
                session_token: creds.setting("aws_session_token").map(String::from),
                region: creds
                    .setting("region")
                    .map(String::from)
                    .or_else(|| std::env::var("AWS_REGION").ok())
                    .ok_or_else(|| {
                        GatewayError::authentication("AWS region not configured. Set AWS_REGION")
                    })?,
            }),
            _ => {
                let mut resolved = AwsCredentials::from_env()?;
                if let Some(region) = creds.setting("region") {
                    resolved.region = region.to_string();
                }
                Ok(resolved)
            }
        }
    }

    fn model_id(&self, model: &str) -> String {
        let model = shared::strip_model_prefix(model, "bedrock");

        // Full model ids pass through untouched
        if model.contains('.') {
            return model.to_string();
        }

        match model {
            "claude-3-opus" => "anthropic.claude-3-opus-20240229-v1:0",
            "claude-3-sonnet" => "anthropic.claude-3-sonnet-20240229-v1:0",
            "claude-3-5-sonnet" => "anthropic.claude-3-5-sonnet-20240620-v1:0",
            "claude-3-haiku" => "anthropic.claude-3-haiku-20240307-v1:0",
            "claude-instant" => "anthropic.claude-instant-v1",
            "claude-v2" => "anthropic.claude-v2",
            "llama3-8b" => "meta.llama3-8b-instruct-v1:0",
            "llama3-70b" => "meta.llama3-70b-instruct-v1:0",
            "mistral-7b" => "mistral.mistral-7b-instruct-v0:2",
            "mixtral-8x7b" => "mistral.mixtral-8x7b-instruct-v0:1",
            "mistral-large" => "mistral.mistral-large-2402-v1:0",
            other => other,
        }
        .to_string()
    }

    fn messages_to_prompt(&self, messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            let text = message
                .content
                .as_ref()
                .map(MessageContent::as_text)
                .unwrap_or_default();
            match message.role {
                MessageRole::System => prompt.push_str(&format!("System: {}\n", text)),
                MessageRole::User | MessageRole::Tool => {
                    prompt.push_str(&format!("User: {}\n", text))
                }
                MessageRole::Assistant => prompt.push_str(&format!("Assistant: {}\n", text)),
            }
        }
        prompt.push_str("Assistant:");
        prompt
    }

    fn transform_anthropic_request(&self, request: &CompletionRequest) -> Value {
        let mut system_text: Option<String> = None;
        let mut messages = Vec::new();

        for message in &request.messages {
            let text = message
                .content
                .as_ref()
                .map(MessageContent::as_text)
                .unwrap_or_default();
            match message.role {
                MessageRole::System => system_text = Some(text),
                MessageRole::User | MessageRole::Tool => {
                    messages.push(json!({"role": "user", "content": text}))
                }
                MessageRole::Assistant => {
                    messages.push(json!({"role": "assistant", "content": text}))
                }
            }
        }

        let mut body = json!({
            "anthropic_version": "bedrock-2023-05-31",
            "messages": messages,
            "max_tokens": request.effective_max_tokens().unwrap_or(4096),
        });
        if let Some(system) = system_text {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        body
    }

    fn transform_meta_request(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({"prompt": self.messages_to_prompt(&request.messages)});
        if let Some(max_tokens) = request.effective_max_tokens() {
            body["max_gen_len"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        body
    }

    fn transform_mistral_request(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({"prompt": self.messages_to_prompt(&request.messages)});
        if let Some(max_tokens) = request.effective_max_tokens() {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        body
    }

    fn transform_anthropic_response(&self, body: &Value, model: &str) -> CompletionResponse {
        let mut text = String::new();
        for block in body["content"].as_array().into_iter().flatten() {
            if block["type"].as_str() == Some("text") {
                text.push_str(block["text"].as_str().unwrap_or_default());
            }
        }

        let finish_reason = match body["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        };

        let prompt = body.pointer("/usage/input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let completion = body.pointer("/usage/output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        self.build_response(
            body["id"].as_str().unwrap_or("bedrock-response"),
            model,
            text,
            finish_reason,
            Usage::new(prompt, completion),
        )
    }

    fn transform_meta_response(&self, body: &Value, model: &str) -> CompletionResponse {
        let prompt = body["prompt_token_count"].as_u64().unwrap_or(0) as u32;
        let completion = body["generation_token_count"].as_u64().unwrap_or(0) as u32;
        let finish_reason = match body["stop_reason"].as_str() {
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        self.build_response(
            "bedrock-meta-response",
            model,
            body["generation"].as_str().unwrap_or_default().to_string(),
            finish_reason,
            Usage::new(prompt, completion),
        )
    }

    fn transform_mistral_response(&self, body: &Value, model: &str) -> CompletionResponse {
        let text = body
            .pointer("/outputs/0/text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let finish_reason = match body.pointer("/outputs/0/stop_reason").and_then(|r| r.as_str()) {
            Some("length") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        self.build_response(
            "bedrock-mistral-response",
            model,
            text,
            finish_reason,
            Usage::default(),
        )
    }

    fn build_response(
        &self,
        id: &str,
        model: &str,
        text: String,
        finish_reason: FinishReason,
        usage: Usage,
    ) -> CompletionResponse {
        CompletionResponse {
            id: id.to_string(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(text),
                finish_reason: Some(finish_reason),
            }],
            usage: Some(usage),
            provider: Some(self.name().to_string()),
            hidden_params: Default::default(),
        }
    }
}

#[async_trait]
impl Provider for BedrockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    fn supports_model(&self, model: &str) -> bool {
        model.starts_with("bedrock/")
            || model.starts_with("anthropic.")
            || model.starts_with("meta.")
            || model.starts_with("mistral.")
            || model.starts_with("amazon.")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        let model_id = self.model_id(&request.model);
        let body = if model_id.starts_with("meta.") {
            self.transform_meta_request(request)
        } else if model_id.starts_with("mistral.") {
            self.transform_mistral_request(request)
        } else {
            // Anthropic is also the default for unrecognized families
            self.transform_anthropic_request(request)
        };
        Ok(body)
    }

    fn transform_response(&self, body: &Value, model: &str) -> Result<CompletionResponse> {
        let model_id = self.model_id(model);
        let response = if model_id.starts_with("meta.") {
            self.transform_meta_response(body, model)
        } else if model_id.starts_with("mistral.") {
            self.transform_mistral_response(body, model)
        } else {
            self.transform_anthropic_response(body, model)
        };
        Ok(response)
    }

    fn transform_chunk(&self, chunk: &Value, model: &str) -> Result<Option<StreamChunk>> {
        // Only the anthropic family event shape appears on this path
        match chunk["type"].as_str() {
            Some("content_block_delta") => Ok(chunk
                .pointer("/delta/text")
                .and_then(|t| t.as_str())
                .map(|text| StreamChunk::content("", model, text, false))),
            Some("message_stop") => Ok(Some(StreamChunk::terminal(
                "",
                model,
                FinishReason::Stop,
                None,
            ))),
            _ => Ok(None),
        }
    }

    async fn chat(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<CompletionResponse> {
        let aws = self.resolve_credentials(creds)?;
        let model_id = self.model_id(&request.model);

        let host = format!("bedrock-runtime.{}.amazonaws.com", aws.region);
        let path = format!("/model/{}/invoke", model_id);
        let url = format!("https://{}{}", host, path);

        let body = serde_json::to_vec(&self.transform_request(request)?)?;
        let headers = sigv4::sign_request(&aws, "bedrock", &host, &path, &body);

        let mut http_request = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .body(body);
        for (name, value) in headers {
            http_request = http_request.header(name, value);
        }

        let response = http_request.send().await.map_err(shared::transport_error)?;
        if !response.status().is_success() {
            return Err(shared::error_from_response(self.name(), response).await);
        }

        let body: Value = response.json().await.map_err(shared::transport_error)?;
        let mut parsed = self.transform_response(&body, &request.model)?;
        shared::stamp_response_cost(&mut parsed);
        Ok(parsed)
    }

    async fn chat_stream(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<ChunkStream> {
        // Unary invoke re-emitted as a chunk pair; see module docs
        let response = self.chat(request, creds).await?;
        let model = request.model.clone();
        let provider = self.name();

        let stream = try_stream! {
            let text = response.choices.first()
                .and_then(|c| c.message.content.as_ref())
                .map(MessageContent::as_text)
                .unwrap_or_default();
            let finish = response.choices.first()
                .and_then(|c| c.finish_reason)
                .unwrap_or(FinishReason::Stop);

            if !text.is_empty() {
                let mut chunk = StreamChunk::content(&response.id, &model, &text, true);
                chunk.provider = Some(provider.to_string());
                yield chunk;
            }

            let mut terminal = StreamChunk::terminal(&response.id, &model, finish, response.usage.clone());
            terminal.provider = Some(provider.to_string());
            yield terminal;
        };

        Ok(Box::pin(stream))
    }
}
