//! Google Gemini provider adapter
//!
//! Speaks the generativelanguage `generateContent` API. Roles shrink to
//! `user`/`model`, the system message moves to `systemInstruction`, tools
//! become `functionDeclarations`, and streaming uses `alt=sse`.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::core::providers::{
    shared, ChunkStream, Provider, ProviderCapabilities, ProviderCredentials, ProviderKind,
};
use crate::core::types::{
    ChatMessage, Choice, CompletionRequest, CompletionResponse, ContentPart, FinishReason,
    FunctionCall, MessageContent, MessageRole, StreamChunk, ToolCall, ToolChoice, Usage,
};
use crate::utils::error::{GatewayError, Result};
use crate::utils::vision;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini adapter
#[derive(Debug, Default)]
pub struct GeminiProvider;

impl GeminiProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_key(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_key
            .clone()
            .or_else(|| shared::env_api_key(ProviderKind::Gemini))
            .ok_or_else(|| {
                GatewayError::authentication(
                    "Gemini API key is required (GOOGLE_API_KEY or GEMINI_API_KEY)",
                )
            })
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        let stripped = shared::strip_model_prefix(model, "gemini");
        shared::strip_model_prefix(stripped, "google")
    }

    fn url(&self, creds: &ProviderCredentials, model: &str, stream: bool) -> Result<String> {
        let api_key = self.resolve_key(creds)?;
        let operation = if stream {
            "streamGenerateContent?alt=sse&key="
        } else {
            "generateContent?key="
        };
        Ok(format!(
            "{}/models/{}:{}{}",
            self.base_url(creds),
            self.upstream_model(model),
            operation,
            api_key
        ))
    }

    fn convert_parts(&self, message: &ChatMessage) -> Result<Vec<Value>> {
        match &message.content {
            Some(MessageContent::Text(text)) => Ok(vec![json!({"text": text})]),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => Ok(json!({"text": text})),
                    ContentPart::ImageUrl { image_url } => {
                        let (mime_type, data) = vision::parse_data_url(&image_url.url)?;
                        Ok(json!({
                            "inline_data": {"mime_type": mime_type, "data": data}
                        }))
                    }
                })
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Fold messages into (systemInstruction, contents)
    fn convert_messages(&self, messages: &[ChatMessage]) -> Result<(Option<Value>, Vec<Value>)> {
        let mut system_parts: Vec<Value> = Vec::new();
        let mut contents = Vec::new();

        for message in messages {
            match message.role {
                MessageRole::System => {
                    let text = message
                        .content
                        .as_ref()
                        .map(|c| c.as_text())
                        .unwrap_or_default();
                    system_parts.push(json!({"text": text}));
                }
                MessageRole::User => {
                    contents.push(json!({"role": "user", "parts": self.convert_parts(message)?}));
                }
                MessageRole::Assistant => {
                    let mut parts = self.convert_parts(message)?;
                    if let Some(tool_calls) = &message.tool_calls {
                        for call in tool_calls {
                            let args: Value = serde_json::from_str(&call.function.arguments)
                                .unwrap_or_else(|_| json!({}));
                            parts.push(json!({
                                "functionCall": {"name": call.function.name, "args": args}
                            }));
                        }
                    }
                    contents.push(json!({"role": "model", "parts": parts}));
                }
                MessageRole::Tool => {
                    let name = message.name.clone().unwrap_or_else(|| "function".into());
                    let response_text = message
                        .content
                        .as_ref()
                        .map(|c| c.as_text())
                        .unwrap_or_default();
                    contents.push(json!({
                        "role": "user",
                        "parts": [{
                            "functionResponse": {
                                "name": name,
                                "response": {"content": response_text},
                            }
                        }]
                    }));
                }
            }
        }

        let system = (!system_parts.is_empty()).then(|| json!({"parts": system_parts}));
        Ok((system, contents))
    }

    fn map_finish_reason(&self, reason: Option<&str>) -> Option<FinishReason> {
        reason.map(|reason| match reason {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" => {
                FinishReason::ContentFilter
            }
            "OTHER" => FinishReason::Stop,
            _ => FinishReason::Error,
        })
    }

    fn parse_usage(&self, body: &Value) -> Usage {
        let meta = &body["usageMetadata"];
        Usage {
            prompt_tokens: meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            completion_tokens: meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            total_tokens: meta["totalTokenCount"].as_u64().unwrap_or(0) as u32,
            cache_read_input_tokens: meta["cachedContentTokenCount"].as_u64().map(|v| v as u32),
            cache_creation_input_tokens: None,
        }
    }

    /// Extract (text, tool_calls) from the first candidate
    fn parse_candidate(&self, candidate: &Value) -> (String, Option<Vec<ToolCall>>) {
        let mut text = String::new();
        let mut tool_calls: Option<Vec<ToolCall>> = None;

        for part in candidate
            .pointer("/content/parts")
            .and_then(|p| p.as_array())
            .into_iter()
            .flatten()
        {
            if let Some(fragment) = part["text"].as_str() {
                text.push_str(fragment);
            }
            if let Some(call) = part.get("functionCall") {
                let index = tool_calls.as_ref().map_or(0, |c: &Vec<ToolCall>| c.len());
                tool_calls.get_or_insert_with(Vec::new).push(ToolCall {
                    id: format!("call_{}", index),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: call["name"].as_str().unwrap_or_default().to_string(),
                        arguments: call["args"].to_string(),
                    },
                });
            }
        }

        (text, tool_calls)
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tools: true,
            vision: true,
            json_mode: true,
            ..Default::default()
        }
    }

    fn supports_model(&self, model: &str) -> bool {
        self.upstream_model(model).starts_with("gemini-")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        let (system, contents) = self.convert_messages(&request.messages)?;

        let mut generation_config = json!({});
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            generation_config["topP"] = json!(top_p);
        }
        if let Some(max_tokens) = request.effective_max_tokens() {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        if let Some(stop) = &request.stop {
            generation_config["stopSequences"] = json!(stop.to_vec());
        }
        if let Some(format) = &request.response_format {
            if format.format_type == "json_object" || format.format_type == "json_schema" {
                generation_config["responseMimeType"] = json!("application/json");
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });

        if let Some(system) = system {
            body["systemInstruction"] = system;
        }

        if let Some(tools) = &request.tools {
            body["tools"] = json!([{
                "functionDeclarations": tools.iter().map(|tool| {
                    json!({
                        "name": tool.function.name,
                        "description": tool.function.description.clone().unwrap_or_default(),
                        "parameters": tool.function.parameters.clone()
                            .unwrap_or_else(|| json!({"type": "object"})),
                    })
                }).collect::<Vec<_>>()
            }]);
        }

        if let Some(tool_choice) = &request.tool_choice {
            let config = match tool_choice {
                ToolChoice::Mode(mode) => match mode.as_str() {
                    "auto" => json!({"mode": "AUTO"}),
                    "none" => json!({"mode": "NONE"}),
                    "required" => json!({"mode": "ANY"}),
                    other => {
                        return Err(GatewayError::bad_request(format!(
                            "unsupported tool_choice mode: {}",
                            other
                        )))
                    }
                },
                ToolChoice::Specific { function, .. } => {
                    json!({"mode": "ANY", "allowedFunctionNames": [function.name]})
                }
            };
            body["toolConfig"] = json!({"functionCallingConfig": config});
        }

        Ok(body)
    }

    fn transform_response(&self, body: &Value, model: &str) -> Result<CompletionResponse> {
        let candidate = body
            .pointer("/candidates/0")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let (text, tool_calls) = self.parse_candidate(&candidate);

        let finish_reason = if tool_calls.is_some() {
            Some(FinishReason::ToolCalls)
        } else {
            self.map_finish_reason(candidate["finishReason"].as_str())
                .or(Some(FinishReason::Stop))
        };

        let message = ChatMessage {
            role: MessageRole::Assistant,
            content: Some(MessageContent::Text(text)),
            name: None,
            tool_calls,
            tool_call_id: None,
        };

        Ok(CompletionResponse {
            id: body["responseId"]
                .as_str()
                .unwrap_or("gemini-response")
                .to_string(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: Some(self.parse_usage(body)),
            provider: Some(self.name().to_string()),
            hidden_params: Default::default(),
        })
    }

    fn transform_chunk(&self, chunk: &Value, model: &str) -> Result<Option<StreamChunk>> {
        let candidate = match chunk.pointer("/candidates/0") {
            Some(candidate) => candidate,
            None => return Ok(None),
        };

        let (text, _) = self.parse_candidate(candidate);
        let finish_reason = self.map_finish_reason(candidate["finishReason"].as_str());

        if text.is_empty() && finish_reason.is_none() {
            return Ok(None);
        }

        if let Some(reason) = finish_reason {
            let mut terminal = StreamChunk::terminal("", model, reason, Some(self.parse_usage(chunk)));
            if !text.is_empty() {
                terminal.choices[0].delta.content = Some(text);
            }
            return Ok(Some(terminal));
        }

        Ok(Some(StreamChunk::content("", model, &text, false)))
    }

    async fn chat(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<CompletionResponse> {
        let url = self.url(creds, &request.model, false)?;

        let resolved = shared::resolve_images(&request.messages).await?;
        let body = self.transform_request(&CompletionRequest {
            messages: resolved,
            ..request.clone()
        })?;

        let response = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .json(&body)
            .send()
            .await
            .map_err(shared::transport_error)?;

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
        let url = self.url(creds, &request.model, true)?;

        let resolved = shared::resolve_images(&request.messages).await?;
        let body = self.transform_request(&CompletionRequest {
            messages: resolved,
            ..request.clone()
        })?;

        let response = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .json(&body)
            .send()
            .await
            .map_err(shared::transport_error)?;

        if !response.status().is_success() {
            return Err(shared::error_from_response(self.name(), response).await);
        }

        let model = request.model.clone();
        let provider = self.name();
        let this = Self::new();

        let stream = try_stream! {
            let lines = shared::sse_data_stream(response);
            futures::pin_mut!(lines);

            let mut first = true;
            while let Some(line) = lines.next().await {
                let value: Value = serde_json::from_str(&line?)
                    .map_err(|e| GatewayError::api(502, format!("malformed stream chunk: {}", e)))?;
                if let Some(mut chunk) = this.transform_chunk(&value, &model)? {
                    if first {
                        if let Some(choice) = chunk.choices.first_mut() {
                            choice.delta.role = Some(MessageRole::Assistant);
                        }
                        first = false;
                    }
                    chunk.provider = Some(provider.to_string());
                    yield chunk;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
