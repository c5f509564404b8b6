//! Anthropic provider adapter
//!
//! Translates between the OpenAI-shaped gateway format and the Anthropic
//! Messages API: the system message folds into a top-level `system` field,
//! tool calls become `tool_use`/`tool_result` content blocks, and streaming
//! arrives as event-tagged SSE.

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

const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic adapter
#[derive(Debug, Default)]
pub struct AnthropicProvider;

impl AnthropicProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_key(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_key
            .clone()
            .or_else(|| shared::env_api_key(ProviderKind::Anthropic))
            .ok_or_else(|| GatewayError::authentication("Anthropic API key is required"))
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "anthropic")
    }

    fn headers(&self, api_key: &str) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), api_key.to_string()),
            ("anthropic-version".to_string(), API_VERSION.to_string()),
        ]
    }

    /// Fold messages into (system_text, anthropic_messages).
    ///
    /// Image blocks must already be data URIs.
    fn convert_messages(&self, messages: &[ChatMessage]) -> Result<(Option<String>, Vec<Value>)> {
        let mut system_text: Option<String> = None;
        let mut converted = Vec::new();

        for message in messages {
            match message.role {
                MessageRole::System => {
                    let text = message
                        .content
                        .as_ref()
                        .map(|c| c.as_text())
                        .unwrap_or_default();
                    system_text = Some(match system_text {
                        Some(existing) => format!("{}\n\n{}", existing, text),
                        None => text,
                    });
                }
                MessageRole::User => {
                    converted.push(json!({
                        "role": "user",
                        "content": self.convert_user_content(message)?,
                    }));
                }
                MessageRole::Assistant => {
                    converted.push(self.convert_assistant_message(message)?);
                }
                MessageRole::Tool => {
                    let tool_call_id = message.tool_call_id.as_deref().ok_or_else(|| {
                        GatewayError::bad_request("tool messages must have tool_call_id")
                    })?;
                    converted.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": tool_call_id,
                            "content": message.content.as_ref().map(|c| c.as_text()).unwrap_or_default(),
                        }]
                    }));
                }
            }
        }

        Ok((system_text, converted))
    }

    fn convert_user_content(&self, message: &ChatMessage) -> Result<Value> {
        match &message.content {
            Some(MessageContent::Text(text)) => Ok(json!([{"type": "text", "text": text}])),
            Some(MessageContent::Parts(parts)) => {
                let mut blocks = Vec::new();
                for part in parts {
                    match part {
                        ContentPart::Text { text } => {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                        ContentPart::ImageUrl { image_url } => {
                            let (media_type, data) = vision::parse_data_url(&image_url.url)?;
                            blocks.push(json!({
                                "type": "image",
                                "source": {
                                    "type": "base64",
                                    "media_type": media_type,
                                    "data": data,
                                }
                            }));
                        }
                    }
                }
                Ok(Value::Array(blocks))
            }
            None => Ok(json!([])),
        }
    }

    fn convert_assistant_message(&self, message: &ChatMessage) -> Result<Value> {
        let mut blocks = Vec::new();

        if let Some(content) = &message.content {
            let text = content.as_text();
            if !text.is_empty() {
                blocks.push(json!({"type": "text", "text": text}));
            }
        }

        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                let input: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.function.name,
                    "input": input,
                }));
            }
        }

        Ok(json!({"role": "assistant", "content": blocks}))
    }

    fn map_finish_reason(&self, reason: Option<&str>) -> Option<FinishReason> {
        reason.map(|reason| match reason {
            "end_turn" | "stop_sequence" => FinishReason::Stop,
            "max_tokens" => FinishReason::Length,
            "tool_use" => FinishReason::ToolCalls,
            _ => FinishReason::Error,
        })
    }

    fn parse_usage(&self, usage: &Value) -> Usage {
        let prompt = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
        let completion = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            cache_read_input_tokens: usage["cache_read_input_tokens"]
                .as_u64()
                .map(|v| v as u32),
            cache_creation_input_tokens: usage["cache_creation_input_tokens"]
                .as_u64()
                .map(|v| v as u32),
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let api_key = self.resolve_key(creds)?;
        let url = format!("{}/messages", self.base_url(creds));

        let resolved = shared::resolve_images(&request.messages).await?;
        let resolved_request = CompletionRequest {
            messages: resolved,
            ..request.clone()
        };
        let mut body = self.transform_request(&resolved_request)?;
        if stream {
            body["stream"] = json!(true);
        }

        let mut http_request = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .json(&body);
        for (name, value) in self.headers(&api_key) {
            http_request = http_request.header(name, value);
        }

        let response = http_request.send().await.map_err(shared::transport_error)?;
        if !response.status().is_success() {
            return Err(shared::error_from_response(self.name(), response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
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
        self.upstream_model(model).starts_with("claude-")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        let (system_text, messages) = self.convert_messages(&request.messages)?;

        let mut body = json!({
            "model": self.upstream_model(&request.model),
            "messages": messages,
            "max_tokens": request.effective_max_tokens().unwrap_or(DEFAULT_MAX_TOKENS),
        });

        let mut system_text = system_text;

        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = json!(stop.to_vec());
        }

        if let Some(tools) = &request.tools {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.function.name,
                            "description": tool.function.description.clone().unwrap_or_default(),
                            "input_schema": tool.function.parameters.clone()
                                .unwrap_or_else(|| json!({"type": "object"})),
                        })
                    })
                    .collect(),
            );
        }

        if let Some(tool_choice) = &request.tool_choice {
            body["tool_choice"] = match tool_choice {
                ToolChoice::Mode(mode) => match mode.as_str() {
                    "auto" => json!({"type": "auto"}),
                    "none" => json!({"type": "none"}),
                    "required" => json!({"type": "any"}),
                    other => {
                        return Err(GatewayError::bad_request(format!(
                            "unsupported tool_choice mode: {}",
                            other
                        )))
                    }
                },
                ToolChoice::Specific { function, .. } => {
                    json!({"type": "tool", "name": function.name})
                }
            };
        }

        // JSON mode has no native switch; instruct via the system prompt
        if let Some(format) = &request.response_format {
            if format.format_type == "json_object" {
                let instruction = "Respond with valid JSON only.";
                system_text = Some(match system_text {
                    Some(existing) => format!("{}\n\n{}", existing, instruction),
                    None => instruction.to_string(),
                });
            }
        }

        if let Some(system) = system_text {
            body["system"] = json!(system);
        }

        Ok(body)
    }

    fn transform_response(&self, body: &Value, model: &str) -> Result<CompletionResponse> {
        let mut text = String::new();
        let mut tool_calls: Option<Vec<ToolCall>> = None;

        for block in body["content"].as_array().into_iter().flatten() {
            match block["type"].as_str() {
                Some("text") => {
                    text.push_str(block["text"].as_str().unwrap_or_default());
                }
                Some("tool_use") => {
                    tool_calls.get_or_insert_with(Vec::new).push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        call_type: "function".to_string(),
                        function: FunctionCall {
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            arguments: block["input"].to_string(),
                        },
                    });
                }
                _ => {}
            }
        }

        let message = ChatMessage {
            role: MessageRole::Assistant,
            content: (!text.is_empty()).then(|| MessageContent::Text(text)),
            name: None,
            tool_calls,
            tool_call_id: None,
        };

        Ok(CompletionResponse {
            id: body["id"].as_str().unwrap_or("msg-unknown").to_string(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: self.map_finish_reason(body["stop_reason"].as_str()),
            }],
            usage: Some(self.parse_usage(&body["usage"])),
            provider: Some(self.name().to_string()),
            hidden_params: Default::default(),
        })
    }

    fn transform_chunk(&self, chunk: &Value, model: &str) -> Result<Option<StreamChunk>> {
        match chunk["type"].as_str() {
            Some("content_block_delta") => {
                let text = chunk.pointer("/delta/text").and_then(|t| t.as_str());
                Ok(text.map(|text| StreamChunk::content("", model, text, false)))
            }
            Some("message_delta") => Ok(self
                .map_finish_reason(chunk.pointer("/delta/stop_reason").and_then(|r| r.as_str()))
                .map(|reason| StreamChunk::terminal("", model, reason, None))),
            _ => Ok(None),
        }
    }

    async fn chat(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<CompletionResponse> {
        let response = self.send(request, creds, false).await?;
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
        let response = self.send(request, creds, true).await?;
        let model = request.model.clone();
        let provider = self.name();

        // Event assembly is stateful: message_start carries the id and the
        // prompt-token count, message_delta the stop reason and the
        // completion-token count, message_stop closes the sequence.
        let stream = try_stream! {
            let lines = shared::sse_data_stream(response);
            futures::pin_mut!(lines);

            let mut message_id = String::new();
            let mut first = true;
            let mut input_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;
            let mut cache_read: Option<u32> = None;
            let mut stop_reason = FinishReason::Stop;

            while let Some(line) = lines.next().await {
                let event: Value = serde_json::from_str(&line?)
                    .map_err(|e| GatewayError::api(502, format!("malformed stream event: {}", e)))?;

                match event["type"].as_str() {
                    Some("message_start") => {
                        message_id = event.pointer("/message/id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("msg-stream")
                            .to_string();
                        if let Some(usage) = event.pointer("/message/usage") {
                            input_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                            cache_read = usage["cache_read_input_tokens"].as_u64().map(|v| v as u32);
                        }
                    }
                    Some("content_block_delta") => {
                        if let Some(text) = event.pointer("/delta/text").and_then(|t| t.as_str()) {
                            let mut chunk = StreamChunk::content(&message_id, &model, text, first);
                            chunk.provider = Some(provider.to_string());
                            first = false;
                            yield chunk;
                        }
                    }
                    Some("message_delta") => {
                        if let Some(reason) = event.pointer("/delta/stop_reason").and_then(|r| r.as_str()) {
                            stop_reason = match reason {
                                "end_turn" | "stop_sequence" => FinishReason::Stop,
                                "max_tokens" => FinishReason::Length,
                                "tool_use" => FinishReason::ToolCalls,
                                _ => FinishReason::Error,
                            };
                        }
                        if let Some(tokens) = event.pointer("/usage/output_tokens").and_then(|v| v.as_u64()) {
                            output_tokens = tokens as u32;
                        }
                    }
                    Some("message_stop") => {
                        let usage = Usage {
                            prompt_tokens: input_tokens,
                            completion_tokens: output_tokens,
                            total_tokens: input_tokens + output_tokens,
                            cache_read_input_tokens: cache_read,
                            cache_creation_input_tokens: None,
                        };
                        let mut chunk = StreamChunk::terminal(&message_id, &model, stop_reason, Some(usage));
                        chunk.provider = Some(provider.to_string());
                        yield chunk;
                        return;
                    }
                    Some("error") => {
                        let message = event.pointer("/error/message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("stream error");
                        Err(GatewayError::api(502, message))?;
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FunctionDef, Tool};

    fn request_with(messages: Vec<ChatMessage>) -> CompletionRequest {
        CompletionRequest {
            model: "claude-3-haiku-20240307".into(),
            messages,
            ..Default::default()
        }
    }

    #[test]
    fn test_system_message_folds_into_field() {
        let provider = AnthropicProvider::new();
        let request = request_with(vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hi"),
        ]);

        let body = provider.transform_request(&request).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_default_max_tokens_applied() {
        let provider = AnthropicProvider::new();
        let body = provider
            .transform_request(&request_with(vec![ChatMessage::user("hi")]))
            .unwrap();
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tool_translation() {
        let provider = AnthropicProvider::new();
        let mut request = request_with(vec![ChatMessage::user("weather?")]);
        request.tools = Some(vec![Tool::function(FunctionDef {
            name: "get_weather".into(),
            description: Some("Get the weather".into()),
            parameters: Some(json!({"type": "object", "properties": {"city": {"type": "string"}}})),
        })]);
        request.tool_choice = Some(ToolChoice::Mode("required".into()));

        let body = provider.transform_request(&request).unwrap();
        assert_eq!(body["tools"][0]["name"], "get_weather");
        assert!(body["tools"][0]["input_schema"]["properties"]["city"].is_object());
        assert_eq!(body["tool_choice"]["type"], "any");
    }

    #[test]
    fn test_tool_result_becomes_user_block() {
        let provider = AnthropicProvider::new();
        let request = request_with(vec![
            ChatMessage::user("weather?"),
            ChatMessage::tool("72F", "toolu_123"),
        ]);

        let body = provider.transform_request(&request).unwrap();
        let last = &body["messages"][1];
        assert_eq!(last["role"], "user");
        assert_eq!(last["content"][0]["type"], "tool_result");
        assert_eq!(last["content"][0]["tool_use_id"], "toolu_123");
    }

    #[test]
    fn test_response_translation_with_tool_use() {
        let provider = AnthropicProvider::new();
        let body = json!({
            "id": "msg_01",
            "content": [
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_9", "name": "get_weather", "input": {"city": "Oslo"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 11, "cache_read_input_tokens": 4}
        });

        let response = provider
            .transform_response(&body, "claude-3-haiku-20240307")
            .unwrap();
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::ToolCalls));

        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(
            serde_json::from_str::<Value>(&calls[0].function.arguments).unwrap()["city"],
            "Oslo"
        );

        let usage = response.usage.unwrap();
        assert_eq!(usage.total_tokens, 31);
        assert_eq!(usage.cache_read_input_tokens, Some(4));
    }

    #[test]
    fn test_finish_reason_mapping() {
        let provider = AnthropicProvider::new();
        assert_eq!(
            provider.map_finish_reason(Some("end_turn")),
            Some(FinishReason::Stop)
        );
        assert_eq!(
            provider.map_finish_reason(Some("max_tokens")),
            Some(FinishReason::Length)
        );
        assert_eq!(
            provider.map_finish_reason(Some("stop_sequence")),
            Some(FinishReason::Stop)
        );
        assert_eq!(
            provider.map_finish_reason(Some("tool_use")),
            Some(FinishReason::ToolCalls)
        );
        assert_eq!(provider.map_finish_reason(None), None);
    }

    #[test]
    fn test_data_uri_image_translation() {
        let provider = AnthropicProvider::new();
        let request = request_with(vec![ChatMessage {
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
        }]);

        let body = provider.transform_request(&request).unwrap();
        let image = &body["messages"][0]["content"][1];
        assert_eq!(image["type"], "image");
        assert_eq!(image["source"]["media_type"], "image/png");
        assert_eq!(image["source"]["data"], "aWNvbg==");
    }

    #[test]
    fn test_json_mode_appends_system_instruction() {
        let provider = AnthropicProvider::new();
        let mut request = request_with(vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hi"),
        ]);
        request.response_format = Some(crate::core::types::ResponseFormat {
            format_type: "json_object".into(),
            json_schema: None,
        });

        let body = provider.transform_request(&request).unwrap();
        let system = body["system"].as_str().unwrap();
        assert!(system.starts_with("be terse"));
        assert!(system.ends_with("Respond with valid JSON only."));
    }
}
