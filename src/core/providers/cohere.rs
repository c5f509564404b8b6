//! Cohere provider adapter
//!
//! Cohere's chat API takes the latest user turn as `message`, the rest of
//! the conversation as `chat_history`, and the system message as `preamble`.
//! Tools use `parameter_definitions` instead of JSON Schema. Streaming is
//! newline-delimited JSON events.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use crate::core::providers::{
    shared, ChunkStream, Provider, ProviderCapabilities, ProviderCredentials, ProviderKind,
};
use crate::core::types::{
    ChatMessage, Choice, CompletionRequest, CompletionResponse, FinishReason, FunctionCall,
    MessageContent, MessageRole, StreamChunk, ToolCall, Usage,
};
use crate::utils::error::{GatewayError, Result};

const DEFAULT_API_BASE: &str = "https://api.cohere.ai/v1";

/// Cohere adapter
#[derive(Debug, Default)]
pub struct CohereProvider;

impl CohereProvider {
    pub fn new() -> Self {
        Self
    }

    fn resolve_key(&self, creds: &ProviderCredentials) -> Result<String> {
        creds
            .api_key
            .clone()
            .or_else(|| shared::env_api_key(ProviderKind::Cohere))
            .ok_or_else(|| GatewayError::authentication("Cohere API key is required"))
    }

    fn base_url<'a>(&self, creds: &'a ProviderCredentials) -> &'a str {
        creds.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }

    fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        shared::strip_model_prefix(model, "cohere")
    }

    fn map_finish_reason(&self, reason: Option<&str>) -> FinishReason {
        match reason.unwrap_or("COMPLETE") {
            "COMPLETE" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "ERROR_TOXIC" => FinishReason::ContentFilter,
            "TOOL_CALL" => FinishReason::ToolCalls,
            "ERROR" => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }

    fn parse_usage(&self, body: &Value) -> Usage {
        let tokens = body.pointer("/meta/tokens").cloned().unwrap_or(json!({}));
        let prompt = tokens["input_tokens"].as_u64().unwrap_or(0) as u32;
        let completion = tokens["output_tokens"].as_u64().unwrap_or(0) as u32;
        Usage::new(prompt, completion)
    }

    fn parse_tool_calls(&self, body: &Value) -> Option<Vec<ToolCall>> {
        let calls = body["tool_calls"].as_array()?;
        if calls.is_empty() {
            return None;
        }
        Some(
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCall {
                    id: format!("call_{}", index),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: call["name"].as_str().unwrap_or_default().to_string(),
                        arguments: call["parameters"].to_string(),
                    },
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Provider for CohereProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cohere
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tools: true,
            ..Default::default()
        }
    }

    fn supports_model(&self, model: &str) -> bool {
        let model = self.upstream_model(model);
        model == "command" || model.starts_with("command-")
    }

    fn transform_request(&self, request: &CompletionRequest) -> Result<Value> {
        let mut preamble: Option<String> = None;
        let mut chat_history: Vec<Value> = Vec::new();
        let mut pending_message: Option<String> = None;

        for message in &request.messages {
            let text = message
                .content
                .as_ref()
                .map(MessageContent::as_text)
                .unwrap_or_default();
            match message.role {
                MessageRole::System => preamble = Some(text),
                MessageRole::User => {
                    // Earlier user turns go to history; the last becomes `message`
                    if let Some(previous) = pending_message.take() {
                        chat_history.push(json!({"role": "USER", "message": previous}));
                    }
                    pending_message = Some(text);
                }
                MessageRole::Assistant => {
                    if let Some(previous) = pending_message.take() {
                        chat_history.push(json!({"role": "USER", "message": previous}));
                    }
                    chat_history.push(json!({"role": "CHATBOT", "message": text}));
                }
                MessageRole::Tool => {
                    chat_history.push(json!({"role": "TOOL", "message": text}));
                }
            }
        }

        let mut body = json!({
            "model": self.upstream_model(&request.model),
            "message": pending_message.unwrap_or_else(|| "Continue".to_string()),
        });

        if let Some(preamble) = preamble {
            body["preamble"] = json!(preamble);
        }
        if !chat_history.is_empty() {
            body["chat_history"] = Value::Array(chat_history);
        }
        if let Some(max_tokens) = request.effective_max_tokens() {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["p"] = json!(top_p);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = json!(stop.to_vec());
        }

        if let Some(tools) = &request.tools {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        let definitions = tool
                            .function
                            .parameters
                            .as_ref()
                            .and_then(|p| p.get("properties"))
                            .cloned()
                            .unwrap_or_else(|| json!({}));
                        json!({
                            "name": tool.function.name,
                            "description": tool.function.description.clone().unwrap_or_default(),
                            "parameter_definitions": definitions,
                        })
                    })
                    .collect(),
            );
        }

        Ok(body)
    }

    fn transform_response(&self, body: &Value, model: &str) -> Result<CompletionResponse> {
        let text = body["text"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .unwrap_or_default()
            .to_string();
        let tool_calls = self.parse_tool_calls(body);

        let finish_reason = if tool_calls.is_some() {
            FinishReason::ToolCalls
        } else {
            self.map_finish_reason(body["finish_reason"].as_str())
        };

        Ok(CompletionResponse {
            id: body["generation_id"]
                .as_str()
                .unwrap_or("cohere-response")
                .to_string(),
            object: "chat.completion".to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: MessageRole::Assistant,
                    content: Some(MessageContent::Text(text)),
                    name: None,
                    tool_calls,
                    tool_call_id: None,
                },
                finish_reason: Some(finish_reason),
            }],
            usage: Some(self.parse_usage(body)),
            provider: Some(self.name().to_string()),
            hidden_params: Default::default(),
        })
    }

    fn transform_chunk(&self, chunk: &Value, model: &str) -> Result<Option<StreamChunk>> {
        match chunk["event_type"].as_str() {
            Some("text-generation") => Ok(chunk["text"]
                .as_str()
                .map(|text| StreamChunk::content("", model, text, false))),
            Some("stream-end") => {
                let finish = self.map_finish_reason(chunk["finish_reason"].as_str());
                let usage = chunk
                    .get("response")
                    .map(|response| self.parse_usage(response));
                Ok(Some(StreamChunk::terminal("", model, finish, usage)))
            }
            _ => Ok(None),
        }
    }

    async fn chat(
        &self,
        request: &CompletionRequest,
        creds: &ProviderCredentials,
    ) -> Result<CompletionResponse> {
        let api_key = self.resolve_key(creds)?;
        let url = format!("{}/chat", self.base_url(creds));
        let body = self.transform_request(request)?;

        let response = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .header("Authorization", format!("Bearer {}", api_key))
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
        let api_key = self.resolve_key(creds)?;
        let url = format!("{}/chat", self.base_url(creds));

        let mut body = self.transform_request(request)?;
        body["stream"] = json!(true);

        let response = shared::http_client()
            .post(&url)
            .timeout(creds.timeout_or(shared::DEFAULT_TIMEOUT))
            .header("Authorization", format!("Bearer {}", api_key))
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
            let lines = shared::ndjson_stream(response);
            futures::pin_mut!(lines);

            let mut first = true;
            while let Some(line) = lines.next().await {
                let value: Value = serde_json::from_str(&line?)
                    .map_err(|e| GatewayError::api(502, format!("malformed stream event: {}", e)))?;
                if let Some(mut chunk) = this.transform_chunk(&value, &model)? {
                    if first {
                        if let Some(choice) = chunk.choices.first_mut() {
                            choice.delta.role = Some(MessageRole::Assistant);
                        }
                        first = false;
                    }
                    chunk.provider = Some(provider.to_string());
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_and_message_split() {
        let provider = CohereProvider::new();
        let request = CompletionRequest {
            model: "command-r".into(),
            messages: vec![
                ChatMessage::system("be terse"),
                ChatMessage::user("first question"),
                ChatMessage::assistant("first answer"),
                ChatMessage::user("second question"),
            ],
            ..Default::default()
        };

        let body = provider.transform_request(&request).unwrap();
        assert_eq!(body["preamble"], "be terse");
        assert_eq!(body["message"], "second question");

        let history = body["chat_history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["role"], "USER");
        assert_eq!(history[1]["role"], "CHATBOT");
    }

    #[test]
    fn test_parameter_definitions() {
        let provider = CohereProvider::new();
        let mut request = CompletionRequest {
            model: "command-r".into(),
            messages: vec![ChatMessage::user("weather?")],
            ..Default::default()
        };
        request.tools = Some(vec![crate::core::types::Tool::function(
            crate::core::types::FunctionDef {
                name: "get_weather".into(),
                description: Some("weather lookup".into()),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}}
                })),
            },
        )]);

        let body = provider.transform_request(&request).unwrap();
        assert!(body["tools"][0]["parameter_definitions"]["city"].is_object());
    }

    #[test]
    fn test_finish_reason_mapping() {
        let provider = CohereProvider::new();
        assert_eq!(provider.map_finish_reason(Some("COMPLETE")), FinishReason::Stop);
        assert_eq!(provider.map_finish_reason(Some("MAX_TOKENS")), FinishReason::Length);
        assert_eq!(
            provider.map_finish_reason(Some("ERROR_TOXIC")),
            FinishReason::ContentFilter
        );
        assert_eq!(provider.map_finish_reason(Some("ERROR")), FinishReason::Error);
        assert_eq!(provider.map_finish_reason(None), FinishReason::Stop);
    }

    #[test]
    fn test_response_translation() {
        let provider = CohereProvider::new();
        let body = json!({
            "generation_id": "gen-1",
            "text": "Oslo is cold.",
            "finish_reason": "COMPLETE",
            "meta": {"tokens": {"input_tokens": 6, "output_tokens": 4}}
        });

        let response = provider.transform_response(&body, "command-r").unwrap();
        assert_eq!(response.id, "gen-1");
        assert_eq!(response.usage.as_ref().unwrap().total_tokens, 10);
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_stream_events() {
        let provider = CohereProvider::new();

        let text_event = json!({"event_type": "text-generation", "text": "hel"});
        let chunk = provider.transform_chunk(&text_event, "command-r").unwrap().unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hel"));

        let end_event = json!({
            "event_type": "stream-end",
            "finish_reason": "COMPLETE",
            "response": {"meta": {"tokens": {"input_tokens": 2, "output_tokens": 3}}}
        });
        let chunk = provider.transform_chunk(&end_event, "command-r").unwrap().unwrap();
        assert_eq!(chunk.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(chunk.usage.unwrap().total_tokens, 5);

        let other = json!({"event_type": "stream-start"});
        assert!(provider.transform_chunk(&other, "command-r").unwrap().is_none());
    }
}
