//! OpenAI-compatible wire handling
//!
//! The OpenAI, Azure, Groq, Mistral, and vLLM backends all speak (near-)
//! identical chat wire formats; the transforms and the HTTP flow live here
//! and the family adapters supply endpoint and header details.

use async_stream::try_stream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;

use crate::core::providers::{shared, ChunkStream};
use crate::core::types::{
    Choice, CompletionRequest, CompletionResponse, DeltaMessage, EmbeddingRequest,
    EmbeddingResponse, FinishReason, StreamChoice, StreamChunk, Usage,
};
use crate::utils::error::{GatewayError, Result};

/// Map an OpenAI-style finish reason string into the normalized set
pub fn parse_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Error,
    }
}

/// Build the chat request body, substituting the upstream model name
pub fn build_chat_body(request: &CompletionRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
    });

    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        body["top_p"] = json!(top_p);
    }
    if let Some(n) = request.n {
        body["n"] = json!(n);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(max_completion_tokens) = request.max_completion_tokens {
        body["max_completion_tokens"] = json!(max_completion_tokens);
    }
    if let Some(stop) = &request.stop {
        body["stop"] = json!(stop);
    }
    if let Some(presence_penalty) = request.presence_penalty {
        body["presence_penalty"] = json!(presence_penalty);
    }
    if let Some(frequency_penalty) = request.frequency_penalty {
        body["frequency_penalty"] = json!(frequency_penalty);
    }
    if let Some(user) = &request.user {
        body["user"] = json!(user);
    }
    if let Some(seed) = request.seed {
        body["seed"] = json!(seed);
    }
    if let Some(tools) = &request.tools {
        body["tools"] = json!(tools);
    }
    if let Some(tool_choice) = &request.tool_choice {
        body["tool_choice"] = json!(tool_choice);
    }
    if let Some(parallel) = request.parallel_tool_calls {
        body["parallel_tool_calls"] = json!(parallel);
    }
    if let Some(response_format) = &request.response_format {
        body["response_format"] = json!(response_format);
    }
    if request.stream {
        body["stream"] = json!(true);
    }

    for (key, value) in &request.extra_params {
        body[key] = value.clone();
    }

    body
}

fn parse_usage(value: Option<&Value>) -> Usage {
    let Some(usage) = value else {
        return Usage::default();
    };
    Usage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
        cache_read_input_tokens: usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32),
        cache_creation_input_tokens: None,
    }
}

/// Parse a unary chat response body
pub fn parse_chat_response(body: &Value, model: &str) -> Result<CompletionResponse> {
    let choices = body["choices"]
        .as_array()
        .ok_or_else(|| GatewayError::api(502, "response missing choices"))?
        .iter()
        .map(|choice| {
            let message = serde_json::from_value(choice["message"].clone())?;
            Ok(Choice {
                index: choice["index"].as_u64().unwrap_or(0) as u32,
                message,
                finish_reason: choice["finish_reason"].as_str().map(parse_finish_reason),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CompletionResponse {
        id: body["id"].as_str().unwrap_or("chatcmpl-unknown").to_string(),
        object: "chat.completion".to_string(),
        created: body["created"]
            .as_i64()
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: model.to_string(),
        choices,
        usage: Some(parse_usage(body.get("usage"))),
        provider: None,
        hidden_params: Default::default(),
    })
}

/// Parse one SSE chunk body; empty-choice keep-alives are skipped
pub fn parse_chunk(body: &Value, model: &str) -> Result<Option<StreamChunk>> {
    let choices = match body["choices"].as_array() {
        Some(choices) if !choices.is_empty() => choices,
        // Usage-only frame (stream_options include_usage) or keep-alive
        _ => {
            if body.get("usage").map_or(false, |u| !u.is_null()) {
                return Ok(Some(StreamChunk {
                    id: body["id"].as_str().unwrap_or_default().to_string(),
                    object: "chat.completion.chunk".to_string(),
                    created: body["created"]
                        .as_i64()
                        .unwrap_or_else(|| chrono::Utc::now().timestamp()),
                    model: model.to_string(),
                    choices: Vec::new(),
                    usage: Some(parse_usage(body.get("usage"))),
                    provider: None,
                }));
            }
            return Ok(None);
        }
    };

    let parsed_choices = choices
        .iter()
        .map(|choice| {
            let delta: DeltaMessage = serde_json::from_value(choice["delta"].clone())?;
            Ok(StreamChoice {
                index: choice["index"].as_u64().unwrap_or(0) as u32,
                delta,
                finish_reason: choice["finish_reason"].as_str().map(parse_finish_reason),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(StreamChunk {
        id: body["id"].as_str().unwrap_or_default().to_string(),
        object: "chat.completion.chunk".to_string(),
        created: body["created"]
            .as_i64()
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
        model: model.to_string(),
        choices: parsed_choices,
        usage: body
            .get("usage")
            .filter(|u| !u.is_null())
            .map(|u| parse_usage(Some(u))),
        provider: None,
    }))
}

/// Build an embedding request body
pub fn build_embedding_body(request: &EmbeddingRequest, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "input": request.input,
    });
    if let Some(format) = &request.encoding_format {
        body["encoding_format"] = json!(format);
    }
    if let Some(dimensions) = request.dimensions {
        body["dimensions"] = json!(dimensions);
    }
    if let Some(user) = &request.user {
        body["user"] = json!(user);
    }
    body
}

/// Parse an embedding response body
pub fn parse_embedding_response(body: &Value, model: &str) -> Result<EmbeddingResponse> {
    let data = body["data"]
        .as_array()
        .ok_or_else(|| GatewayError::api(502, "embedding response missing data"))?;

    let vectors = data
        .iter()
        .map(|entry| {
            entry["embedding"]
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64())
                        .map(|v| v as f32)
                        .collect::<Vec<f32>>()
                })
                .ok_or_else(|| GatewayError::api(502, "embedding entry missing vector"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EmbeddingResponse::new(
        model.to_string(),
        vectors,
        parse_usage(body.get("usage")),
    ))
}

/// Execute a unary chat call against an OpenAI-compatible endpoint
pub async fn execute_chat(
    provider: &'static str,
    url: &str,
    headers: &[(String, String)],
    body: Value,
    timeout: Duration,
    model: &str,
) -> Result<CompletionResponse> {
    let mut request = shared::http_client().post(url).timeout(timeout).json(&body);
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let response = request.send().await.map_err(shared::transport_error)?;
    if !response.status().is_success() {
        return Err(shared::error_from_response(provider, response).await);
    }

    let body: Value = response.json().await.map_err(shared::transport_error)?;
    let mut parsed = parse_chat_response(&body, model)?;
    parsed.provider = Some(provider.to_string());
    shared::stamp_response_cost(&mut parsed);
    Ok(parsed)
}

/// Execute a streaming chat call against an OpenAI-compatible endpoint
pub async fn execute_chat_stream(
    provider: &'static str,
    url: &str,
    headers: &[(String, String)],
    body: Value,
    timeout: Duration,
    model: &str,
) -> Result<ChunkStream> {
    let mut request = shared::http_client().post(url).timeout(timeout).json(&body);
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let response = request.send().await.map_err(shared::transport_error)?;
    if !response.status().is_success() {
        return Err(shared::error_from_response(provider, response).await);
    }

    let model = model.to_string();
    let stream = try_stream! {
        let data_lines = shared::sse_data_stream(response);
        futures::pin_mut!(data_lines);

        while let Some(line) = data_lines.next().await {
            let line = line?;
            let value: Value = serde_json::from_str(&line)
                .map_err(|e| GatewayError::api(502, format!("malformed stream chunk: {}", e)))?;
            if let Some(mut chunk) = parse_chunk(&value, &model)? {
                chunk.provider = Some(provider.to_string());
                yield chunk;
            }
        }
    };

    Ok(Box::pin(stream))
}

/// Execute an embedding call against an OpenAI-compatible endpoint
pub async fn execute_embedding(
    provider: &'static str,
    url: &str,
    headers: &[(String, String)],
    body: Value,
    timeout: Duration,
    model: &str,
) -> Result<EmbeddingResponse> {
    let mut request = shared::http_client().post(url).timeout(timeout).json(&body);
    for (name, value) in headers {
        request = request.header(name, value);
    }

    let response = request.send().await.map_err(shared::transport_error)?;
    if !response.status().is_success() {
        return Err(shared::error_from_response(provider, response).await);
    }

    let body: Value = response.json().await.map_err(shared::transport_error)?;
    parse_embedding_response(&body, model)
}
