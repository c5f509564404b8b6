//! Shared plumbing for provider adapters
//!
//! Pooled HTTP client, upstream error classification, SSE / NDJSON line
//! streams, environment key lookup, and remote-image resolution.

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::time::Duration;

use crate::core::providers::ProviderKind;
use crate::core::types::{ChatMessage, ContentPart, ImageUrl, MessageContent};
use crate::utils::error::{map_http_status, GatewayError, Result};
use crate::utils::vision;

/// Default per-dispatch timeout when neither caller nor deployment set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Process-wide pooled HTTP client. Per-request deadlines are applied on the
/// request builder, so one pool serves every adapter.
static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
        .expect("HTTP client construction cannot fail with static options")
});

/// The shared pooled client
pub fn http_client() -> &'static reqwest::Client {
    &HTTP_CLIENT
}

/// Environment variable fallback for each provider's API key
pub fn env_api_key(kind: ProviderKind) -> Option<String> {
    let var = match kind {
        ProviderKind::OpenAi => "OPENAI_API_KEY",
        ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        ProviderKind::Azure => "AZURE_OPENAI_API_KEY",
        ProviderKind::Bedrock => "AWS_ACCESS_KEY_ID",
        ProviderKind::Gemini => {
            return std::env::var("GOOGLE_API_KEY")
                .or_else(|_| std::env::var("GEMINI_API_KEY"))
                .ok()
        }
        ProviderKind::Cohere => "COHERE_API_KEY",
        ProviderKind::Mistral => "MISTRAL_API_KEY",
        ProviderKind::Groq => "GROQ_API_KEY",
        // Self-hosted backends run unauthenticated by default
        ProviderKind::Vllm | ProviderKind::Ollama => return None,
    };
    std::env::var(var).ok()
}

/// Translate a non-success upstream response into the gateway taxonomy.
///
/// Consumes the response body; propagates `retry-after` on 429 and refines
/// 400s using the provider error object when present.
pub async fn error_from_response(provider: &'static str, response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let text = response.text().await.unwrap_or_default();
    let body: Option<Value> = serde_json::from_str(&text).ok();

    let message = body
        .as_ref()
        .and_then(|b| b.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| {
            if text.is_empty() {
                format!("{} returned status {}", provider, status)
            } else {
                text.clone()
            }
        });

    // Providers signal overload in the error type rather than the status
    let error_type = body
        .as_ref()
        .and_then(|b| b.get("error"))
        .and_then(|e| e.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    if error_type.contains("overloaded") {
        return GatewayError::service_unavailable(message);
    }

    if status == 429 {
        return GatewayError::rate_limit(message, retry_after);
    }

    map_http_status(status, &message, body.as_ref())
}

/// Map a reqwest transport error, distinguishing deadline from connection
pub fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::timeout(err.to_string())
    } else {
        GatewayError::connection(err.to_string())
    }
}

/// Turn a streaming HTTP response into a stream of SSE `data:` payloads.
///
/// Lines without a `data:` prefix (event tags, comments, blanks) are
/// dropped; the literal `[DONE]` sentinel terminates the stream.
pub fn sse_data_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut bytes = response.bytes_stream();
        // Byte buffer: a network chunk may split a multibyte character, so
        // decoding happens per complete line only.
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(transport_error)?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&raw[..newline]);
                let line = line.trim_end_matches('\r');

                if let Some(payload) = line.strip_prefix("data:") {
                    let payload = payload.trim();
                    if payload == "[DONE]" {
                        return;
                    }
                    if !payload.is_empty() {
                        yield payload.to_string();
                    }
                }
            }
        }
    }
}

/// Turn a streaming HTTP response into newline-delimited JSON payloads
pub fn ndjson_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(transport_error)?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&raw[..newline]).trim().to_string();
                if !line.is_empty() {
                    yield line;
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
        if !rest.is_empty() {
            yield rest;
        }
    }
}

/// Replace remote image URLs with data URIs so the pure transforms only ever
/// see locally-decodable content. Data URIs pass through untouched.
pub async fn resolve_images(messages: &[ChatMessage]) -> Result<Vec<ChatMessage>> {
    let mut resolved = Vec::with_capacity(messages.len());

    for message in messages {
        let content = match &message.content {
            Some(content @ MessageContent::Parts(parts)) if content.has_images() => {
                let mut new_parts = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        ContentPart::ImageUrl { image_url } if !vision::is_data_url(&image_url.url) => {
                            let (data, mime) = vision::image_as_base64(&image_url.url).await?;
                            new_parts.push(ContentPart::ImageUrl {
                                image_url: ImageUrl {
                                    url: format!("data:{};base64,{}", mime, data),
                                    detail: image_url.detail.clone(),
                                },
                            });
                        }
                        other => new_parts.push(other.clone()),
                    }
                }
                Some(MessageContent::Parts(new_parts))
            }
            other => other.clone(),
        };

        resolved.push(ChatMessage {
            content,
            ..message.clone()
        });
    }

    Ok(resolved)
}

/// Stamp the advisory cost on a unary response from the bundled pricing
/// table. Authoritative recording happens in the spend pipeline.
pub fn stamp_response_cost(response: &mut crate::core::types::CompletionResponse) {
    if let Some(usage) = &response.usage {
        if let Some(pricing) = crate::core::pricing::static_prices::lookup(&response.model) {
            response.hidden_params.response_cost = Some(pricing.cost(
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.cache_read_input_tokens.unwrap_or(0),
            ));
        }
    }
}

/// Strip a `provider/` prefix from a model name for the upstream call
pub fn strip_model_prefix<'a>(model: &'a str, prefix: &str) -> &'a str {
    model
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(model)
}
