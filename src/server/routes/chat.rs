//! Chat completion endpoint

use actix_web::{web, HttpRequest, HttpResponse};
use futures::StreamExt;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::core::pricing::SpendRecord;
use crate::core::router::{RouterResponse, RouterStream};
use crate::core::types::{CompletionRequest, ModelType, Usage};
use crate::server::routes::{admit, authenticate};
use crate::server::AppState;
use crate::utils::error::{GatewayError, Result};

/// POST /v1/chat/completions
///
/// OpenAI-compatible, unary or SSE. Admission order: authenticate (401),
/// model allow-list (403), budget (429), then body validation and the
/// model-type check (400); spend recording is scheduled after the response
/// terminates.
pub async fn chat_completions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CompletionRequest>,
) -> Result<HttpResponse> {
    let started = Instant::now();
    let request = body.into_inner();

    let auth = authenticate(&state, &req).await?;
    admit(&auth, &request.model)?;
    request.validate()?;

    let org_id = auth.org_id;
    let team_id = auth.team_id;

    // A non-chat deployment under this name is a caller mistake, not a
    // routing miss. Skipped when the control plane has no deployments at
    // all (static-config operation).
    if state.storage.has_deployments().await? {
        if let Some(model_type) = state
            .storage
            .deployment_model_type(&request.model, org_id)
            .await?
        {
            if model_type != ModelType::Chat {
                return Err(GatewayError::bad_request(format!(
                    "Model '{}' is type '{}', expected 'chat'. Use the appropriate endpoint for this model type.",
                    request.model, model_type
                )));
            }
        }
    }

    let requested_model = request.model.clone();
    let streaming = request.stream;
    debug!(model = %requested_model, streaming, "dispatching chat completion");

    match state.router.completion(request, org_id, team_id).await? {
        RouterResponse::Unary(response) => {
            if let Some(usage) = response.usage.clone() {
                state.spend.schedule(
                    auth,
                    SpendRecord {
                        request_id: response.id.clone(),
                        model: requested_model,
                        provider: response.provider.clone(),
                        endpoint_type: "chat",
                        usage,
                        latency_ms: Some(started.elapsed().as_millis() as i64),
                        status: "success".to_string(),
                        error: None,
                    },
                );
            } else {
                warn!(model = %requested_model, "response carried no usage, skipping spend");
            }

            Ok(HttpResponse::Ok().json(response))
        }
        RouterResponse::Stream(stream) => Ok(sse_response(
            state.get_ref().clone(),
            auth,
            requested_model,
            stream,
            started,
        )),
    }
}

/// Wrap the router stream as SSE frames.
///
/// Every chunk becomes one `data:` frame; the terminal frame is the literal
/// `data: [DONE]` and nothing follows it. Usage from the final chunk feeds
/// spend recording, scheduled once the stream ends.
fn sse_response(
    state: AppState,
    auth: AuthContext,
    requested_model: String,
    stream: RouterStream,
    started: Instant,
) -> HttpResponse {
    let request_id = format!("chatcmpl-{}", Uuid::new_v4());

    let frames = async_stream::stream! {
        tokio::pin!(stream);

        let mut usage: Option<Usage> = None;
        let mut provider: Option<String> = None;
        let mut error: Option<String> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    if let Some(chunk_usage) = &chunk.usage {
                        usage = Some(chunk_usage.clone());
                    }
                    if provider.is_none() {
                        provider = chunk.provider.clone();
                    }
                    match serde_json::to_string(&chunk) {
                        Ok(data) => {
                            yield Ok::<_, GatewayError>(web::Bytes::from(format!("data: {}\n\n", data)));
                        }
                        Err(e) => {
                            warn!("failed to serialize stream chunk: {}", e);
                        }
                    }
                }
                Err(stream_error) => {
                    warn!("streaming error: {}", stream_error);
                    let frame = json!({
                        "error": {
                            "message": stream_error.to_string(),
                            "type": stream_error.error_type(),
                            "code": stream_error.to_http_status().as_u16().to_string(),
                        }
                    });
                    error = Some(stream_error.to_string());
                    yield Ok(web::Bytes::from(format!("data: {}\n\n", frame)));
                    break;
                }
            }
        }

        // Terminal chunk reached (or the stream died); account for what
        // the provider reported either way.
        if let Some(usage) = usage.take() {
            state.spend.schedule(
                auth.clone(),
                SpendRecord {
                    request_id: request_id.clone(),
                    model: requested_model.clone(),
                    provider: provider.clone(),
                    endpoint_type: "chat",
                    usage,
                    latency_ms: Some(started.elapsed().as_millis() as i64),
                    status: if error.is_none() { "success" } else { "error" }.to_string(),
                    error: error.clone(),
                },
            );
        }

        yield Ok(web::Bytes::from_static(b"data: [DONE]\n\n"));
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(frames)
}
