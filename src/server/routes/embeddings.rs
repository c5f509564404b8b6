//! Embeddings endpoint

use actix_web::{web, HttpRequest, HttpResponse};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::core::pricing::SpendRecord;
use crate::core::types::{EmbeddingRequest, ModelType};
use crate::server::routes::{admit, authenticate};
use crate::server::AppState;
use crate::utils::error::{GatewayError, Result};

/// POST /v1/embeddings
///
/// Same admission pattern as chat, with embedding model-type validation.
pub async fn embeddings(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<EmbeddingRequest>,
) -> Result<HttpResponse> {
    let started = Instant::now();
    let request = body.into_inner();

    let auth = authenticate(&state, &req).await?;
    admit(&auth, &request.model)?;

    let org_id = auth.org_id;
    let team_id = auth.team_id;

    if state.storage.has_deployments().await? {
        if let Some(model_type) = state
            .storage
            .deployment_model_type(&request.model, org_id)
            .await?
        {
            if model_type != ModelType::Embedding {
                return Err(GatewayError::bad_request(format!(
                    "Model '{}' is type '{}', expected 'embedding'. Use the appropriate endpoint for this model type.",
                    request.model, model_type
                )));
            }
        }
    }

    let requested_model = request.model.clone();
    debug!(model = %requested_model, "dispatching embedding");

    let response = state.router.embedding(request, org_id, team_id).await?;

    state.spend.schedule(
        auth,
        SpendRecord {
            request_id: format!("emb-{}", Uuid::new_v4()),
            model: requested_model,
            provider: None,
            endpoint_type: "embedding",
            usage: response.usage.clone(),
            latency_ms: Some(started.elapsed().as_millis() as i64),
            status: "success".to_string(),
            error: None,
        },
    );

    Ok(HttpResponse::Ok().json(response))
}
