//! Model catalog endpoints

use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::HashSet;

use crate::core::types::{ModelCard, ModelListResponse};
use crate::server::routes::authenticate;
use crate::server::AppState;
use crate::utils::error::{GatewayError, Result};

/// Union of database deployments and static-config models, deduplicated by
/// model name
async fn catalog(state: &AppState, org_id: Option<uuid::Uuid>) -> Result<Vec<ModelCard>> {
    let mut seen = HashSet::new();
    let mut cards = Vec::new();

    for name in state.storage.list_model_names(org_id, None).await? {
        if seen.insert(name.clone()) {
            cards.push(ModelCard::new(name, "llmrelay"));
        }
    }

    for model in &state.config.models {
        if seen.insert(model.model_name.clone()) {
            cards.push(ModelCard::new(
                model.model_name.clone(),
                model.owned_by.clone(),
            ));
        }
    }

    Ok(cards)
}

/// GET /v1/models
pub async fn list_models(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let auth = authenticate(&state, &req).await?;
    let cards = catalog(&state, auth.org_id).await?;
    Ok(HttpResponse::Ok().json(ModelListResponse::new(cards)))
}

/// GET /v1/models/{model_id}
pub async fn get_model(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let auth = authenticate(&state, &req).await?;
    let model_id = path.into_inner();

    let cards = catalog(&state, auth.org_id).await?;
    let card = cards
        .into_iter()
        .find(|card| card.id == model_id)
        .ok_or_else(|| GatewayError::not_found(format!("Model '{}' not found", model_id)))?;

    Ok(HttpResponse::Ok().json(card))
}
