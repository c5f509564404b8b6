//! HTTP route handlers

pub mod auth;
pub mod chat;
pub mod embeddings;
pub mod health;
pub mod models;

use actix_web::{web, HttpRequest};

use crate::auth::{bearer_token, AuthContext};
use crate::server::AppState;
use crate::utils::error::{GatewayError, Result};

/// Register every route on the app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/v1")
            .route("/chat/completions", web::post().to(chat::chat_completions))
            .route("/embeddings", web::post().to(embeddings::embeddings))
            .route("/models", web::get().to(models::list_models))
            .route("/models/{model_id}", web::get().to(models::get_model)),
    )
    .service(
        web::scope("/health")
            .route("", web::get().to(health::health))
            .route("/liveness", web::get().to(health::liveness))
            .route("/readiness", web::get().to(health::readiness))
            .route("/detailed", web::get().to(health::detailed)),
    )
    .service(
        web::scope("/auth")
            .route("/login", web::get().to(auth::login))
            .route("/callback", web::get().to(auth::callback)),
    );
}

/// Resolve the caller from the Authorization header
pub async fn authenticate(state: &AppState, req: &HttpRequest) -> Result<AuthContext> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| GatewayError::authentication("Missing Authorization header"))?;

    state.auth.resolve(token).await
}

/// Admission checks shared by the dispatch endpoints: model allow-list
/// first, then budget. Both run before any dispatch work.
pub fn admit(auth: &AuthContext, model: &str) -> Result<()> {
    if !auth.is_model_allowed(model) {
        return Err(GatewayError::permission_denied(format!(
            "Model '{}' not allowed for this key",
            model
        )));
    }
    if auth.budget_exhausted() {
        return Err(GatewayError::BudgetExceeded("Budget exceeded".to_string()));
    }
    Ok(())
}
