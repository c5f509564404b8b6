//! Health endpoints

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::server::AppState;
use crate::utils::error::Result;

/// GET /health
pub async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// GET /health/liveness — process is up
pub async fn liveness() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({"status": "alive"})))
}

/// GET /health/readiness — database reachable
pub async fn readiness(state: web::Data<AppState>) -> Result<HttpResponse> {
    match state.storage.has_deployments().await {
        Ok(_) => Ok(HttpResponse::Ok().json(json!({"status": "ready"}))),
        Err(e) => Ok(HttpResponse::ServiceUnavailable().json(json!({
            "status": "not_ready",
            "error": e.to_string(),
        }))),
    }
}

/// GET /health/detailed — per-deployment runtime stats
pub async fn detailed(state: web::Data<AppState>) -> Result<HttpResponse> {
    let deployments = state.storage.list_active_deployments(None).await?;

    let stats: Vec<_> = deployments
        .into_iter()
        .map(|(deployment, provider_name)| {
            let runtime = state.router.stats().get(deployment.id);
            json!({
                "model_name": deployment.model_name,
                "provider_model": deployment.provider_model,
                "provider": provider_name.unwrap_or_else(|| "standalone".to_string()),
                "priority": deployment.priority,
                "in_flight": runtime.in_flight(),
                "total_requests": runtime.total(),
                "avg_latency": runtime.avg_latency(),
                "healthy": state.router.cooldown().is_healthy(deployment.id),
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "deployments": stats,
    })))
}
