//! HTTP server

pub mod routes;
pub mod state;

pub use state::AppState;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use tracing::info;
use tracing_actix_web::TracingLogger;

use crate::utils::error::{GatewayError, Result};

/// Run the gateway HTTP server until shutdown
pub async fn run_server(state: AppState) -> Result<()> {
    let bind_addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let cors_origins = state.config.server.cors_origins.clone();

    info!("Starting gateway on {}", bind_addr);

    let data = web::Data::new(state);
    HttpServer::new(move || {
        let cors = if cors_origins.is_empty() {
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
        } else {
            let mut cors = Cors::default().allow_any_method().allow_any_header();
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .app_data(data.clone())
            .wrap(TracingLogger::default())
            .wrap(cors)
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| GatewayError::config(format!("failed to bind {}: {}", bind_addr, e)))?
    .run()
    .await
    .map_err(|e| GatewayError::internal(format!("server error: {}", e)))
}
