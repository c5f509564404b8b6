//! # llmrelay
//!
//! A multi-tenant AI gateway exposing an OpenAI-compatible API over ten
//! heterogeneous LLM providers, with deployment routing, cooldown-based
//! failover, multi-strategy load balancing, streaming multiplexing, and
//! per-request spend accounting.
//!
//! ## Gateway mode
//!
//! ```rust,no_run
//! use llmrelay::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some(std::path::Path::new("gateway.yaml")))?;
//!     let state = llmrelay::bootstrap(config).await?;
//!     llmrelay::server::run_server(state).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod auth;
pub mod config;
pub mod core;
pub mod server;
pub mod storage;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthSystem;
use crate::core::pricing::{PricingManager, SpendRecorder};
use crate::core::providers::ProviderRegistry;
use crate::core::router::{CooldownTracker, DeploymentCache, Router, RouterConfig};
use crate::server::AppState;
use crate::storage::StorageLayer;
use crate::utils::crypto::KeyCipher;
use crate::utils::error::Result;

// Re-export the types most callers need
pub use crate::core::types::{
    ChatMessage, CompletionRequest, CompletionResponse, MessageRole, StreamChunk,
};
pub use crate::utils::error::GatewayError;

/// Wire the full gateway from configuration: storage, auth, registry,
/// router, pricing, and spend recording.
pub async fn bootstrap(config: config::Config) -> Result<AppState> {
    let config = Arc::new(config);

    let storage = Arc::new(StorageLayer::connect(&config.database).await?);

    let auth = Arc::new(AuthSystem::new(
        config.auth.master_key.clone(),
        config.auth.jwt_secret.clone(),
        storage.clone(),
    ));

    let registry = Arc::new(ProviderRegistry::with_defaults());
    let cipher = KeyCipher::new(&config.auth.master_key);
    let cache = Arc::new(DeploymentCache::new(
        storage.clone(),
        cipher,
        Duration::from_secs(config.router.cache_ttl_secs),
    ));
    let cooldown = Arc::new(CooldownTracker::new(
        Duration::from_secs(config.router.cooldown_time_secs),
        config.router.failure_threshold,
    ));
    let router = Arc::new(Router::new(
        registry,
        cache,
        cooldown,
        RouterConfig {
            strategy: config.router.strategy,
            num_retries: config.router.num_retries,
            timeout: Duration::from_secs(config.router.timeout_secs),
            fallbacks: config.router.fallbacks.clone(),
        },
    ));

    let pricing = Arc::new(PricingManager::new(Some(storage.clone())));
    let spend = Arc::new(SpendRecorder::new(pricing, storage.clone()));

    Ok(AppState::new(config, auth, router, storage, spend))
}
