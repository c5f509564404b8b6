//! Application state shared across HTTP handlers

use std::sync::Arc;

use crate::auth::AuthSystem;
use crate::config::Config;
use crate::core::pricing::SpendRecorder;
use crate::core::router::Router;
use crate::storage::StorageLayer;

/// Shared resources handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthSystem>,
    pub router: Arc<Router>,
    pub storage: Arc<StorageLayer>,
    pub spend: Arc<SpendRecorder>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        auth: Arc<AuthSystem>,
        router: Arc<Router>,
        storage: Arc<StorageLayer>,
        spend: Arc<SpendRecorder>,
    ) -> Self {
        Self {
            config,
            auth,
            router,
            storage,
            spend,
        }
    }
}
