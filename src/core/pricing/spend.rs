//! Asynchronous spend recording
//!
//! Recording runs after the HTTP response has begun flushing and must never
//! fail the user request; errors are logged and dropped. The sink appends
//! the spend log row and increments the budget counters in one transaction.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::core::pricing::manager::PricingManager;
use crate::core::pricing::types::SpendLogEntry;
use crate::core::types::Usage;
use crate::utils::error::Result;

/// Where finished spend entries go. The storage layer implements this with
/// an insert plus budget-counter increments in a single transaction.
#[async_trait]
pub trait SpendSink: Send + Sync {
    async fn append(&self, entry: SpendLogEntry) -> Result<()>;
}

/// Everything the recorder needs about one terminated request
#[derive(Debug, Clone)]
pub struct SpendRecord {
    pub request_id: String,
    /// Public model name as requested; fallbacks bill at this model's price
    pub model: String,
    pub provider: Option<String>,
    pub endpoint_type: &'static str,
    pub usage: Usage,
    pub latency_ms: Option<i64>,
    pub status: String,
    pub error: Option<String>,
}

/// Computes cost and schedules the append without blocking the response
pub struct SpendRecorder {
    pricing: Arc<PricingManager>,
    sink: Arc<dyn SpendSink>,
}

impl SpendRecorder {
    pub fn new(pricing: Arc<PricingManager>, sink: Arc<dyn SpendSink>) -> Self {
        Self { pricing, sink }
    }

    /// Fire-and-forget recording; spawned onto the runtime
    pub fn schedule(self: &Arc<Self>, auth: AuthContext, record: SpendRecord) {
        let recorder = self.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.record(&auth, record).await {
                error!("failed to record spend: {}", e);
            }
        });
    }

    /// Compute cost and append the spend log entry
    pub async fn record(&self, auth: &AuthContext, record: SpendRecord) -> Result<()> {
        let pricing = self.pricing.get_pricing(&record.model).await;
        let cost = pricing.cost(
            record.usage.prompt_tokens,
            record.usage.completion_tokens,
            record.usage.cache_read_input_tokens.unwrap_or(0),
        );

        debug!(
            model = %record.model,
            spend = %cost,
            prompt = record.usage.prompt_tokens,
            completion = record.usage.completion_tokens,
            "recording spend"
        );

        self.sink
            .append(SpendLogEntry {
                id: Uuid::new_v4(),
                request_id: record.request_id,
                api_key_id: auth.key_id,
                user_id: auth.user_id,
                team_id: auth.team_id,
                org_id: auth.org_id,
                model: record.model,
                provider: record.provider,
                endpoint_type: record.endpoint_type.to_string(),
                prompt_tokens: Some(record.usage.prompt_tokens as i32),
                completion_tokens: Some(record.usage.completion_tokens as i32),
                total_tokens: Some(record.usage.total_tokens as i32),
                spend: cost,
                latency_ms: record.latency_ms,
                status: record.status,
                error: record.error,
                created_at: Utc::now(),
            })
            .await
    }
}

impl std::fmt::Debug for SpendRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpendRecorder").finish_non_exhaustive()
    }
}
