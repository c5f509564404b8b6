//! Pricing resolution

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::core::pricing::static_prices::static_pricing_table;
use crate::core::pricing::types::ModelPricing;
use crate::utils::error::Result;

/// Control-plane pricing rows, looked up by public model name
#[async_trait]
pub trait PricingSource: Send + Sync {
    async fn pricing_for_model(&self, model: &str) -> Result<Option<ModelPricing>>;
}

/// Resolves per-token prices with the precedence:
/// control-plane row → bundled static table → zero cost.
pub struct PricingManager {
    source: Option<Arc<dyn PricingSource>>,
    static_table: HashMap<String, ModelPricing>,
}

impl PricingManager {
    pub fn new(source: Option<Arc<dyn PricingSource>>) -> Self {
        Self {
            source,
            static_table: static_pricing_table(),
        }
    }

    /// Pricing for a public model name. Never fails; a DB error degrades to
    /// the static table, an unknown model to zero cost.
    pub async fn get_pricing(&self, model: &str) -> ModelPricing {
        if let Some(source) = &self.source {
            match source.pricing_for_model(model).await {
                Ok(Some(pricing)) => return pricing,
                Ok(None) => {}
                Err(e) => warn!(model, "pricing lookup failed, using static table: {}", e),
            }
        }

        if let Some(pricing) = self.static_table.get(model) {
            return pricing.clone();
        }

        // Prefixed names fall back to their bare form
        if let Some((_, bare)) = model.split_once('/') {
            if let Some(pricing) = self.static_table.get(bare) {
                return pricing.clone();
            }
        }

        ModelPricing::free()
    }
}

impl std::fmt::Debug for PricingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingManager")
            .field("static_models", &self.static_table.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    struct FixedSource(Option<ModelPricing>);

    #[async_trait]
    impl PricingSource for FixedSource {
        async fn pricing_for_model(&self, _model: &str) -> Result<Option<ModelPricing>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_db_row_wins_over_static() {
        let custom = ModelPricing::new(Decimal::ONE, Decimal::TWO);
        let manager = PricingManager::new(Some(Arc::new(FixedSource(Some(custom.clone())))));

        let pricing = manager.get_pricing("gpt-4o-mini").await;
        assert_eq!(pricing, custom);
    }

    #[tokio::test]
    async fn test_static_table_fallback() {
        let manager = PricingManager::new(Some(Arc::new(FixedSource(None))));
        let pricing = manager.get_pricing("gpt-4o-mini").await;
        assert!(pricing.input_cost_per_token > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_model_is_free() {
        let manager = PricingManager::new(None);
        let pricing = manager.get_pricing("ollama/llama3").await;
        assert_eq!(pricing, ModelPricing::free());
    }

    #[tokio::test]
    async fn test_prefixed_name_falls_back_to_bare() {
        let manager = PricingManager::new(None);
        let bare = manager.get_pricing("claude-3-haiku").await;
        let prefixed = manager.get_pricing("anthropic/claude-3-haiku").await;
        assert_eq!(bare, prefixed);
    }
}
