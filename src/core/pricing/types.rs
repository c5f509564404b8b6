//! Pricing and spend types
//!
//! All money math uses fixed-point decimals with 12 fractional digits; no
//! float conversion happens before serialization for display.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fractional digits carried by spend values (matches the decimal(20,12)
/// column in the spend log)
pub const SPEND_SCALE: u32 = 12;

/// Per-token prices for one public model name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_token: Decimal,
    pub output_cost_per_token: Decimal,
    /// Discounted rate for prompt-cache hits, when the provider has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_cost_per_token: Option<Decimal>,
}

impl ModelPricing {
    pub fn new(input_cost_per_token: Decimal, output_cost_per_token: Decimal) -> Self {
        Self {
            input_cost_per_token,
            output_cost_per_token,
            cached_input_cost_per_token: None,
        }
    }

    /// Zero-cost pricing for self-hosted backends
    pub fn free() -> Self {
        Self::new(Decimal::ZERO, Decimal::ZERO)
    }

    /// `cost = prompt·input + completion·output + cache_read·cached_input`
    pub fn cost(
        &self,
        prompt_tokens: u32,
        completion_tokens: u32,
        cache_read_tokens: u32,
    ) -> Decimal {
        let mut total = Decimal::from(prompt_tokens) * self.input_cost_per_token
            + Decimal::from(completion_tokens) * self.output_cost_per_token;
        if let Some(cached_rate) = self.cached_input_cost_per_token {
            total += Decimal::from(cache_read_tokens) * cached_rate;
        }
        total.round_dp(SPEND_SCALE)
    }
}

/// Append-only record of one request's cost and usage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendLogEntry {
    pub id: Uuid,
    pub request_id: String,
    pub api_key_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub model: String,
    pub provider: Option<String>,
    pub endpoint_type: String,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    pub spend: Decimal,
    pub latency_ms: Option<i64>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_cost_formula() {
        let pricing = ModelPricing::new(dec("0.00000015"), dec("0.0000006"));
        // 10 prompt + 5 completion
        let cost = pricing.cost(10, 5, 0);
        assert_eq!(cost, dec("0.0000045"));
    }

    #[test]
    fn test_cached_tokens_priced_separately() {
        let mut pricing = ModelPricing::new(dec("0.000003"), dec("0.000015"));
        pricing.cached_input_cost_per_token = Some(dec("0.0000003"));

        let cost = pricing.cost(100, 10, 50);
        // 100·3e-6 + 10·1.5e-5 + 50·3e-7
        assert_eq!(cost, dec("0.000465"));
    }

    #[test]
    fn test_small_prices_keep_precision() {
        // A per-token price in the 1e-8 range must survive a single-token
        // computation without truncating to zero.
        let pricing = ModelPricing::new(dec("0.00000001"), dec("0.00000002"));
        let cost = pricing.cost(1, 1, 0);
        assert_eq!(cost, dec("0.00000003"));
        assert!(cost > Decimal::ZERO);
    }

    #[test]
    fn test_free_is_zero() {
        assert_eq!(ModelPricing::free().cost(1_000_000, 1_000_000, 0), Decimal::ZERO);
    }
}
