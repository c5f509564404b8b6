//! Bundled per-token pricing table
//!
//! Fallback prices for well-known public model names, keyed by the model
//! name clients send. The control-plane pricing table overrides these;
//! self-hosted backends (vLLM, Ollama) fall through to zero cost.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::core::pricing::types::ModelPricing;

static TABLE: Lazy<HashMap<String, ModelPricing>> = Lazy::new(static_pricing_table);

/// Look up a bundled price by public model name; prefixed names fall back
/// to their bare form.
pub fn lookup(model: &str) -> Option<&'static ModelPricing> {
    TABLE.get(model).or_else(|| {
        model
            .split_once('/')
            .and_then(|(_, bare)| TABLE.get(bare))
    })
}

fn usd(per_million: &str) -> Decimal {
    let per_million: Decimal = per_million.parse().expect("valid price literal");
    per_million / Decimal::from(1_000_000u32)
}

fn entry(input_per_million: &str, output_per_million: &str) -> ModelPricing {
    ModelPricing::new(usd(input_per_million), usd(output_per_million))
}

fn entry_cached(
    input_per_million: &str,
    output_per_million: &str,
    cached_per_million: &str,
) -> ModelPricing {
    ModelPricing {
        cached_input_cost_per_token: Some(usd(cached_per_million)),
        ..entry(input_per_million, output_per_million)
    }
}

/// The bundled table. Prices are USD per million tokens at table-build time.
pub fn static_pricing_table() -> HashMap<String, ModelPricing> {
    let mut table = HashMap::new();

    // OpenAI
    table.insert("gpt-4o".into(), entry_cached("2.50", "10.00", "1.25"));
    table.insert("gpt-4o-mini".into(), entry_cached("0.15", "0.60", "0.075"));
    table.insert("gpt-4-turbo".into(), entry("10.00", "30.00"));
    table.insert("gpt-4".into(), entry("30.00", "60.00"));
    table.insert("gpt-3.5-turbo".into(), entry("0.50", "1.50"));
    table.insert("o1".into(), entry_cached("15.00", "60.00", "7.50"));
    table.insert("o1-mini".into(), entry_cached("1.10", "4.40", "0.55"));
    table.insert("text-embedding-3-small".into(), entry("0.02", "0"));
    table.insert("text-embedding-3-large".into(), entry("0.13", "0"));
    table.insert("text-embedding-ada-002".into(), entry("0.10", "0"));

    // Anthropic
    table.insert(
        "claude-3-5-sonnet-20241022".into(),
        entry_cached("3.00", "15.00", "0.30"),
    );
    table.insert("claude-3-5-sonnet".into(), entry_cached("3.00", "15.00", "0.30"));
    table.insert("claude-3-5-haiku".into(), entry_cached("0.80", "4.00", "0.08"));
    table.insert("claude-3-opus".into(), entry_cached("15.00", "75.00", "1.50"));
    table.insert("claude-3-sonnet".into(), entry("3.00", "15.00"));
    table.insert("claude-3-haiku".into(), entry_cached("0.25", "1.25", "0.03"));
    table.insert(
        "claude-3-haiku-20240307".into(),
        entry_cached("0.25", "1.25", "0.03"),
    );

    // Google
    table.insert("gemini-1.5-pro".into(), entry("1.25", "5.00"));
    table.insert("gemini-1.5-flash".into(), entry("0.075", "0.30"));
    table.insert("gemini-2.0-flash".into(), entry("0.10", "0.40"));

    // Cohere
    table.insert("command-r".into(), entry("0.15", "0.60"));
    table.insert("command-r-plus".into(), entry("2.50", "10.00"));

    // Mistral
    table.insert("mistral-large-latest".into(), entry("2.00", "6.00"));
    table.insert("mistral-small-latest".into(), entry("0.20", "0.60"));
    table.insert("open-mistral-7b".into(), entry("0.25", "0.25"));
    table.insert("open-mixtral-8x7b".into(), entry("0.70", "0.70"));

    // Groq
    table.insert("llama-3.1-70b-versatile".into(), entry("0.59", "0.79"));
    table.insert("llama-3.1-8b-instant".into(), entry("0.05", "0.08"));
    table.insert("llama3-70b-8192".into(), entry("0.59", "0.79"));
    table.insert("llama3-8b-8192".into(), entry("0.05", "0.08"));
    table.insert("gemma-7b-it".into(), entry("0.07", "0.07"));

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_million_conversion() {
        let table = static_pricing_table();
        let pricing = &table["gpt-4o-mini"];
        assert_eq!(
            pricing.input_cost_per_token,
            "0.00000015".parse::<Decimal>().unwrap()
        );
        assert_eq!(
            pricing.output_cost_per_token,
            "0.0000006".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn test_embedding_models_have_zero_output_cost() {
        let table = static_pricing_table();
        assert_eq!(
            table["text-embedding-3-small"].output_cost_per_token,
            Decimal::ZERO
        );
    }

    #[test]
    fn test_cached_rates_present_where_expected() {
        let table = static_pricing_table();
        assert!(table["claude-3-haiku"].cached_input_cost_per_token.is_some());
        assert!(table["command-r"].cached_input_cost_per_token.is_none());
    }

    #[test]
    fn test_lookup_handles_prefixed_names() {
        assert!(lookup("gpt-4o-mini").is_some());
        assert_eq!(lookup("anthropic/claude-3-haiku"), lookup("claude-3-haiku"));
        assert!(lookup("ollama/llama3").is_none());
    }
}
