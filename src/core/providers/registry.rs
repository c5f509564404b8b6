//! Provider adapter registry
//!
//! Maps `provider_type` to an adapter and model names to provider types.
//! Populated once at startup and read-only afterwards.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::providers::{
    anthropic::AnthropicProvider, azure::AzureProvider, bedrock::BedrockProvider,
    cohere::CohereProvider, gemini::GeminiProvider, groq::GroqProvider, mistral::MistralProvider,
    ollama::OllamaProvider, openai::OpenAiProvider, vllm::VllmProvider, Provider, ProviderKind,
};
use crate::utils::error::{GatewayError, Result};

/// Registry of adapters plus the model-pattern table.
///
/// Patterns are exact model names or trailing-`*` wildcards. Longest
/// wildcard wins when several match.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn Provider>>,
    /// (pattern, kind) pairs; order only matters for identical lengths
    model_patterns: Vec<(String, ProviderKind)>,
}

impl ProviderRegistry {
    /// Empty registry (tests build these by hand)
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            model_patterns: Vec::new(),
        }
    }

    /// Registry with all ten built-in adapters and their model patterns
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(OpenAiProvider::new()));
        registry.register(Arc::new(AnthropicProvider::new()));
        registry.register(Arc::new(AzureProvider::new()));
        registry.register(Arc::new(BedrockProvider::new()));
        registry.register(Arc::new(GeminiProvider::new()));
        registry.register(Arc::new(CohereProvider::new()));
        registry.register(Arc::new(MistralProvider::new()));
        registry.register(Arc::new(GroqProvider::new()));
        registry.register(Arc::new(VllmProvider::new()));
        registry.register(Arc::new(OllamaProvider::new()));

        for (pattern, kind) in default_model_patterns() {
            registry.register_pattern(pattern, kind);
        }

        registry
    }

    /// Register an adapter under its kind
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Register a model pattern (exact or trailing-`*` wildcard)
    pub fn register_pattern(&mut self, pattern: impl Into<String>, kind: ProviderKind) {
        self.model_patterns.push((pattern.into(), kind));
    }

    /// Exact lookup by provider type
    pub fn get_by_type(&self, kind: ProviderKind) -> Result<Arc<dyn Provider>> {
        self.providers.get(&kind).cloned().ok_or_else(|| {
            GatewayError::config(format!("Unknown provider type: {}", kind))
        })
    }

    /// Resolve an adapter for a model name.
    ///
    /// Resolution order: `provider/` prefix, exact pattern, longest wildcard,
    /// then each adapter's own `supports_model`.
    pub fn get_for_model(&self, model: &str) -> Result<Arc<dyn Provider>> {
        // (a) explicit provider prefix
        if let Some((prefix, _rest)) = model.split_once('/') {
            if let Ok(kind) = ProviderKind::from_str(prefix) {
                return self.get_by_type(kind);
            }
            return Err(GatewayError::model_not_supported(model));
        }

        // (b) exact pattern match
        for (pattern, kind) in &self.model_patterns {
            if pattern == model {
                return self.get_by_type(*kind);
            }
        }

        // (c) longest wildcard match
        let mut best: Option<(&str, ProviderKind)> = None;
        for (pattern, kind) in &self.model_patterns {
            if let Some(stem) = pattern.strip_suffix('*') {
                if model.starts_with(stem)
                    && best.map_or(true, |(prev, _)| stem.len() > prev.len())
                {
                    best = Some((stem, *kind));
                }
            }
        }
        if let Some((_, kind)) = best {
            return self.get_by_type(kind);
        }

        // (d) last resort: ask every adapter
        for provider in self.providers.values() {
            if provider.supports_model(model) {
                return Ok(provider.clone());
            }
        }

        Err(GatewayError::model_not_supported(model))
    }

    /// Registered provider kinds
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("pattern_count", &self.model_patterns.len())
            .finish()
    }
}

/// Built-in model-name patterns for bare (unprefixed) model resolution
fn default_model_patterns() -> Vec<(&'static str, ProviderKind)> {
    vec![
        ("gpt-3.5-turbo*", ProviderKind::OpenAi),
        ("gpt-4*", ProviderKind::OpenAi),
        ("gpt-4o*", ProviderKind::OpenAi),
        ("o1*", ProviderKind::OpenAi),
        ("text-embedding-*", ProviderKind::OpenAi),
        ("claude-*", ProviderKind::Anthropic),
        ("gemini-*", ProviderKind::Gemini),
        ("command", ProviderKind::Cohere),
        ("command-*", ProviderKind::Cohere),
        ("mistral-*", ProviderKind::Mistral),
        ("mixtral-*", ProviderKind::Mistral),
        ("open-mistral-*", ProviderKind::Mistral),
        ("llama-3*", ProviderKind::Groq),
        ("llama3-*", ProviderKind::Groq),
        ("gemma-*", ProviderKind::Groq),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_model_resolution() {
        let registry = ProviderRegistry::with_defaults();

        let provider = registry.get_for_model("anthropic/claude-3-haiku").unwrap();
        assert_eq!(provider.kind(), ProviderKind::Anthropic);

        let provider = registry.get_for_model("ollama/llama3").unwrap();
        assert_eq!(provider.kind(), ProviderKind::Ollama);
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        let registry = ProviderRegistry::with_defaults();
        let err = registry.get_for_model("petals/bloom").unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotSupported(_)));
    }

    #[test]
    fn test_exact_pattern_beats_wildcard() {
        let mut registry = ProviderRegistry::with_defaults();
        registry.register_pattern("gpt-4-vision-custom", ProviderKind::Azure);

        let provider = registry.get_for_model("gpt-4-vision-custom").unwrap();
        assert_eq!(provider.kind(), ProviderKind::Azure);
    }

    #[test]
    fn test_longest_wildcard_wins() {
        let registry = ProviderRegistry::with_defaults();

        // "gpt-4o*" (len 6 stem) beats "gpt-4*" (len 5 stem)
        let provider = registry.get_for_model("gpt-4o-mini").unwrap();
        assert_eq!(provider.kind(), ProviderKind::OpenAi);

        let provider = registry.get_for_model("claude-3-5-sonnet-20241022").unwrap();
        assert_eq!(provider.kind(), ProviderKind::Anthropic);
    }

    #[test]
    fn test_bare_unknown_model_rejected() {
        let registry = ProviderRegistry::with_defaults();
        let err = registry.get_for_model("totally-unknown-model").unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotSupported(_)));
    }

    #[test]
    fn test_get_by_type() {
        let registry = ProviderRegistry::with_defaults();
        assert!(registry.get_by_type(ProviderKind::Gemini).is_ok());

        let empty = ProviderRegistry::new();
        assert!(empty.get_by_type(ProviderKind::Gemini).is_err());
    }
}
