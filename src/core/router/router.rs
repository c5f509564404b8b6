//! The routing and dispatch loop

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::providers::{ProviderCredentials, ProviderRegistry};
use crate::core::router::cache::{CachedDeployment, DeploymentCache};
use crate::core::router::cooldown::{CooldownTracker, StatsRegistry};
use crate::core::router::stream::RouterStream;
use crate::core::router::strategy::{DeploymentSelector, RoutingStrategy};
use crate::core::types::{
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, ModelType,
};
use crate::utils::error::{GatewayError, Result};

/// Router tuning knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,
    /// Retries per candidate model after the first attempt
    pub num_retries: u32,
    /// Default per-request deadline when neither caller nor deployment set one
    pub timeout: Duration,
    /// Alternate model names to attempt when a model's deployments are exhausted
    pub fallbacks: HashMap<String, Vec<String>>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            num_retries: 3,
            timeout: Duration::from_secs(60),
            fallbacks: HashMap::new(),
        }
    }
}

/// Outcome of a routed completion
#[derive(Debug)]
pub enum RouterResponse {
    Unary(CompletionResponse),
    Stream(RouterStream),
}

/// Selects deployments, drives retry/fallback, and keeps stats honest
pub struct Router {
    registry: Arc<ProviderRegistry>,
    cache: Arc<DeploymentCache>,
    cooldown: Arc<CooldownTracker>,
    stats: Arc<StatsRegistry>,
    selector: DeploymentSelector,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<DeploymentCache>,
        cooldown: Arc<CooldownTracker>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            cooldown,
            stats: Arc::new(StatsRegistry::new()),
            selector: DeploymentSelector::new(config.strategy),
            config,
        }
    }

    /// Per-deployment runtime stats (read-only view for introspection)
    pub fn stats(&self) -> &StatsRegistry {
        &self.stats
    }

    /// Cooldown state (read-only view for introspection)
    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Drop cached deployments after a control-plane mutation
    pub fn invalidate_cache(&self, model_name: Option<&str>) {
        self.cache.invalidate(model_name);
    }

    /// Execute a chat completion with routing, retries, and fallbacks.
    ///
    /// The request's `model` is the public name; the dispatched request
    /// carries the deployment's `provider_model`.
    pub async fn completion(
        &self,
        request: CompletionRequest,
        org_id: Option<Uuid>,
        team_id: Option<Uuid>,
    ) -> Result<RouterResponse> {
        let requested_model = request.model.clone();
        let mut candidates = vec![requested_model.clone()];
        if let Some(fallbacks) = self.config.fallbacks.get(&requested_model) {
            candidates.extend(fallbacks.iter().cloned());
        }

        let mut last_error: Option<GatewayError> = None;

        for current_model in &candidates {
            let cached = self
                .cache
                .get(current_model, org_id, team_id, Some(ModelType::Chat))
                .await?;

            if cached.is_empty() {
                debug!(model = %current_model, "no deployments found");
                continue;
            }

            for attempt in 0..=self.config.num_retries {
                let healthy: Vec<Arc<CachedDeployment>> = cached
                    .iter()
                    .filter(|d| self.cooldown.is_healthy(d.id))
                    .cloned()
                    .collect();

                let Some(pick) = self.selector.select(&healthy, current_model, &self.stats)
                else {
                    break;
                };

                let stats = self.stats.get(pick.id);
                stats.begin_request();
                let started = Instant::now();

                let creds = self.credentials_for(&pick, request.timeout);
                let dispatch = CompletionRequest {
                    model: pick.provider_model.clone(),
                    ..request.clone()
                };
                let adapter = self.registry.get_by_type(pick.provider_type)?;

                let error = if request.stream {
                    match adapter.chat_stream(&dispatch, &creds).await {
                        Ok(inner) => {
                            // The wrapper owns the rest of the bookkeeping
                            return Ok(RouterResponse::Stream(RouterStream::new(
                                inner,
                                pick.id,
                                stats,
                                self.cooldown.clone(),
                                started,
                            )));
                        }
                        Err(error) => error,
                    }
                } else {
                    match adapter.chat(&dispatch, &creds).await {
                        Ok(mut response) => {
                            stats.end_request();
                            stats.record_latency(started.elapsed());
                            self.cooldown.record_success(pick.id);
                            if response.provider.is_none() {
                                response.provider = Some(pick.provider_type.to_string());
                            }
                            return Ok(RouterResponse::Unary(response));
                        }
                        Err(error) => error,
                    }
                };

                stats.end_request();
                stats.record_failure();
                self.cooldown.record_failure(pick.id);
                warn!(
                    model = %current_model,
                    provider = %pick.provider_name,
                    attempt,
                    "request failed: {}",
                    error
                );

                if !error.is_retryable() {
                    return Err(error);
                }
                last_error = Some(error);

                if attempt < self.config.num_retries {
                    tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::service_unavailable(format!(
                "No healthy deployments available for model '{}'",
                requested_model
            ))
        }))
    }

    /// Execute an embedding request with the same routing loop
    pub async fn embedding(
        &self,
        request: EmbeddingRequest,
        org_id: Option<Uuid>,
        team_id: Option<Uuid>,
    ) -> Result<EmbeddingResponse> {
        let requested_model = request.model.clone();
        let cached = self
            .cache
            .get(&requested_model, org_id, team_id, Some(ModelType::Embedding))
            .await?;

        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..=self.config.num_retries {
            let healthy: Vec<Arc<CachedDeployment>> = cached
                .iter()
                .filter(|d| self.cooldown.is_healthy(d.id))
                .cloned()
                .collect();

            let Some(pick) = self.selector.select(&healthy, &requested_model, &self.stats)
            else {
                break;
            };

            let stats = self.stats.get(pick.id);
            stats.begin_request();
            let started = Instant::now();

            let creds = self.credentials_for(&pick, None);
            let dispatch = EmbeddingRequest {
                model: pick.provider_model.clone(),
                ..request.clone()
            };
            let adapter = self.registry.get_by_type(pick.provider_type)?;

            match adapter.embed(&dispatch, &creds).await {
                Ok(response) => {
                    stats.end_request();
                    stats.record_latency(started.elapsed());
                    self.cooldown.record_success(pick.id);
                    return Ok(response);
                }
                Err(error) => {
                    stats.end_request();
                    stats.record_failure();
                    self.cooldown.record_failure(pick.id);
                    warn!(
                        model = %requested_model,
                        provider = %pick.provider_name,
                        attempt,
                        "embedding failed: {}",
                        error
                    );

                    if !error.is_retryable() {
                        return Err(error);
                    }
                    last_error = Some(error);

                    if attempt < self.config.num_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::service_unavailable(format!(
                "No healthy deployments available for model '{}'",
                requested_model
            ))
        }))
    }

    /// Deadline inheritance: caller > deployment > router default
    fn credentials_for(
        &self,
        pick: &CachedDeployment,
        request_timeout: Option<f64>,
    ) -> ProviderCredentials {
        let timeout = request_timeout
            .map(Duration::from_secs_f64)
            .or(pick.timeout)
            .unwrap_or(self.config.timeout);

        ProviderCredentials {
            api_key: pick.api_key.clone(),
            api_base: pick.api_base.clone(),
            settings: pick.settings.clone(),
            timeout: Some(timeout),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("strategy", &self.selector.strategy())
            .field("num_retries", &self.config.num_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::providers::{
        ChunkStream, Provider, ProviderCapabilities, ProviderKind,
    };
    use crate::core::router::cache::{DeploymentRow, DeploymentSource, DeploymentSpec};
    use crate::core::types::{ChatMessage, Choice, FinishReason, StreamChunk, Usage};
    use crate::utils::crypto::KeyCipher;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::VecDeque;

    /// Provider stub fed from a queue of scripted outcomes
    struct ScriptedProvider {
        kind: ProviderKind,
        outcomes: Mutex<VecDeque<std::result::Result<(), GatewayError>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(kind: ProviderKind, outcomes: Vec<std::result::Result<(), GatewayError>>) -> Self {
            Self {
                kind,
                outcomes: Mutex::new(outcomes.into()),
                calls: Default::default(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn next_outcome(&self) -> std::result::Result<(), GatewayError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.outcomes.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities::default()
        }

        fn supports_model(&self, _model: &str) -> bool {
            true
        }

        fn transform_request(&self, _request: &CompletionRequest) -> Result<Value> {
            Ok(Value::Null)
        }

        fn transform_response(&self, _body: &Value, _model: &str) -> Result<CompletionResponse> {
            unimplemented!("not exercised by router tests")
        }

        fn transform_chunk(&self, _chunk: &Value, _model: &str) -> Result<Option<StreamChunk>> {
            Ok(None)
        }

        async fn chat(
            &self,
            request: &CompletionRequest,
            _creds: &ProviderCredentials,
        ) -> Result<CompletionResponse> {
            self.next_outcome()?;
            Ok(CompletionResponse {
                id: "chatcmpl-test".into(),
                object: "chat.completion".into(),
                created: 0,
                model: request.model.clone(),
                choices: vec![Choice {
                    index: 0,
                    message: ChatMessage::assistant("ok"),
                    finish_reason: Some(FinishReason::Stop),
                }],
                usage: Some(Usage::new(10, 5)),
                provider: Some(self.kind.to_string()),
                hidden_params: Default::default(),
            })
        }

        async fn chat_stream(
            &self,
            _request: &CompletionRequest,
            _creds: &ProviderCredentials,
        ) -> Result<ChunkStream> {
            self.next_outcome()?;
            let chunks = vec![
                Ok(StreamChunk::content("id", "m", "hi", true)),
                Ok(StreamChunk::terminal(
                    "id",
                    "m",
                    FinishReason::Stop,
                    Some(Usage::new(3, 2)),
                )),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    struct StaticSource {
        rows: HashMap<String, Vec<DeploymentRow>>,
    }

    #[async_trait]
    impl DeploymentSource for StaticSource {
        async fn fetch_deployments(
            &self,
            model_name: &str,
            _org_id: Option<Uuid>,
            _team_id: Option<Uuid>,
            _model_type: Option<ModelType>,
        ) -> Result<Vec<DeploymentRow>> {
            Ok(self.rows.get(model_name).cloned().unwrap_or_default())
        }
    }

    fn cipher() -> KeyCipher {
        KeyCipher::new("router-test-master")
    }

    fn row(model: &str, kind: ProviderKind, id: Uuid) -> DeploymentRow {
        DeploymentRow {
            deployment: DeploymentSpec {
                id,
                model_name: model.into(),
                provider_model: format!("{}-upstream", model),
                model_type: ModelType::Chat,
                provider_type: Some(kind),
                api_base: None,
                api_key_encrypted: Some(cipher().encrypt("sk-test").unwrap()),
                settings: HashMap::new(),
                priority: 1,
                timeout_secs: None,
                org_id: None,
            },
            provider: None,
        }
    }

    fn router_with(
        provider: Arc<ScriptedProvider>,
        rows: HashMap<String, Vec<DeploymentRow>>,
        fallbacks: HashMap<String, Vec<String>>,
        num_retries: u32,
    ) -> Router {
        let mut registry = ProviderRegistry::new();
        registry.register(provider);

        let cache = Arc::new(DeploymentCache::new(
            Arc::new(StaticSource { rows }),
            cipher(),
            Duration::from_secs(60),
        ));

        Router::new(
            Arc::new(registry),
            cache,
            Arc::new(CooldownTracker::default()),
            RouterConfig {
                strategy: RoutingStrategy::SimpleShuffle,
                num_retries,
                timeout: Duration::from_secs(30),
                fallbacks,
            },
        )
    }

    fn chat_request(model: &str) -> CompletionRequest {
        CompletionRequest {
            model: model.into(),
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_unary_rewrites_model() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi, vec![Ok(())]));
        let id = Uuid::new_v4();
        let router = router_with(
            provider.clone(),
            HashMap::from([("gpt-4o-mini".to_string(), vec![row("gpt-4o-mini", ProviderKind::OpenAi, id)])]),
            HashMap::new(),
            3,
        );

        let response = router
            .completion(chat_request("gpt-4o-mini"), None, None)
            .await
            .unwrap();

        match response {
            RouterResponse::Unary(response) => {
                // The dispatched request carried the provider model
                assert_eq!(response.model, "gpt-4o-mini-upstream");
            }
            RouterResponse::Stream(_) => panic!("expected unary"),
        }
        assert_eq!(provider.calls(), 1);
        assert_eq!(router.stats().get(id).in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_on_rate_limit_then_success() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![Err(GatewayError::rate_limit("slow down", Some(1))), Ok(())],
        ));
        let id = Uuid::new_v4();
        let router = router_with(
            provider.clone(),
            HashMap::from([("gpt-4o-mini".to_string(), vec![row("gpt-4o-mini", ProviderKind::OpenAi, id)])]),
            HashMap::new(),
            3,
        );

        let response = router
            .completion(chat_request("gpt-4o-mini"), None, None)
            .await;
        assert!(response.is_ok());
        assert_eq!(provider.calls(), 2);
        assert_eq!(router.stats().get(id).failures(), 0);
        assert_eq!(router.stats().get(id).in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_short_circuits() {
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![Err(GatewayError::bad_request("bad schema"))],
        ));
        let router = router_with(
            provider.clone(),
            HashMap::from([(
                "gpt-4o-mini".to_string(),
                vec![row("gpt-4o-mini", ProviderKind::OpenAi, Uuid::new_v4())],
            )]),
            HashMap::new(),
            3,
        );

        let error = router
            .completion(chat_request("gpt-4o-mini"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::BadRequest(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_excludes_deployment() {
        // Threshold 3: three failures open the cooldown, the fourth
        // request never reaches the adapter.
        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::OpenAi,
            vec![
                Err(GatewayError::api(500, "boom")),
                Err(GatewayError::api(500, "boom")),
                Err(GatewayError::api(500, "boom")),
                Ok(()),
            ],
        ));
        let id = Uuid::new_v4();
        let router = router_with(
            provider.clone(),
            HashMap::from([("gpt-4o-mini".to_string(), vec![row("gpt-4o-mini", ProviderKind::OpenAi, id)])]),
            HashMap::new(),
            2,
        );

        let error = router
            .completion(chat_request("gpt-4o-mini"), None, None)
            .await
            .unwrap_err();
        assert!(error.is_retryable());
        assert_eq!(provider.calls(), 3);
        assert!(!router.cooldown().is_healthy(id));

        // Next request finds no healthy deployment and never dispatches
        let error = router
            .completion(chat_request("gpt-4o-mini"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::ServiceUnavailable(_)));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_model_dispatched() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::Anthropic, vec![Ok(())]));
        let router = router_with(
            provider.clone(),
            HashMap::from([
                // Primary model has no deployments at all
                ("gpt-4o".to_string(), vec![]),
                (
                    "claude-3-haiku".to_string(),
                    vec![row("claude-3-haiku", ProviderKind::Anthropic, Uuid::new_v4())],
                ),
            ]),
            HashMap::from([("gpt-4o".to_string(), vec!["claude-3-haiku".to_string()])]),
            1,
        );

        let response = router
            .completion(chat_request("gpt-4o"), None, None)
            .await
            .unwrap();
        match response {
            RouterResponse::Unary(response) => {
                assert_eq!(response.provider.as_deref(), Some("anthropic"));
            }
            RouterResponse::Stream(_) => panic!("expected unary"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deployments_yields_service_unavailable() {
        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi, vec![]));
        let router = router_with(provider, HashMap::new(), HashMap::new(), 1);

        let error = router
            .completion(chat_request("ghost-model"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, GatewayError::ServiceUnavailable(_)));
        assert!(error.to_string().contains("ghost-model"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_returns_tracked_stream() {
        use futures::StreamExt;

        let provider = Arc::new(ScriptedProvider::new(ProviderKind::OpenAi, vec![Ok(())]));
        let id = Uuid::new_v4();
        let router = router_with(
            provider,
            HashMap::from([("gpt-4o-mini".to_string(), vec![row("gpt-4o-mini", ProviderKind::OpenAi, id)])]),
            HashMap::new(),
            1,
        );

        let mut request = chat_request("gpt-4o-mini");
        request.stream = true;

        let response = router.completion(request, None, None).await.unwrap();
        let mut stream = match response {
            RouterResponse::Stream(stream) => stream,
            RouterResponse::Unary(_) => panic!("expected stream"),
        };

        assert_eq!(router.stats().get(id).in_flight(), 1);

        let mut chunks = 0;
        while let Some(chunk) = stream.next().await {
            chunk.unwrap();
            chunks += 1;
        }
        assert_eq!(chunks, 2);
        assert_eq!(router.stats().get(id).in_flight(), 0);
        assert!(router.cooldown().is_healthy(id));
    }
}
