//! End-to-end routing scenarios over mock upstreams

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use llmrelay::auth::AuthContext;
use llmrelay::core::pricing::{PricingManager, SpendLogEntry, SpendRecord, SpendRecorder, SpendSink};
use llmrelay::core::providers::{ProviderKind, ProviderRegistry};
use llmrelay::core::router::{
    CooldownTracker, DeploymentCache, DeploymentRow, DeploymentSource, DeploymentSpec, Router,
    RouterConfig, RouterResponse, RoutingStrategy,
};
use llmrelay::core::types::{ChatMessage, CompletionRequest, FinishReason, ModelType};
use llmrelay::utils::crypto::KeyCipher;
use llmrelay::utils::error::Result;
use llmrelay::GatewayError;

const MASTER_KEY: &str = "failover-test-master";

struct StaticSource {
    rows: Vec<DeploymentRow>,
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
        Ok(self
            .rows
            .iter()
            .filter(|row| row.deployment.model_name == model_name)
            .cloned()
            .collect())
    }
}

fn deployment(model: &str, api_base: &str, priority: i32) -> (Uuid, DeploymentRow) {
    let cipher = KeyCipher::new(MASTER_KEY);
    let id = Uuid::new_v4();
    let row = DeploymentRow {
        deployment: DeploymentSpec {
            id,
            model_name: model.into(),
            provider_model: format!("{}-upstream", model),
            model_type: ModelType::Chat,
            provider_type: Some(ProviderKind::OpenAi),
            api_base: Some(api_base.to_string()),
            api_key_encrypted: Some(cipher.encrypt("sk-test").unwrap()),
            settings: HashMap::new(),
            priority,
            timeout_secs: Some(5),
            org_id: None,
        },
        provider: None,
    };
    (id, row)
}

fn build_router(rows: Vec<DeploymentRow>, threshold: usize, num_retries: u32) -> Router {
    let cache = Arc::new(DeploymentCache::new(
        Arc::new(StaticSource { rows }),
        KeyCipher::new(MASTER_KEY),
        Duration::from_secs(60),
    ));

    Router::new(
        Arc::new(ProviderRegistry::with_defaults()),
        cache,
        Arc::new(CooldownTracker::new(Duration::from_secs(60), threshold)),
        RouterConfig {
            strategy: RoutingStrategy::PriorityBased,
            num_retries,
            timeout: Duration::from_secs(10),
            fallbacks: HashMap::new(),
        },
    )
}

fn chat_request(model: &str, stream: bool) -> CompletionRequest {
    CompletionRequest {
        model: model.into(),
        messages: vec![ChatMessage::user("hello")],
        stream,
        ..Default::default()
    }
}

fn success_body(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "object": "chat.completion",
        "created": 1700000000,
        "model": "whatever",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "ok"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    })
}

#[derive(Default)]
struct CapturingSink {
    entries: parking_lot::Mutex<Vec<SpendLogEntry>>,
}

#[async_trait]
impl SpendSink for CapturingSink {
    async fn append(&self, entry: SpendLogEntry) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

#[tokio::test]
async fn rate_limited_deployment_fails_over_to_secondary() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "rate limited", "type": "rate_limit_error"}
        })))
        .expect(1)
        .mount(&primary)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("chatcmpl-2nd")))
        .expect(1)
        .mount(&secondary)
        .await;

    // Failure threshold 1: the first 429 cools the primary down, so the
    // retry lands on the secondary.
    let (primary_id, primary_row) = deployment("gpt-4o-mini", &primary.uri(), 2);
    let (secondary_id, secondary_row) = deployment("gpt-4o-mini", &secondary.uri(), 1);
    let router = build_router(vec![primary_row, secondary_row], 1, 2);

    let response = router
        .completion(chat_request("gpt-4o-mini", false), None, None)
        .await
        .unwrap();

    match response {
        RouterResponse::Unary(response) => assert_eq!(response.id, "chatcmpl-2nd"),
        RouterResponse::Stream(_) => panic!("expected unary"),
    }

    assert!(!router.cooldown().is_healthy(primary_id));
    assert!(router.cooldown().is_healthy(secondary_id));
    assert_eq!(router.stats().get(primary_id).in_flight(), 0);
    assert_eq!(router.stats().get(secondary_id).in_flight(), 0);
}

#[tokio::test]
async fn repeated_failures_open_cooldown_and_stop_dispatch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "boom", "type": "api_error"}
        })))
        .expect(3)
        .mount(&server)
        .await;

    let (id, row) = deployment("gpt-4o-mini", &server.uri(), 1);
    let router = build_router(vec![row], 3, 2);

    let error = router
        .completion(chat_request("gpt-4o-mini", false), None, None)
        .await
        .unwrap_err();
    assert!(error.is_retryable());
    assert!(!router.cooldown().is_healthy(id));

    // Fourth request: no healthy deployment, no dispatch attempt
    let error = router
        .completion(chat_request("gpt-4o-mini", false), None, None)
        .await
        .unwrap_err();
    assert!(matches!(error, GatewayError::ServiceUnavailable(_)));
}

#[tokio::test]
async fn streaming_completion_reports_usage_and_single_done() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "data: {\"id\":\"chatcmpl-s\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"a\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-s\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"b\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-s\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"c\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-s\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":3,\"total_tokens\":10}}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"),
        )
        .mount(&server)
        .await;

    let (id, row) = deployment("gpt-4o-mini", &server.uri(), 1);
    let router = build_router(vec![row], 3, 1);

    let response = router
        .completion(chat_request("gpt-4o-mini", true), None, None)
        .await
        .unwrap();
    let mut stream = match response {
        RouterResponse::Stream(stream) => stream,
        RouterResponse::Unary(_) => panic!("expected stream"),
    };

    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.unwrap());
    }

    // 3 content chunks plus the terminal chunk with usage
    assert_eq!(chunks.len(), 4);
    let terminal = chunks.last().unwrap();
    assert_eq!(terminal.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(terminal.usage.as_ref().unwrap().total_tokens, 10);

    // Stream termination settles the stats
    assert_eq!(router.stats().get(id).in_flight(), 0);
    assert!(router.cooldown().is_healthy(id));
}

#[tokio::test]
async fn spend_is_recorded_at_requested_model_price() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(success_body("chatcmpl-1")))
        .mount(&server)
        .await;

    let (_, row) = deployment("gpt-4o-mini", &server.uri(), 1);
    let router = build_router(vec![row], 3, 1);

    let response = router
        .completion(chat_request("gpt-4o-mini", false), None, None)
        .await
        .unwrap();
    let RouterResponse::Unary(response) = response else {
        panic!("expected unary");
    };

    let sink = Arc::new(CapturingSink::default());
    let recorder = SpendRecorder::new(Arc::new(PricingManager::new(None)), sink.clone());

    let mut auth = AuthContext::master();
    auth.key_id = Some(Uuid::new_v4());
    recorder
        .record(
            &auth,
            SpendRecord {
                request_id: response.id.clone(),
                model: "gpt-4o-mini".into(),
                provider: response.provider.clone(),
                endpoint_type: "chat",
                usage: response.usage.clone().unwrap(),
                latency_ms: Some(5),
                status: "success".into(),
                error: None,
            },
        )
        .await
        .unwrap();

    let entries = sink.entries.lock();
    assert_eq!(entries.len(), 1);
    // 10 prompt · $0.15/1M + 5 completion · $0.60/1M
    assert_eq!(
        entries[0].spend,
        "0.0000045".parse::<rust_decimal::Decimal>().unwrap()
    );
    assert_eq!(entries[0].model, "gpt-4o-mini");
    assert_eq!(entries[0].provider.as_deref(), Some("openai"));
}
