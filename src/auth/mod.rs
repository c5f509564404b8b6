//! Bearer-token resolution
//!
//! Three token shapes reach the gateway: the master key, provisioned API
//! keys (stored as sha-256 hashes), and short-lived session JWTs.
//! Resolution order is cache → database hash lookup → JWT validation.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::utils::crypto::hash_api_key;
use crate::utils::error::{GatewayError, Result};

/// TTL for resolved-token cache entries. Budget counters move underneath
/// cached entries; the short window bounds the resulting over-admission.
const AUTH_CACHE_TTL: Duration = Duration::from_secs(30);

/// The caller identity and limits attached to one request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    /// Empty set means all models are allowed
    pub allowed_models: HashSet<String>,
    pub blocked_models: HashSet<String>,
    pub max_budget: Option<Decimal>,
    pub current_spend: Decimal,
}

impl AuthContext {
    /// Context granted to the master key: unrestricted, unbudgeted
    pub fn master() -> Self {
        Self {
            key_id: None,
            user_id: None,
            team_id: None,
            org_id: None,
            allowed_models: HashSet::new(),
            blocked_models: HashSet::new(),
            max_budget: None,
            current_spend: Decimal::ZERO,
        }
    }

    /// Allow-list semantics: exact name or suffix match, empty list allows
    /// everything; the block list always wins.
    pub fn is_model_allowed(&self, model: &str) -> bool {
        if self.blocked_models.contains(model) {
            return false;
        }
        if self.allowed_models.is_empty() {
            return true;
        }
        self.allowed_models
            .iter()
            .any(|allowed| model == allowed || model.ends_with(allowed.as_str()))
    }

    /// Whether admission must reject with budget-exceeded
    pub fn budget_exhausted(&self) -> bool {
        self.max_budget
            .map_or(false, |budget| self.current_spend >= budget)
    }
}

/// Session JWT claims issued by the SSO handler
#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    team_id: Option<Uuid>,
    exp: i64,
}

/// Control-plane lookup of provisioned API keys by hash
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<AuthContext>>;
}

/// Token resolver shared by all endpoints
pub struct AuthSystem {
    master_key: String,
    jwt_secret: Option<String>,
    store: Arc<dyn ApiKeyStore>,
    cache: Cache<String, AuthContext>,
}

impl AuthSystem {
    pub fn new(master_key: String, jwt_secret: Option<String>, store: Arc<dyn ApiKeyStore>) -> Self {
        Self {
            master_key,
            jwt_secret,
            store,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(AUTH_CACHE_TTL)
                .build(),
        }
    }

    /// Resolve a bearer token to an AuthContext or reject with 401
    pub async fn resolve(&self, token: &str) -> Result<AuthContext> {
        if token.is_empty() {
            return Err(GatewayError::authentication("Missing bearer token"));
        }

        if token == self.master_key {
            return Ok(AuthContext::master());
        }

        let hash = hash_api_key(token);
        if let Some(cached) = self.cache.get(&hash).await {
            return Ok(cached);
        }

        if let Some(context) = self.store.find_by_hash(&hash).await? {
            self.cache.insert(hash, context.clone()).await;
            return Ok(context);
        }

        if let Some(secret) = &self.jwt_secret {
            if let Ok(context) = self.validate_jwt(token, secret) {
                return Ok(context);
            }
        }

        Err(GatewayError::authentication("Invalid API key"))
    }

    /// Drop a cached token after the control plane mutates its key
    pub async fn invalidate(&self, token: &str) {
        self.cache.remove(&hash_api_key(token)).await;
    }

    fn validate_jwt(&self, token: &str, secret: &str) -> Result<AuthContext> {
        let decoded = jsonwebtoken::decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| GatewayError::authentication(format!("Invalid session token: {}", e)))?;

        let claims = decoded.claims;
        Ok(AuthContext {
            key_id: None,
            user_id: Some(claims.sub),
            team_id: claims.team_id,
            org_id: claims.org_id,
            allowed_models: HashSet::new(),
            blocked_models: HashSet::new(),
            max_budget: None,
            current_spend: Decimal::ZERO,
        })
    }
}

impl std::fmt::Debug for AuthSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSystem")
            .field("jwt_enabled", &self.jwt_secret.is_some())
            .finish_non_exhaustive()
    }
}

/// Extract the bearer token from an Authorization header value
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MapStore {
        keys: Mutex<HashMap<String, AuthContext>>,
        lookups: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl ApiKeyStore for MapStore {
        async fn find_by_hash(&self, key_hash: &str) -> Result<Option<AuthContext>> {
            self.lookups
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.keys.lock().get(key_hash).cloned())
        }
    }

    fn context_with_models(models: &[&str]) -> AuthContext {
        AuthContext {
            key_id: Some(Uuid::new_v4()),
            allowed_models: models.iter().map(|m| m.to_string()).collect(),
            ..AuthContext::master()
        }
    }

    #[tokio::test]
    async fn test_master_key_resolves() {
        let system = AuthSystem::new("sk-master".into(), None, Arc::new(MapStore::default()));
        let context = system.resolve("sk-master").await.unwrap();
        assert!(context.key_id.is_none());
        assert!(!context.budget_exhausted());
    }

    #[tokio::test]
    async fn test_api_key_lookup_and_cache() {
        let store = Arc::new(MapStore::default());
        store.keys.lock().insert(
            hash_api_key("sk-key-1"),
            context_with_models(&["gpt-4o-mini"]),
        );

        let system = AuthSystem::new("sk-master".into(), None, store.clone());

        let first = system.resolve("sk-key-1").await.unwrap();
        assert!(first.key_id.is_some());
        let _second = system.resolve("sk-key-1").await.unwrap();
        assert_eq!(store.lookups.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let system = AuthSystem::new("sk-master".into(), None, Arc::new(MapStore::default()));
        let error = system.resolve("sk-bogus").await.unwrap_err();
        assert!(matches!(error, GatewayError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_jwt_resolution() {
        let secret = "session-secret";
        let user_id = Uuid::new_v4();
        let token = encode(
            &Header::default(),
            &SessionClaims {
                sub: user_id,
                org_id: None,
                team_id: None,
                exp: chrono::Utc::now().timestamp() + 3600,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let system = AuthSystem::new(
            "sk-master".into(),
            Some(secret.into()),
            Arc::new(MapStore::default()),
        );
        let context = system.resolve(&token).await.unwrap();
        assert_eq!(context.user_id, Some(user_id));
    }

    #[test]
    fn test_model_allowlist_semantics() {
        let context = context_with_models(&["gpt-4o-mini", "-preview"]);
        assert!(context.is_model_allowed("gpt-4o-mini"));
        // suffix match
        assert!(context.is_model_allowed("o1-preview"));
        assert!(!context.is_model_allowed("claude-3-haiku"));

        let open = AuthContext::master();
        assert!(open.is_model_allowed("anything"));
    }

    #[test]
    fn test_blocklist_wins() {
        let mut context = AuthContext::master();
        context.blocked_models.insert("gpt-4o".into());
        assert!(!context.is_model_allowed("gpt-4o"));
        assert!(context.is_model_allowed("gpt-4o-mini"));
    }

    #[test]
    fn test_budget_exhaustion() {
        let mut context = AuthContext::master();
        context.max_budget = Some(Decimal::ONE);
        context.current_spend = "0.99".parse().unwrap();
        assert!(!context.budget_exhausted());

        context.current_spend = "1.01".parse().unwrap();
        assert!(context.budget_exhausted());

        context.current_spend = Decimal::ONE;
        assert!(context.budget_exhausted());
    }

    #[test]
    fn test_bearer_extraction() {
        assert_eq!(bearer_token("Bearer sk-abc"), Some("sk-abc"));
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
    }
}
