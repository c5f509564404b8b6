//! TTL-bounded deployment cache
//!
//! Holds the `{model, org, team, type} → [deployment + decrypted key]` view
//! the router selects from. Every entry carries its own insertion time and
//! expires once it is older than the TTL; any control-plane mutation must
//! invalidate.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use uuid::Uuid;

use crate::core::providers::ProviderKind;
use crate::core::types::ModelType;
use crate::utils::crypto::KeyCipher;
use crate::utils::error::Result;

/// Default cache TTL
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Deployment row as stored in the control plane (pre-filtering)
#[derive(Debug, Clone)]
pub struct DeploymentSpec {
    pub id: Uuid,
    pub model_name: String,
    pub provider_model: String,
    pub model_type: ModelType,
    /// Present on standalone deployments; linked ones inherit from the
    /// provider config
    pub provider_type: Option<ProviderKind>,
    pub api_base: Option<String>,
    pub api_key_encrypted: Option<String>,
    pub settings: HashMap<String, Value>,
    pub priority: i32,
    pub timeout_secs: Option<u64>,
    pub org_id: Option<Uuid>,
}

/// Provider config row joined onto a linked deployment
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    pub id: Uuid,
    pub name: String,
    pub provider_type: ProviderKind,
    pub api_base: Option<String>,
    pub api_key_encrypted: Option<String>,
    pub settings: HashMap<String, Value>,
    pub is_active: bool,
}

/// One fetched row: a deployment plus its linked provider config, if any
#[derive(Debug, Clone)]
pub struct DeploymentRow {
    pub deployment: DeploymentSpec,
    pub provider: Option<ProviderSpec>,
}

/// Where deployment rows come from. The storage layer implements this
/// against the control-plane database; tests provide stubs.
#[async_trait::async_trait]
pub trait DeploymentSource: Send + Sync {
    /// Fetch active deployments for a model, already filtered by org scope
    /// and team provider access, ordered by priority descending.
    async fn fetch_deployments(
        &self,
        model_name: &str,
        org_id: Option<Uuid>,
        team_id: Option<Uuid>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<DeploymentRow>>;
}

/// A deployment ready for dispatch: key decrypted, settings merged,
/// deployment-level fields already overriding provider-level ones.
#[derive(Debug, Clone)]
pub struct CachedDeployment {
    pub id: Uuid,
    pub model_name: String,
    pub provider_model: String,
    pub model_type: ModelType,
    pub provider_type: ProviderKind,
    /// Provider config name, or "standalone"
    pub provider_name: String,
    pub priority: i32,
    pub timeout: Option<Duration>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub settings: HashMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model_name: String,
    org_id: Option<Uuid>,
    team_id: Option<Uuid>,
    model_type: Option<ModelType>,
}

/// One cached entry with its own insertion time. Staleness is judged per
/// entry; a refresh of one key never extends another's lifetime.
struct CacheEntry {
    cached_at: Instant,
    deployments: Arc<Vec<Arc<CachedDeployment>>>,
}

/// Deployment cache with a per-entry TTL
pub struct DeploymentCache {
    source: Arc<dyn DeploymentSource>,
    cipher: KeyCipher,
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl DeploymentCache {
    pub fn new(source: Arc<dyn DeploymentSource>, cipher: KeyCipher, ttl: Duration) -> Self {
        Self {
            source,
            cipher,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached deployments for a model, refreshing on miss or expiry.
    ///
    /// Concurrent callers may race to refresh the same key; the final
    /// cached value is whichever write lands last, and both are consistent.
    pub async fn get(
        &self,
        model_name: &str,
        org_id: Option<Uuid>,
        team_id: Option<Uuid>,
        model_type: Option<ModelType>,
    ) -> Result<Arc<Vec<Arc<CachedDeployment>>>> {
        let key = CacheKey {
            model_name: model_name.to_string(),
            org_id,
            team_id,
            model_type,
        };

        if let Some(cached) = self.lookup(&key) {
            return Ok(cached);
        }

        let rows = self
            .source
            .fetch_deployments(model_name, org_id, team_id, model_type)
            .await?;
        let deployments = Arc::new(self.build_entries(rows));

        self.entries.write().insert(
            key,
            CacheEntry {
                cached_at: Instant::now(),
                deployments: deployments.clone(),
            },
        );

        Ok(deployments)
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<Vec<Arc<CachedDeployment>>>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.cached_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.deployments.clone())
    }

    /// Filter and key-resolution pipeline over raw rows.
    ///
    /// Linked deployments behind an inactive provider are dropped, the
    /// deployment-level key wins over the provider-level key, rows whose
    /// key fails to decrypt are dropped, and priority-descending order is
    /// restored at the end.
    fn build_entries(&self, rows: Vec<DeploymentRow>) -> Vec<Arc<CachedDeployment>> {
        let mut built: Vec<Arc<CachedDeployment>> = Vec::with_capacity(rows.len());

        for row in rows {
            let DeploymentRow {
                deployment,
                provider,
            } = row;

            let (provider_type, provider_name, base_api_base, base_settings, provider_key) =
                match &provider {
                    Some(config) => {
                        if !config.is_active {
                            continue;
                        }
                        (
                            config.provider_type,
                            config.name.clone(),
                            config.api_base.clone(),
                            config.settings.clone(),
                            config.api_key_encrypted.clone(),
                        )
                    }
                    None => {
                        let Some(provider_type) = deployment.provider_type else {
                            warn!(
                                model = %deployment.model_name,
                                "standalone deployment has no provider_type, skipping"
                            );
                            continue;
                        };
                        if deployment.api_key_encrypted.is_none() {
                            warn!(
                                model = %deployment.model_name,
                                "standalone deployment has no API key, skipping"
                            );
                            continue;
                        }
                        (
                            provider_type,
                            "standalone".to_string(),
                            None,
                            HashMap::new(),
                            None,
                        )
                    }
                };

            let encrypted = deployment
                .api_key_encrypted
                .as_ref()
                .or(provider_key.as_ref());
            let api_key = match encrypted {
                Some(ciphertext) => match self.cipher.decrypt(ciphertext) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(
                            model = %deployment.model_name,
                            provider = %provider_name,
                            "failed to decrypt API key, skipping deployment: {}",
                            e
                        );
                        continue;
                    }
                },
                None => {
                    warn!(
                        model = %deployment.model_name,
                        provider = %provider_name,
                        "deployment has no key source, skipping"
                    );
                    continue;
                }
            };

            // Merge: provider settings first, deployment settings override
            let mut settings = base_settings;
            settings.extend(deployment.settings.clone());

            built.push(Arc::new(CachedDeployment {
                id: deployment.id,
                model_name: deployment.model_name,
                provider_model: deployment.provider_model,
                model_type: deployment.model_type,
                provider_type,
                provider_name,
                priority: deployment.priority,
                timeout: deployment.timeout_secs.map(Duration::from_secs),
                api_key,
                api_base: deployment.api_base.or(base_api_base),
                settings,
            }));
        }

        built.sort_by(|a, b| b.priority.cmp(&a.priority));
        built
    }

    /// Drop cached entries so the next read refetches. The control plane
    /// calls this after any mutation to deployments, provider configs, team
    /// access, or pricing.
    pub fn invalidate(&self, model_name: Option<&str>) {
        let mut entries = self.entries.write();
        match model_name {
            Some(model) => entries.retain(|key, _| key.model_name != model),
            None => entries.clear(),
        }
    }
}

impl std::fmt::Debug for DeploymentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSource {
        rows: Vec<DeploymentRow>,
        fetches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DeploymentSource for StubSource {
        async fn fetch_deployments(
            &self,
            _model_name: &str,
            _org_id: Option<Uuid>,
            _team_id: Option<Uuid>,
            _model_type: Option<ModelType>,
        ) -> Result<Vec<DeploymentRow>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.clone())
        }
    }

    fn cipher() -> KeyCipher {
        KeyCipher::new("cache-test-master")
    }

    fn spec(priority: i32, key: Option<String>) -> DeploymentSpec {
        DeploymentSpec {
            id: Uuid::new_v4(),
            model_name: "gpt-4o-mini".into(),
            provider_model: "gpt-4o-mini-2024".into(),
            model_type: ModelType::Chat,
            provider_type: Some(ProviderKind::OpenAi),
            api_base: None,
            api_key_encrypted: key,
            settings: HashMap::new(),
            priority,
            timeout_secs: None,
            org_id: None,
        }
    }

    fn cache_with(rows: Vec<DeploymentRow>) -> (DeploymentCache, Arc<StubSource>) {
        let source = Arc::new(StubSource {
            rows,
            fetches: AtomicUsize::new(0),
        });
        let cache = DeploymentCache::new(source.clone(), cipher(), Duration::from_secs(60));
        (cache, source)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let encrypted = cipher().encrypt("sk-live").unwrap();
        let (cache, source) = cache_with(vec![DeploymentRow {
            deployment: spec(1, Some(encrypted)),
            provider: None,
        }]);

        let first = cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].api_key.as_deref(), Some("sk-live"));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        let second = cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let encrypted = cipher().encrypt("sk-live").unwrap();
        let source = Arc::new(StubSource {
            rows: vec![DeploymentRow {
                deployment: spec(1, Some(encrypted)),
                provider: None,
            }],
            fetches: AtomicUsize::new(0),
        });
        let cache = DeploymentCache::new(source.clone(), cipher(), Duration::from_millis(20));

        cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refreshing_one_key_does_not_extend_another() {
        let encrypted = cipher().encrypt("sk-live").unwrap();
        let mut other = spec(1, Some(cipher().encrypt("sk-live").unwrap()));
        other.model_name = "claude-3-haiku".into();
        let source = Arc::new(StubSource {
            rows: vec![
                DeploymentRow {
                    deployment: spec(1, Some(encrypted)),
                    provider: None,
                },
                DeploymentRow {
                    deployment: other,
                    provider: None,
                },
            ],
            fetches: AtomicUsize::new(0),
        });
        let cache = DeploymentCache::new(source.clone(), cipher(), Duration::from_millis(50));

        // Key A at t=0
        cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Key B at t=30 must not refresh A's timestamp
        cache.get("claude-3-haiku", None, None, None).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        // t=60: A is past TTL and must refetch, B (age 30) is still fresh
        cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        cache.get("claude-3-haiku", None, None, None).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let encrypted = cipher().encrypt("sk-live").unwrap();
        let (cache, source) = cache_with(vec![DeploymentRow {
            deployment: spec(1, Some(encrypted)),
            provider: None,
        }]);

        cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        cache.invalidate(Some("gpt-4o-mini"));
        cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_standalone_without_key_skipped() {
        let (cache, _) = cache_with(vec![DeploymentRow {
            deployment: spec(1, None),
            provider: None,
        }]);

        let deployments = cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert!(deployments.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_provider_dropped() {
        let encrypted = cipher().encrypt("sk-live").unwrap();
        let provider = ProviderSpec {
            id: Uuid::new_v4(),
            name: "prod-openai".into(),
            provider_type: ProviderKind::OpenAi,
            api_base: None,
            api_key_encrypted: Some(encrypted),
            settings: HashMap::new(),
            is_active: false,
        };
        let mut deployment = spec(1, None);
        deployment.provider_type = None;

        let (cache, _) = cache_with(vec![DeploymentRow {
            deployment,
            provider: Some(provider),
        }]);

        let deployments = cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert!(deployments.is_empty());
    }

    #[tokio::test]
    async fn test_deployment_key_wins_over_provider_key() {
        let cipher = cipher();
        let provider = ProviderSpec {
            id: Uuid::new_v4(),
            name: "prod-openai".into(),
            provider_type: ProviderKind::OpenAi,
            api_base: Some("https://provider.example".into()),
            api_key_encrypted: Some(cipher.encrypt("sk-provider").unwrap()),
            settings: HashMap::from([("api_version".to_string(), serde_json::json!("v1"))]),
            is_active: true,
        };
        let mut deployment = spec(1, Some(cipher.encrypt("sk-deployment").unwrap()));
        deployment.provider_type = None;
        deployment.api_base = Some("https://deployment.example".into());
        deployment
            .settings
            .insert("api_version".into(), serde_json::json!("v2"));

        let (cache, _) = cache_with(vec![DeploymentRow {
            deployment,
            provider: Some(provider),
        }]);

        let deployments = cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(deployments[0].api_key.as_deref(), Some("sk-deployment"));
        assert_eq!(
            deployments[0].api_base.as_deref(),
            Some("https://deployment.example")
        );
        assert_eq!(deployments[0].settings["api_version"], "v2");
        assert_eq!(deployments[0].provider_name, "prod-openai");
    }

    #[tokio::test]
    async fn test_undecryptable_key_dropped() {
        let other_cipher = KeyCipher::new("different-master");
        let (cache, _) = cache_with(vec![DeploymentRow {
            deployment: spec(1, Some(other_cipher.encrypt("sk-live").unwrap())),
            provider: None,
        }]);

        let deployments = cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert!(deployments.is_empty());
    }

    #[tokio::test]
    async fn test_priority_descending_order() {
        let cipher = cipher();
        let rows = vec![
            DeploymentRow {
                deployment: spec(1, Some(cipher.encrypt("low").unwrap())),
                provider: None,
            },
            DeploymentRow {
                deployment: spec(9, Some(cipher.encrypt("high").unwrap())),
                provider: None,
            },
        ];
        let (cache, _) = cache_with(rows);

        let deployments = cache.get("gpt-4o-mini", None, None, None).await.unwrap();
        assert_eq!(deployments[0].priority, 9);
        assert_eq!(deployments[1].priority, 1);
    }
}
