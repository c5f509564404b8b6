//! Gateway configuration
//!
//! Loaded from a YAML file with `LLMRELAY_*` environment overrides
//! (double-underscore path separator, e.g. `LLMRELAY_SERVER__PORT=9000`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::core::router::RoutingStrategy;
use crate::utils::error::{GatewayError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub router: RouterSettings,
    /// Static catalog entries merged into `/v1/models`
    #[serde(default)]
    pub models: Vec<StaticModel>,
}

/// HTTP server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Control-plane database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Authentication secrets
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Master bearer token; also the AEAD key source for stored API keys
    #[serde(default)]
    pub master_key: String,
    /// HS256 secret for session JWTs; None disables JWT auth
    #[serde(default)]
    pub jwt_secret: Option<String>,
}

/// Router tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_cooldown_time")]
    pub cooldown_time_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Alternate models to try when a model's deployments are exhausted
    #[serde(default)]
    pub fallbacks: HashMap<String, Vec<String>>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            num_retries: default_num_retries(),
            timeout_secs: default_timeout(),
            cooldown_time_secs: default_cooldown_time(),
            failure_threshold: default_failure_threshold(),
            cache_ttl_secs: default_cache_ttl(),
            fallbacks: HashMap::new(),
        }
    }
}

/// Config-declared model shown in the catalog alongside DB deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticModel {
    pub model_name: String,
    #[serde(default = "default_owned_by")]
    pub owned_by: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_database_url() -> String {
    "sqlite://llmrelay.db?mode=rwc".to_string()
}
fn default_max_connections() -> u32 {
    20
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_num_retries() -> u32 {
    3
}
fn default_timeout() -> u64 {
    60
}
fn default_cooldown_time() -> u64 {
    60
}
fn default_failure_threshold() -> usize {
    3
}
fn default_cache_ttl() -> u64 {
    60
}
fn default_owned_by() -> String {
    "llmrelay".to_string()
}

impl Config {
    /// Load from an optional YAML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!("Loading configuration from {:?}", path);
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("LLMRELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::config(format!("failed to load configuration: {}", e)))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| GatewayError::config(format!("failed to parse configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.auth.master_key.is_empty() {
            return Err(GatewayError::config(
                "auth.master_key is required (or set LLMRELAY_AUTH__MASTER_KEY)",
            ));
        }
        if self.router.failure_threshold == 0 {
            return Err(GatewayError::config(
                "router.failure_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "auth:\n  master_key: sk-master\nrouter:\n  strategy: least-busy"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.router.num_retries, 3);
        assert_eq!(config.router.strategy, RoutingStrategy::LeastBusy);
        assert_eq!(config.auth.master_key, "sk-master");
    }

    #[test]
    fn test_missing_master_key_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  port: 9999").unwrap();

        let error = Config::load(Some(file.path())).unwrap_err();
        assert!(error.to_string().contains("master_key"));
    }

    #[test]
    fn test_fallbacks_parse() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "auth:\n  master_key: sk-master\nrouter:\n  fallbacks:\n    gpt-4o:\n      - claude-3-haiku"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(
            config.router.fallbacks["gpt-4o"],
            vec!["claude-3-haiku".to_string()]
        );
    }
}
