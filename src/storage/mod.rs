//! Storage layer
//!
//! One facade over the control-plane database. The dispatch engine reaches
//! it only through the `DeploymentSource`, `ApiKeyStore`, `PricingSource`,
//! and `SpendSink` traits, which keeps the router and spend pipeline
//! testable without a database.

pub mod entities;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{ApiKeyStore, AuthContext};
use crate::config::DatabaseConfig;
use crate::core::pricing::{ModelPricing, PricingSource, SpendLogEntry, SpendSink};
use crate::core::providers::ProviderKind;
use crate::core::router::{DeploymentRow, DeploymentSource, DeploymentSpec, ProviderSpec};
use crate::core::types::ModelType;
use crate::utils::error::{GatewayError, Result};

use entities::{api_key, model_deployment, model_pricing, organization, spend_log, team, team_provider_access, user};

/// Database-backed storage facade
#[derive(Debug, Clone)]
pub struct StorageLayer {
    db: DatabaseConnection,
}

impl StorageLayer {
    /// Connect using the configured pool limits
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut options = ConnectOptions::new(config.url.clone());
        options
            .max_connections(config.max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .sqlx_logging(false);

        let db = Database::connect(options).await?;
        info!("Database connection established");
        Ok(Self { db })
    }

    /// Wrap an existing connection (tests)
    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Whether any active deployment exists at all
    pub async fn has_deployments(&self) -> Result<bool> {
        let found = entities::ModelDeployment::find()
            .filter(model_deployment::Column::IsActive.eq(true))
            .limit(1)
            .one(&self.db)
            .await?;
        Ok(found.is_some())
    }

    /// Distinct active model names visible to an org, optionally narrowed
    /// by model type
    pub async fn list_model_names(
        &self,
        org_id: Option<Uuid>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<String>> {
        let mut query = entities::ModelDeployment::find()
            .select_only()
            .column(model_deployment::Column::ModelName)
            .distinct()
            .filter(model_deployment::Column::IsActive.eq(true))
            .filter(org_scope(org_id));

        if let Some(model_type) = model_type {
            query = query.filter(model_deployment::Column::ModelType.eq(model_type.to_string()));
        }

        Ok(query.into_tuple::<String>().all(&self.db).await?)
    }

    /// The active deployment backing a model, for model-type validation
    pub async fn deployment_model_type(
        &self,
        model_name: &str,
        org_id: Option<Uuid>,
    ) -> Result<Option<ModelType>> {
        let deployment = entities::ModelDeployment::find()
            .filter(model_deployment::Column::ModelName.eq(model_name))
            .filter(model_deployment::Column::IsActive.eq(true))
            .filter(org_scope(org_id))
            .one(&self.db)
            .await?;

        Ok(deployment.and_then(|d| ModelType::from_str(&d.model_type).ok()))
    }

    /// Active deployments with their provider names, for introspection
    pub async fn list_active_deployments(
        &self,
        org_id: Option<Uuid>,
    ) -> Result<Vec<(model_deployment::Model, Option<String>)>> {
        let rows = entities::ModelDeployment::find()
            .find_also_related(entities::ProviderConfig)
            .filter(model_deployment::Column::IsActive.eq(true))
            .filter(org_scope(org_id))
            .order_by_desc(model_deployment::Column::Priority)
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(deployment, provider)| {
                let provider_name = provider.map(|p| p.name);
                (deployment, provider_name)
            })
            .collect())
    }
}

fn org_scope(org_id: Option<Uuid>) -> Condition {
    match org_id {
        Some(org_id) => Condition::any()
            .add(model_deployment::Column::OrgId.eq(org_id))
            .add(model_deployment::Column::OrgId.is_null()),
        None => Condition::all().add(model_deployment::Column::OrgId.is_null()),
    }
}

fn settings_map(value: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    value
        .as_object()
        .map(|map| map.clone().into_iter().collect())
        .unwrap_or_default()
}

#[async_trait]
impl DeploymentSource for StorageLayer {
    async fn fetch_deployments(
        &self,
        model_name: &str,
        org_id: Option<Uuid>,
        team_id: Option<Uuid>,
        model_type: Option<ModelType>,
    ) -> Result<Vec<DeploymentRow>> {
        let mut query = entities::ModelDeployment::find()
            .find_also_related(entities::ProviderConfig)
            .filter(model_deployment::Column::ModelName.eq(model_name))
            .filter(model_deployment::Column::IsActive.eq(true))
            .filter(org_scope(org_id))
            .order_by_desc(model_deployment::Column::Priority);

        if let Some(model_type) = model_type {
            query = query.filter(model_deployment::Column::ModelType.eq(model_type.to_string()));
        }

        // Team access gates linked deployments only; standalone ones
        // (provider_config_id IS NULL) always pass.
        if let Some(team_id) = team_id {
            let granted: Vec<Uuid> = entities::TeamProviderAccess::find()
                .select_only()
                .column(team_provider_access::Column::ProviderConfigId)
                .filter(team_provider_access::Column::TeamId.eq(team_id))
                .into_tuple()
                .all(&self.db)
                .await?;

            let standalone = model_deployment::Column::ProviderConfigId.is_null();
            query = if granted.is_empty() {
                query.filter(Condition::all().add(standalone))
            } else {
                query.filter(
                    Condition::any()
                        .add(model_deployment::Column::ProviderConfigId.is_in(granted))
                        .add(standalone),
                )
            };
        }

        let rows = query.all(&self.db).await?;
        debug!(model = model_name, count = rows.len(), "fetched deployments");

        let mut result = Vec::with_capacity(rows.len());
        for (deployment, provider) in rows {
            let Ok(model_type) = ModelType::from_str(&deployment.model_type) else {
                warn!(model = %deployment.model_name, "unknown model_type, skipping");
                continue;
            };

            let provider_type = match deployment.provider_type.as_deref() {
                Some(raw) => match ProviderKind::from_str(raw) {
                    Ok(kind) => Some(kind),
                    Err(_) => {
                        warn!(model = %deployment.model_name, provider_type = raw,
                              "unknown provider_type, skipping");
                        continue;
                    }
                },
                None => None,
            };

            let provider_spec = match provider {
                Some(config) => {
                    let Ok(kind) = ProviderKind::from_str(&config.provider_type) else {
                        warn!(provider = %config.name, "unknown provider_type, skipping");
                        continue;
                    };
                    Some(ProviderSpec {
                        id: config.id,
                        name: config.name,
                        provider_type: kind,
                        api_base: config.api_base,
                        api_key_encrypted: config.api_key_encrypted,
                        settings: settings_map(&config.settings),
                        is_active: config.is_active,
                    })
                }
                None => None,
            };

            result.push(DeploymentRow {
                deployment: DeploymentSpec {
                    id: deployment.id,
                    model_name: deployment.model_name,
                    provider_model: deployment.provider_model,
                    model_type,
                    provider_type,
                    api_base: deployment.api_base,
                    api_key_encrypted: deployment.api_key_encrypted,
                    settings: settings_map(&deployment.settings),
                    priority: deployment.priority,
                    timeout_secs: deployment.timeout.map(|t| t as u64),
                    org_id: deployment.org_id,
                },
                provider: provider_spec,
            });
        }

        Ok(result)
    }
}

#[async_trait]
impl ApiKeyStore for StorageLayer {
    async fn find_by_hash(&self, key_hash: &str) -> Result<Option<AuthContext>> {
        let Some(key) = entities::ApiKey::find()
            .filter(api_key::Column::KeyHash.eq(key_hash))
            .filter(api_key::Column::IsActive.eq(true))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        if let Some(expires_at) = key.expires_at {
            if expires_at < Utc::now() {
                return Ok(None);
            }
        }

        Ok(Some(AuthContext {
            key_id: Some(key.id),
            user_id: key.user_id,
            team_id: key.team_id,
            org_id: key.org_id,
            allowed_models: api_key::Model::string_list(&key.models)
                .into_iter()
                .collect::<HashSet<_>>(),
            blocked_models: api_key::Model::string_list(&key.blocked_models)
                .into_iter()
                .collect::<HashSet<_>>(),
            max_budget: key.max_budget,
            current_spend: key.spend,
        }))
    }
}

#[async_trait]
impl PricingSource for StorageLayer {
    async fn pricing_for_model(&self, model: &str) -> Result<Option<ModelPricing>> {
        let row = entities::ModelPricing::find()
            .filter(model_pricing::Column::ModelName.eq(model))
            .one(&self.db)
            .await?;

        Ok(row.map(|row| ModelPricing {
            input_cost_per_token: row.input_cost_per_token,
            output_cost_per_token: row.output_cost_per_token,
            cached_input_cost_per_token: row.cached_input_cost_per_token,
        }))
    }
}

#[async_trait]
impl SpendSink for StorageLayer {
    /// Append the spend log and bump all applicable counters atomically
    async fn append(&self, entry: SpendLogEntry) -> Result<()> {
        let txn = self.db.begin().await?;

        let log = spend_log::ActiveModel {
            id: Set(entry.id),
            request_id: Set(entry.request_id),
            api_key_id: Set(entry.api_key_id),
            user_id: Set(entry.user_id),
            team_id: Set(entry.team_id),
            org_id: Set(entry.org_id),
            model: Set(entry.model),
            provider: Set(entry.provider),
            endpoint_type: Set(entry.endpoint_type),
            prompt_tokens: Set(entry.prompt_tokens),
            completion_tokens: Set(entry.completion_tokens),
            total_tokens: Set(entry.total_tokens),
            spend: Set(entry.spend),
            latency_ms: Set(entry.latency_ms),
            status: Set(entry.status),
            error_message: Set(entry.error),
            created_at: Set(entry.created_at),
        };
        entities::SpendLog::insert(log).exec(&txn).await?;

        let cost = entry.spend;
        if let Some(key_id) = entry.api_key_id {
            entities::ApiKey::update_many()
                .col_expr(
                    api_key::Column::Spend,
                    Expr::col(api_key::Column::Spend).add(cost),
                )
                .filter(api_key::Column::Id.eq(key_id))
                .exec(&txn)
                .await?;
        }
        if let Some(user_id) = entry.user_id {
            entities::User::update_many()
                .col_expr(user::Column::Spend, Expr::col(user::Column::Spend).add(cost))
                .filter(user::Column::Id.eq(user_id))
                .exec(&txn)
                .await?;
        }
        if let Some(team_id) = entry.team_id {
            entities::Team::update_many()
                .col_expr(team::Column::Spend, Expr::col(team::Column::Spend).add(cost))
                .filter(team::Column::Id.eq(team_id))
                .exec(&txn)
                .await?;
        }
        if let Some(org_id) = entry.org_id {
            entities::Organization::update_many()
                .col_expr(
                    organization::Column::Spend,
                    Expr::col(organization::Column::Spend).add(cost),
                )
                .filter(organization::Column::Id.eq(org_id))
                .exec(&txn)
                .await?;
        }

        txn.commit().await.map_err(GatewayError::Database)
    }
}
