//! Model deployment entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One upstream path to a model. Linked deployments reference a provider
/// config; standalone ones carry their own provider type and key.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_deployments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Public model name clients request
    #[sea_orm(column_type = "String(StringLen::N(255))", indexed)]
    pub model_name: String,
    /// Upstream model name sent to the provider
    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub provider_model: String,
    /// chat, embedding, image_generation, ...
    #[sea_orm(column_type = "String(StringLen::N(50))")]
    pub model_type: String,
    /// Linked provider config; None for standalone deployments
    pub provider_config_id: Option<Uuid>,
    /// Standalone provider type; None for linked deployments
    #[sea_orm(column_type = "String(StringLen::N(50))", nullable)]
    pub provider_type: Option<String>,
    #[sea_orm(column_type = "String(StringLen::N(500))", nullable)]
    pub api_base: Option<String>,
    /// AEAD-encrypted API key (deployment-level override)
    #[sea_orm(column_type = "Text", nullable)]
    pub api_key_encrypted: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub settings: Json,
    pub priority: i32,
    /// Per-deployment timeout in seconds
    pub timeout: Option<i32>,
    pub is_active: bool,
    /// Explicit pricing row override
    pub pricing_id: Option<Uuid>,
    /// Org scope; None means global
    pub org_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::provider_config::Entity",
        from = "Column::ProviderConfigId",
        to = "super::provider_config::Column::Id"
    )]
    ProviderConfig,
}

impl Related<super::provider_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProviderConfig.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
