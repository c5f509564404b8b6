//! Provider config entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Shared provider credentials and settings inherited by linked deployments
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "provider_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub name: String,
    /// openai, anthropic, azure, ...
    #[sea_orm(column_type = "String(StringLen::N(50))")]
    pub provider_type: String,
    #[sea_orm(column_type = "String(StringLen::N(500))", nullable)]
    pub api_base: Option<String>,
    /// AEAD-encrypted API key
    #[sea_orm(column_type = "Text", nullable)]
    pub api_key_encrypted: Option<String>,
    #[sea_orm(column_type = "Json")]
    pub settings: Json,
    pub is_active: bool,
    pub org_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::model_deployment::Entity")]
    ModelDeployments,
}

impl Related<super::model_deployment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ModelDeployments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
