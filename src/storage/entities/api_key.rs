//! API key entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Provisioned API key. Only the sha-256 hash is stored; the plaintext is
/// shown once at creation and never persisted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(column_type = "String(StringLen::N(64))", unique, indexed)]
    pub key_hash: String,
    #[sea_orm(column_type = "String(StringLen::N(255))", nullable)]
    pub key_alias: Option<String>,
    pub user_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    /// Allowed model names/suffixes; empty or null means all
    #[sea_orm(column_type = "Json", nullable)]
    pub models: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub blocked_models: Option<Json>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))", nullable)]
    pub max_budget: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub spend: Decimal,
    pub expires_at: Option<DateTimeUtc>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decode a JSON string-array column
    pub fn string_list(value: &Option<Json>) -> Vec<String> {
        value
            .as_ref()
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}
