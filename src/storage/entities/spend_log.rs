//! Spend log entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only record of one terminated request
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "spend_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub request_id: String,
    pub api_key_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    /// Public model name as requested (fallbacks bill at this name)
    #[sea_orm(column_type = "String(StringLen::N(255))", indexed)]
    pub model: String,
    #[sea_orm(column_type = "String(StringLen::N(255))", nullable)]
    pub provider: Option<String>,
    /// chat, embedding, ...
    #[sea_orm(column_type = "String(StringLen::N(50))")]
    pub endpoint_type: String,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    /// Cost in USD; 12 fractional digits for per-token precision
    #[sea_orm(column_type = "Decimal(Some((20, 12)))")]
    pub spend: Decimal,
    pub latency_ms: Option<i64>,
    #[sea_orm(column_type = "String(StringLen::N(50))")]
    pub status: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    #[sea_orm(indexed)]
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
