//! Model pricing entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-token prices keyed by public model name. 12 fractional digits so
/// sub-micro-dollar per-token rates survive storage.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "model_pricing")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(column_type = "String(StringLen::N(255))", indexed)]
    pub model_name: String,
    #[sea_orm(column_type = "Decimal(Some((20, 12)))")]
    pub input_cost_per_token: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 12)))")]
    pub output_cost_per_token: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 12)))", nullable)]
    pub cached_input_cost_per_token: Option<Decimal>,
    pub org_id: Option<Uuid>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
