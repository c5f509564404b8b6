//! User entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(column_type = "String(StringLen::N(255))", unique, indexed)]
    pub email: String,
    #[sea_orm(column_type = "String(StringLen::N(100))", nullable)]
    pub first_name: Option<String>,
    #[sea_orm(column_type = "String(StringLen::N(100))", nullable)]
    pub last_name: Option<String>,
    pub is_superuser: bool,
    pub is_active: bool,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))", nullable)]
    pub max_budget: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((15, 4)))")]
    pub spend: Decimal,
    pub last_login_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
