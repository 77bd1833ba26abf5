use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "budgets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub max_limit: f64,
    pub current_usage: f64,
    pub reset_duration_secs: i64,
    pub last_reset: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
