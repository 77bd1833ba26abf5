use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rate_limits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub request_max: Option<i64>,
    pub request_current: i64,
    pub request_reset_duration_secs: i64,
    pub request_last_reset: OffsetDateTime,
    pub token_max: Option<i64>,
    pub token_current: i64,
    pub token_reset_duration_secs: i64,
    pub token_last_reset: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
