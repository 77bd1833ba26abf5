use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "virtual_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique_key = "virtual_key_value")]
    pub value: String,
    pub team_id: Option<String>,
    pub customer_id: Option<String>,
    pub budget_id: Option<String>,
    pub rate_limit_id: Option<String>,
    pub allowed_models_json: Json,
    pub provider_overrides_json: Json,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
