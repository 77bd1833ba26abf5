use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "global_config")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub host: String,
    pub port: i32,
    pub admin_key_hash: String,
    pub proxy: Option<String>,
    pub dsn: String,
    pub event_redact_sensitive: bool,
}

impl ActiveModelBehavior for ActiveModel {}
