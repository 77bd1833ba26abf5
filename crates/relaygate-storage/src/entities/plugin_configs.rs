use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "plugin_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "plugin_name")]
    pub name: String,
    pub order_index: i32,
    pub enabled: bool,
    pub config_json: Json,
}

impl ActiveModelBehavior for ActiveModel {}
