use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    #[sea_orm(unique, indexed)]
    pub telegram_id: i64,
    pub role: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub status: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::contexts::Entity")]
    Contexts,
}

impl Related<super::contexts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contexts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
