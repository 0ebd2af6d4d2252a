use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "link_tokens")]
#[sea_orm(
    index(unique, name = "uq_link_tokens_service_run", col = "service_id", col = "run_id")
)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub jti: Uuid,
    pub run_id: Uuid,
    pub service_id: String,
    #[sea_orm(indexed)]
    pub context_id: Uuid,
    pub role: String,
    pub subject_id: i64,
    #[sea_orm(indexed)]
    pub expires_at: DateTimeWithTimeZone,
    pub used_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::contexts::Entity",
        from = "Column::ContextId",
        to = "super::contexts::Column::ContextId"
    )]
    Context,
}

impl Related<super::contexts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Context.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
