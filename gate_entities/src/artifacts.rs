use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "artifacts")]
#[sea_orm(index(unique, name = "uq_artifacts_run_service", col = "run_id", col = "service_id"))]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub artifact_id: Uuid,
    #[sea_orm(indexed)]
    pub context_id: Uuid,
    pub service_id: String,
    pub run_id: Uuid,
    #[sea_orm(indexed)]
    pub specialist_telegram_id: i64,
    pub payload: Json,
    pub summary: Option<String>,
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
