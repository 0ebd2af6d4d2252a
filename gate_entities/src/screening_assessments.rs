use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "screening_assessment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub context_id: Uuid,
    pub specialist_user_id: i64,
    pub client_chat_id: Option<i64>,
    pub link_token_jti: Option<Uuid>,

    #[sea_orm(indexed)]
    pub status: String,
    pub phase: i32,
    pub phase1_completed: bool,
    pub phase2_questions: i32,
    pub phase3_questions: i32,

    pub axis_vector: Json,
    pub layer_vector: Json,
    pub tension_matrix: Json,
    pub rigidity: Json,
    pub confidence: f64,
    pub ambiguity_zones: Json,
    pub dominant_cells: Json,

    pub response_history: Json,

    pub report_json: Option<Json>,
    pub report_text: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub expires_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::contexts::Entity",
        from = "Column::ContextId",
        to = "super::contexts::Column::ContextId"
    )]
    Context,
    #[sea_orm(
        belongs_to = "super::link_tokens::Entity",
        from = "Column::LinkTokenJti",
        to = "super::link_tokens::Column::Jti"
    )]
    LinkToken,
}

impl Related<super::contexts::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Context.def()
    }
}

impl Related<super::link_tokens::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LinkToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
