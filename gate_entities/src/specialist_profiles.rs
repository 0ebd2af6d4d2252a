use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Rolling per-specialist profile across simulator sessions.
///
/// Has no counterpart Python model — `original_source` keeps this as a
/// JSON blob threaded through `SessionData`, never persisted on its own.
/// Promoted to a real table here (Open Question (a)) keyed by the
/// specialist's Telegram id so it survives across simulator runs.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "specialist_profiles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub specialist_telegram_id: i64,
    pub sessions_count: i32,
    pub average_tsi: f64,
    pub average_delta_trust: f64,
    pub yellow_ratio: f64,
    pub red_ratio: f64,
    pub dominant_error_pattern: String,
    pub typical_jump_level: String,
    pub recommended_case_complexity: f64,
    pub tsi_history: Json,
    pub cases_completed: Json,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
