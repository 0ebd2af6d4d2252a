use chrono::Utc;
use gate_entities::bot_chat_state;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, prelude::*};
use serde_json::Value;
use tracing::info;

pub struct FsmStore {
    db: DatabaseConnection,
}

impl FsmStore {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn load(
        &self,
        bot_id: &str,
        chat_id: i64,
    ) -> anyhow::Result<Option<bot_chat_state::Model>> {
        Ok(bot_chat_state::Entity::find_by_id((
            bot_id.to_string(),
            chat_id,
        ))
        .one(&self.db)
        .await?)
    }

    /// `INSERT ... ON CONFLICT (bot_id, chat_id) DO UPDATE`, expressed as a
    /// read-then-write pair since sea-orm has no portable upsert builder
    /// for composite keys with JSON columns.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert(
        &self,
        bot_id: &str,
        chat_id: i64,
        user_id: Option<i64>,
        role: &str,
        state: &str,
        state_payload: Value,
        context_id: Option<Uuid>,
    ) -> anyhow::Result<bot_chat_state::Model> {
        let existing = self.load(bot_id, chat_id).await?;
        let now = Utc::now();

        let active = if let Some(existing) = existing {
            let mut active: bot_chat_state::ActiveModel = existing.into();
            active.user_id = Set(user_id);
            active.role = Set(role.to_string());
            active.state = Set(state.to_string());
            active.state_payload = Set(state_payload);
            active.context_id = Set(context_id);
            active.updated_at = Set(now.into());
            active
        } else {
            bot_chat_state::ActiveModel {
                bot_id: Set(bot_id.to_string()),
                chat_id: Set(chat_id),
                user_id: Set(user_id),
                role: Set(role.to_string()),
                state: Set(state.to_string()),
                state_payload: Set(state_payload),
                context_id: Set(context_id),
                updated_at: Set(now.into()),
                created_at: Set(now.into()),
            }
        };

        let saved = active.save(&self.db).await?;
        info!(bot_id, chat_id, state, "upserted chat state");
        bot_chat_state::Entity::find_by_id((bot_id.to_string(), chat_id))
            .one(&self.db)
            .await?
            .ok_or_else(|| anyhow::anyhow!("chat state vanished immediately after upsert"))
    }
}
