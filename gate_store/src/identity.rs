use chrono::Utc;
use gate_entities::{contexts, users};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, prelude::*};
use tracing::info;

pub struct IdentityStore {
    db: DatabaseConnection,
}

impl IdentityStore {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_user_by_telegram_id(
        &self,
        telegram_id: i64,
    ) -> anyhow::Result<Option<users::Model>> {
        Ok(users::Entity::find()
            .filter(users::Column::TelegramId.eq(telegram_id))
            .one(&self.db)
            .await?)
    }

    pub async fn get_or_create_user(
        &self,
        telegram_id: i64,
        role: &str,
        username: Option<&str>,
        full_name: Option<&str>,
    ) -> anyhow::Result<users::Model> {
        if let Some(existing) = self.find_user_by_telegram_id(telegram_id).await? {
            return Ok(existing);
        }

        let model = users::ActiveModel {
            user_id: Set(Uuid::new_v4()),
            telegram_id: Set(telegram_id),
            role: Set(role.to_string()),
            username: Set(username.map(str::to_string)),
            full_name: Set(full_name.map(str::to_string)),
            status: Set("active".to_string()),
            created_at: Set(Utc::now().into()),
        };

        let inserted = model.insert(&self.db).await?;
        info!(telegram_id, "created user");
        Ok(inserted)
    }

    pub async fn create_context(
        &self,
        specialist_user_id: Uuid,
        client_ref: Option<&str>,
    ) -> anyhow::Result<contexts::Model> {
        let now = Utc::now();
        let model = contexts::ActiveModel {
            context_id: Set(Uuid::new_v4()),
            specialist_user_id: Set(specialist_user_id),
            client_ref: Set(client_ref.map(str::to_string)),
            status: Set("active".to_string()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn get_context(&self, context_id: Uuid) -> anyhow::Result<Option<contexts::Model>> {
        Ok(contexts::Entity::find_by_id(context_id)
            .one(&self.db)
            .await?)
    }
}
