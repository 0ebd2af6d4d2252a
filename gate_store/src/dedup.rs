use chrono::Utc;
use gate_entities::telegram_update_dedup;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, Set};
use tracing::info;

fn is_unique_violation(err: &DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("duplicate key") || msg.contains("UNIQUE constraint")
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;
    use sea_orm::DbErr;

    #[test]
    fn recognizes_postgres_duplicate_key_wording() {
        let err = DbErr::Custom("duplicate key value violates unique constraint".to_string());
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn recognizes_sqlite_unique_constraint_wording() {
        let err = DbErr::Custom("UNIQUE constraint failed: telegram_update_dedup.bot_id".to_string());
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn does_not_flag_an_unrelated_error_as_a_duplicate() {
        let err = DbErr::Custom("connection refused".to_string());
        assert!(!is_unique_violation(&err));
    }
}

pub struct DedupStore {
    db: DatabaseConnection,
}

impl DedupStore {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Returns `true` if this update had not been seen before (and is now
    /// recorded), `false` if it is a duplicate delivery.
    pub async fn try_insert(
        &self,
        bot_id: &str,
        update_id: i64,
        chat_id: i64,
    ) -> anyhow::Result<bool> {
        let model = telegram_update_dedup::ActiveModel {
            bot_id: Set(bot_id.to_string()),
            update_id: Set(update_id),
            chat_id: Set(chat_id),
            received_at: Set(Utc::now().into()),
        };

        match model.insert(&self.db).await {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => {
                info!(bot_id, update_id, "duplicate telegram update, skipping");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
