use chrono::Utc;
use gate_entities::artifacts;
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, QueryOrder, Set, prelude::*};
use serde_json::Value;
use tracing::warn;

fn is_unique_violation(err: &DbErr) -> bool {
    err.to_string().contains("duplicate key")
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;
    use sea_orm::DbErr;

    #[test]
    fn recognizes_duplicate_key_wording() {
        let err = DbErr::Custom(
            "duplicate key value violates unique constraint \"uq_artifacts_run_service\""
                .to_string(),
        );
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn does_not_flag_an_unrelated_error() {
        let err = DbErr::Custom("connection refused".to_string());
        assert!(!is_unique_violation(&err));
    }
}

pub struct ArtifactStore {
    db: DatabaseConnection,
}

impl ArtifactStore {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// `UNIQUE(run_id, service_id)` makes this idempotent under webhook
    /// retries: a duplicate write is logged and swallowed, never surfaced
    /// as an error to the caller.
    pub async fn save_artifact(
        &self,
        context_id: Uuid,
        service_id: &str,
        run_id: Uuid,
        specialist_telegram_id: i64,
        payload: Value,
        summary: Option<&str>,
    ) -> anyhow::Result<()> {
        let model = artifacts::ActiveModel {
            artifact_id: Set(Uuid::new_v4()),
            context_id: Set(context_id),
            service_id: Set(service_id.to_string()),
            run_id: Set(run_id),
            specialist_telegram_id: Set(specialist_telegram_id),
            payload: Set(payload),
            summary: Set(summary.map(str::to_string)),
            created_at: Set(Utc::now().into()),
        };

        match model.insert(&self.db).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                warn!(%run_id, service_id, "artifact already persisted for this run, ignoring");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `service_id` is applied in the query itself, before the limit, so a
    /// service-scoped call still returns that service's most recent 20
    /// artifacts rather than the top 20 overall filtered down afterwards.
    pub async fn list_by_context(
        &self,
        context_id: Uuid,
        service_id: Option<&str>,
    ) -> anyhow::Result<Vec<artifacts::Model>> {
        let mut query = artifacts::Entity::find().filter(artifacts::Column::ContextId.eq(context_id));
        if let Some(service_id) = service_id {
            query = query.filter(artifacts::Column::ServiceId.eq(service_id));
        }
        Ok(query
            .order_by_desc(artifacts::Column::CreatedAt)
            .limit(20)
            .all(&self.db)
            .await?)
    }

    pub async fn get_by_id(&self, artifact_id: Uuid) -> anyhow::Result<Option<artifacts::Model>> {
        Ok(artifacts::Entity::find_by_id(artifact_id)
            .one(&self.db)
            .await?)
    }
}
