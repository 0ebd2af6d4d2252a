use chrono::Utc;
use gate_entities::screening_assessments::{self, Column};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone)]
pub struct ScreeningStore {
    db: DatabaseConnection,
}

impl ScreeningStore {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: Uuid) -> anyhow::Result<Option<screening_assessments::Model>> {
        Ok(screening_assessments::Entity::find_by_id(id)
            .one(&self.db)
            .await?)
    }

    pub async fn get_by_link_token(&self, jti: Uuid) -> anyhow::Result<Option<screening_assessments::Model>> {
        Ok(screening_assessments::Entity::find()
            .filter(Column::LinkTokenJti.eq(jti))
            .one(&self.db)
            .await?)
    }

    pub async fn create(
        &self,
        context_id: Uuid,
        specialist_user_id: i64,
        client_chat_id: Option<i64>,
        link_token_jti: Option<Uuid>,
    ) -> anyhow::Result<screening_assessments::Model> {
        let now = Utc::now();
        let model = screening_assessments::ActiveModel {
            id: Set(Uuid::new_v4()),
            context_id: Set(context_id),
            specialist_user_id: Set(specialist_user_id),
            client_chat_id: Set(client_chat_id),
            link_token_jti: Set(link_token_jti),
            status: Set("created".to_string()),
            phase: Set(0),
            phase1_completed: Set(false),
            phase2_questions: Set(0),
            phase3_questions: Set(0),
            axis_vector: Set(serde_json::json!({})),
            layer_vector: Set(serde_json::json!({})),
            tension_matrix: Set(serde_json::json!({})),
            rigidity: Set(serde_json::json!({})),
            confidence: Set(0.0),
            ambiguity_zones: Set(serde_json::json!([])),
            dominant_cells: Set(serde_json::json!([])),
            response_history: Set(serde_json::json!([])),
            report_json: Set(None),
            report_text: Set(None),
            created_at: Set(now.into()),
            started_at: Set(None),
            completed_at: Set(None),
            expires_at: Set(None),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn start(&self, id: Uuid) -> anyhow::Result<()> {
        let Some(model) = self.get(id).await? else {
            anyhow::bail!("screening assessment {id} not found");
        };
        let mut active: screening_assessments::ActiveModel = model.into();
        active.phase = Set(1);
        active.status = Set("in_progress".to_string());
        active.started_at = Set(Some(Utc::now().into()));
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn set_phase(&self, id: Uuid, phase: i32) -> anyhow::Result<()> {
        let Some(model) = self.get(id).await? else {
            anyhow::bail!("screening assessment {id} not found");
        };
        let mut active: screening_assessments::ActiveModel = model.into();
        active.phase = Set(phase);
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn mark_phase1_completed(&self, id: Uuid) -> anyhow::Result<()> {
        let Some(model) = self.get(id).await? else {
            anyhow::bail!("screening assessment {id} not found");
        };
        let mut active: screening_assessments::ActiveModel = model.into();
        active.phase1_completed = Set(true);
        active.update(&self.db).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn save_engine_state(
        &self,
        id: Uuid,
        axis_vector: Value,
        layer_vector: Value,
        tension_matrix: Value,
        rigidity: Value,
        confidence: f64,
        ambiguity_zones: Value,
        dominant_cells: Value,
        response_history: Value,
        phase2_questions: Option<i32>,
        phase3_questions: Option<i32>,
    ) -> anyhow::Result<()> {
        let Some(model) = self.get(id).await? else {
            anyhow::bail!("screening assessment {id} not found");
        };
        let mut active: screening_assessments::ActiveModel = model.into();
        active.axis_vector = Set(axis_vector);
        active.layer_vector = Set(layer_vector);
        active.tension_matrix = Set(tension_matrix);
        active.rigidity = Set(rigidity);
        active.confidence = Set(confidence);
        active.ambiguity_zones = Set(ambiguity_zones);
        active.dominant_cells = Set(dominant_cells);
        active.response_history = Set(response_history);
        if let Some(q) = phase2_questions {
            active.phase2_questions = Set(q);
        }
        if let Some(q) = phase3_questions {
            active.phase3_questions = Set(q);
        }
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn save_report(
        &self,
        id: Uuid,
        report_json: Value,
        report_text: String,
    ) -> anyhow::Result<()> {
        let Some(model) = self.get(id).await? else {
            anyhow::bail!("screening assessment {id} not found");
        };
        let mut active: screening_assessments::ActiveModel = model.into();
        active.report_json = Set(Some(report_json));
        active.report_text = Set(Some(report_text));
        active.status = Set("completed".to_string());
        active.completed_at = Set(Some(Utc::now().into()));
        active.update(&self.db).await?;
        Ok(())
    }
}
