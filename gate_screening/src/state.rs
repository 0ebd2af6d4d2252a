use gate_engine::EngineState;
use gate_entities::screening_assessments::Model as AssessmentModel;
use uuid::Uuid;

/// Everything the orchestrator needs, reassembled from the persisted row.
pub struct SessionState {
    pub assessment_id: Uuid,
    pub context_id: Uuid,
    pub phase: i32,
    pub phase1_completed: bool,
    pub phase2_questions: i32,
    pub phase3_questions: i32,
    pub engine: EngineState,
}

pub fn from_model(model: &AssessmentModel) -> anyhow::Result<SessionState> {
    Ok(SessionState {
        assessment_id: model.id,
        context_id: model.context_id,
        phase: model.phase,
        phase1_completed: model.phase1_completed,
        phase2_questions: model.phase2_questions,
        phase3_questions: model.phase3_questions,
        engine: EngineState {
            response_history: serde_json::from_value(model.response_history.clone())
                .unwrap_or_default(),
            axis_vector: serde_json::from_value(model.axis_vector.clone()).unwrap_or_default(),
            layer_vector: serde_json::from_value(model.layer_vector.clone()).unwrap_or_default(),
            tension_matrix: serde_json::from_value(model.tension_matrix.clone())
                .unwrap_or_default(),
            ambiguity_zones: serde_json::from_value(model.ambiguity_zones.clone())
                .unwrap_or_default(),
            rigidity: serde_json::from_value(model.rigidity.clone()).ok(),
            confidence: model.confidence,
            dominant_cells: serde_json::from_value(model.dominant_cells.clone())
                .unwrap_or_default(),
        },
    })
}
