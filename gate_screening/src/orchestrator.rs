use std::sync::Arc;

use gate_core::Oracle;
use gate_engine::{AxisWeights, LayerWeights, ResponseRecord};
use gate_store::ScreeningStore;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::report::generate_full_report;
use crate::screen_bank::{self, Phase2Template, ScreenOption};
use crate::state::{self, SessionState};

const HAIKU_MODEL: &str = "claude-haiku-4-5-20251001";
const SONNET_MODEL: &str = "claude-sonnet-4-5-20250929";
const CONFIDENCE_THRESHOLD: f64 = 0.85;
const MAX_PHASE2_QUESTIONS: i32 = 3;
const MAX_PHASE3_QUESTIONS: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScreenAction {
    ShowScreen {
        screen: QuestionView,
        phase: i32,
    },
    Complete {
        report_json: serde_json::Value,
        report_text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub question: String,
    pub options: Vec<ScreenOption>,
    pub node: Option<String>,
}

pub struct ScreenOrchestrator {
    oracle: Arc<dyn Oracle>,
    store: ScreeningStore,
}

impl ScreenOrchestrator {
    pub fn new(oracle: Arc<dyn Oracle>, store: ScreeningStore) -> Self {
        Self { oracle, store }
    }

    pub async fn start_assessment(&self, assessment_id: Uuid) -> anyhow::Result<ScreenAction> {
        self.store.start(assessment_id).await?;
        let first = screen_bank::get_phase1_screen(0);
        Ok(ScreenAction::ShowScreen {
            screen: QuestionView {
                question: first.prompt,
                options: first.options,
                node: Some(first.screen_id),
            },
            phase: 1,
        })
    }

    pub async fn process_phase1_response(
        &self,
        assessment_id: Uuid,
        screen_index: usize,
        selected_options: &[usize],
    ) -> anyhow::Result<ScreenAction> {
        let model = self
            .load(assessment_id)
            .await?;
        let screen = screen_bank::get_phase1_screen(screen_index);

        let mut engine_state = model.engine;
        for &idx in selected_options {
            let option = &screen.options[idx];
            engine_state = gate_engine::process_response(&engine_state, response_from_option(option));
        }

        self.persist_engine_state(assessment_id, &engine_state, None, None)
            .await?;

        if screen_index < 5 {
            let next = screen_bank::get_phase1_screen(screen_index + 1);
            return Ok(ScreenAction::ShowScreen {
                screen: QuestionView {
                    question: next.prompt,
                    options: next.options,
                    node: Some(next.screen_id),
                },
                phase: 1,
            });
        }

        self.store.mark_phase1_completed(assessment_id).await?;

        if engine_state.confidence >= CONFIDENCE_THRESHOLD {
            return self.complete(assessment_id, &engine_state, model.phase2_questions, model.phase3_questions).await;
        }

        self.store.set_phase(assessment_id, 2).await?;
        let screen = self.select_next_phase2_question(&engine_state).await;
        Ok(ScreenAction::ShowScreen {
            screen: template_to_view(&screen),
            phase: 2,
        })
    }

    pub async fn process_phase2_response(
        &self,
        assessment_id: Uuid,
        current_screen: &Phase2Template,
        selected_options: &[usize],
    ) -> anyhow::Result<ScreenAction> {
        let model = self.load(assessment_id).await?;
        let prev_axis_vector = model.engine.axis_vector;

        let mut engine_state = model.engine;
        for &idx in selected_options {
            let option = &current_screen.options[idx];
            engine_state = gate_engine::process_response(&engine_state, response_from_option(option));
        }

        let new_q_count = model.phase2_questions + 1;
        self.persist_engine_state(assessment_id, &engine_state, Some(new_q_count), None)
            .await?;

        let stop = self.check_stop_phase2(&engine_state, prev_axis_vector, new_q_count).await;

        if stop || (new_q_count >= MAX_PHASE2_QUESTIONS && engine_state.confidence >= CONFIDENCE_THRESHOLD) {
            return self.complete(assessment_id, &engine_state, new_q_count, model.phase3_questions).await;
        }

        if new_q_count < MAX_PHASE2_QUESTIONS {
            let screen = self.select_next_phase2_question(&engine_state).await;
            return Ok(ScreenAction::ShowScreen {
                screen: template_to_view(&screen),
                phase: 2,
            });
        }

        if engine_state.confidence < CONFIDENCE_THRESHOLD {
            self.store.set_phase(assessment_id, 3).await?;
            let screen = self.select_next_phase3_question(&engine_state).await;
            return Ok(ScreenAction::ShowScreen {
                screen: template_to_view(&screen),
                phase: 3,
            });
        }

        self.complete(assessment_id, &engine_state, new_q_count, model.phase3_questions).await
    }

    pub async fn process_phase3_response(
        &self,
        assessment_id: Uuid,
        current_screen: &Phase2Template,
        selected_options: &[usize],
    ) -> anyhow::Result<ScreenAction> {
        let model = self.load(assessment_id).await?;

        let mut engine_state = model.engine;
        for &idx in selected_options {
            let option = &current_screen.options[idx];
            engine_state = gate_engine::process_response(&engine_state, response_from_option(option));
        }

        let new_q_count = model.phase3_questions + 1;
        self.persist_engine_state(assessment_id, &engine_state, None, Some(new_q_count))
            .await?;

        if new_q_count >= MAX_PHASE3_QUESTIONS || engine_state.confidence >= CONFIDENCE_THRESHOLD {
            return self.complete(assessment_id, &engine_state, model.phase2_questions, new_q_count).await;
        }

        let screen = self.select_next_phase3_question(&engine_state).await;
        Ok(ScreenAction::ShowScreen {
            screen: template_to_view(&screen),
            phase: 3,
        })
    }

    async fn complete(
        &self,
        assessment_id: Uuid,
        engine_state: &gate_engine::EngineState,
        phase2_questions: i32,
        phase3_questions: i32,
    ) -> anyhow::Result<ScreenAction> {
        let report =
            generate_full_report(self.oracle.as_ref(), engine_state, assessment_id, phase2_questions, phase3_questions)
                .await;
        self.store
            .save_report(assessment_id, report.report_json.clone(), report.report_text.clone())
            .await?;
        Ok(ScreenAction::Complete {
            report_json: report.report_json,
            report_text: report.report_text,
        })
    }

    async fn load(&self, assessment_id: Uuid) -> anyhow::Result<SessionState> {
        let model = self
            .store
            .get(assessment_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("screening assessment {assessment_id} not found"))?;
        state::from_model(&model)
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_engine_state(
        &self,
        assessment_id: Uuid,
        state: &gate_engine::EngineState,
        phase2_questions: Option<i32>,
        phase3_questions: Option<i32>,
    ) -> anyhow::Result<()> {
        self.store
            .save_engine_state(
                assessment_id,
                serde_json::to_value(state.axis_vector)?,
                serde_json::to_value(state.layer_vector)?,
                serde_json::to_value(&state.tension_matrix)?,
                serde_json::to_value(state.rigidity)?,
                state.confidence,
                serde_json::to_value(&state.ambiguity_zones)?,
                serde_json::to_value(&state.dominant_cells)?,
                serde_json::to_value(&state.response_history)?,
                phase2_questions,
                phase3_questions,
            )
            .await
    }

    /// Picks the node to explore next via the haiku-tier router prompt,
    /// falling back to the first ambiguity-zone node on any oracle failure.
    async fn select_next_phase2_question(&self, state: &gate_engine::EngineState) -> Phase2Template {
        let context = serde_json::json!({
            "AxisVector": state.axis_vector,
            "LayerVector": state.layer_vector,
            "RigidityIndex": state.rigidity,
            "AmbiguityZones": state.ambiguity_zones,
            "Confidence": state.confidence,
        });

        let raw = self
            .oracle
            .ask(
                "You are the routing module of a psychological screening system. \
                 Respond only with valid JSON.",
                &format!("Choose the best node to explore next:\n{context}"),
                HAIKU_MODEL,
                1000,
            )
            .await;

        let selected_node = match raw {
            Ok(text) => crate::parse_json(&text)
                .ok()
                .and_then(|v| v["selected_node"].as_str().map(str::to_string))
                .unwrap_or_else(|| fallback_node(state)),
            Err(_) => fallback_node(state),
        };

        screen_bank::get_phase2_template(&selected_node)
            .unwrap_or_else(|| {
                let first = screen_bank::get_all_phase2_nodes()[0].clone();
                screen_bank::get_phase2_template(&first).expect("first node always exists")
            })
    }

    /// Constructs a deeper question via the sonnet-tier constructor prompt,
    /// falling back to the reference template on any oracle failure.
    async fn select_next_phase3_question(&self, state: &gate_engine::EngineState) -> Phase2Template {
        let selected_node = fallback_node(state);
        let template = screen_bank::get_phase2_template(&selected_node).unwrap_or_else(|| {
            let first = screen_bank::get_all_phase2_nodes()[0].clone();
            screen_bank::get_phase2_template(&first).expect("first node always exists")
        });

        let context = serde_json::json!({
            "DiagnosticNode": selected_node,
            "DiagnosticSplit": template.diagnostic_split.clone(),
            "ReferenceTemplate": {
                "question": template.reference_question.clone(),
                "options": template.options.iter().map(|o| &o.text).collect::<Vec<_>>(),
            },
            "AxisVector": state.axis_vector,
            "LayerVector": state.layer_vector,
        });

        let raw = self
            .oracle
            .ask(
                "You are the adaptive question constructor of a psychological screening \
                 system. Respond only with valid JSON. Question and options must be in \
                 Russian.",
                &format!("Construct a deeper question:\n{context}"),
                SONNET_MODEL,
                1500,
            )
            .await;

        if let Ok(text) = raw {
            if let Ok(data) = crate::parse_json(&text) {
                if let (Some(question), Some(options)) = (
                    data["question"].as_str(),
                    data["options"].as_array(),
                ) {
                    if let Ok(parsed_options) =
                        serde_json::from_value::<Vec<ScreenOption>>(serde_json::Value::Array(options.clone()))
                    {
                        return Phase2Template {
                            node: selected_node,
                            reference_question: question.to_string(),
                            diagnostic_split: template.diagnostic_split,
                            options: parsed_options,
                        };
                    }
                }
            }
        }

        warn!("phase 3 constructor unavailable, using reference template");
        template
    }

    /// Asks the oracle (haiku tier) whether Phase 2 should stop; falls back
    /// to the local rule: all axis deltas small, confidence threshold met,
    /// or the question cap reached.
    async fn check_stop_phase2(
        &self,
        state: &gate_engine::EngineState,
        prev_axis_vector: gate_engine::AxisVector,
        questions_asked: i32,
    ) -> bool {
        let delta = [
            (state.axis_vector.a1 - prev_axis_vector.a1).abs(),
            (state.axis_vector.a2 - prev_axis_vector.a2).abs(),
            (state.axis_vector.a3 - prev_axis_vector.a3).abs(),
            (state.axis_vector.a4 - prev_axis_vector.a4).abs(),
        ];
        let conflict_index = delta.iter().sum::<f64>() / delta.len() as f64;

        let context = serde_json::json!({
            "PreviousAxisVector": prev_axis_vector,
            "UpdatedAxisVector": state.axis_vector,
            "ConflictIndex": (conflict_index * 10000.0).round() / 10000.0,
            "Confidence": state.confidence,
            "QuestionsAsked": questions_asked,
        });

        let raw = self
            .oracle
            .ask(
                "You are the phase-control module of a psychological screening system. \
                 Respond only with valid JSON.",
                &format!("Should phase 2 stop?\n{context}"),
                HAIKU_MODEL,
                500,
            )
            .await;

        if let Ok(text) = raw {
            if let Ok(data) = crate::parse_json(&text) {
                if let Some(stop) = data["stop_phase2"].as_bool() {
                    return stop;
                }
            }
        }

        let all_delta_small = delta.iter().all(|v| *v < 0.1);
        all_delta_small
            || state.confidence >= CONFIDENCE_THRESHOLD
            || questions_asked >= MAX_PHASE2_QUESTIONS
    }
}

fn fallback_node(state: &gate_engine::EngineState) -> String {
    let all_nodes = screen_bank::get_all_phase2_nodes();
    if let Some(first_zone) = state.ambiguity_zones.first() {
        if all_nodes.contains(first_zone) {
            return first_zone.clone();
        }
    }
    all_nodes[0].clone()
}

fn response_from_option(option: &ScreenOption) -> ResponseRecord {
    ResponseRecord {
        screen_id: None,
        axis_weights: AxisWeights {
            a1: option.axis_weights.a1,
            a2: option.axis_weights.a2,
            a3: option.axis_weights.a3,
            a4: option.axis_weights.a4,
        },
        layer_weights: LayerWeights {
            l0: option.layer_weights.l0,
            l1: option.layer_weights.l1,
            l2: option.layer_weights.l2,
            l3: option.layer_weights.l3,
            l4: option.layer_weights.l4,
        },
        raw_answer: None,
    }
}

fn template_to_view(template: &Phase2Template) -> QuestionView {
    QuestionView {
        question: template.reference_question.clone(),
        options: template.options.clone(),
        node: Some(template.node.clone()),
    }
}
