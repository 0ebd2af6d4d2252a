//! Screen bot: multi-phase client-facing assessment driven by
//! [`gate_screening::ScreenOrchestrator`]. This handler only renders the
//! orchestrator's decisions as Telegram messages and inline keyboards —
//! all scoring lives in `gate_engine`/`gate_screening`.
//!
//! FSM states:
//!   `active`              — welcome shown, waiting for "Начать"
//!   `phase1`/`phase2`/`phase3` — multi-select question in progress
//!   `completed`           — any further message gets a static reply

use crate::{Handler, HandlerContext, Incoming, KeyboardButton, OutgoingMessage};
use async_trait::async_trait;
use gate_screening::{Phase2Template, QuestionView, ScreenAction, ScreenOrchestrator};
use serde_json::{json, Value};
use uuid::Uuid;

pub const BOT_ID: &str = "screen";

#[derive(Default)]
pub struct ScreenHandler;

impl ScreenHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn orchestrator(ctx: &HandlerContext<'_>) -> ScreenOrchestrator {
        ScreenOrchestrator::new(ctx.oracle.clone(), ctx.screenings.clone())
    }

    async fn start_session(&self, ctx: &HandlerContext<'_>, raw_token: &str) -> anyhow::Result<Vec<OutgoingMessage>> {
        let subject_id = ctx.user_id.unwrap_or(ctx.chat_id);
        let token = match ctx.link_tokens.verify(raw_token, BOT_ID, subject_id).await {
            Ok(t) => t,
            Err(e) => {
                return Ok(vec![OutgoingMessage::plain(format!(
                    "❌ Доступ закрыт: {e}\n\nВернитесь к специалисту для получения новой ссылки."
                ))]);
            }
        };

        let Some(assessment) = ctx.screenings.get_by_link_token(token.jti).await? else {
            return Ok(vec![OutgoingMessage::plain("❌ Сессия скрининга не найдена.\n\nОбратитесь к специалисту.")]);
        };
        if assessment.status == "completed" {
            return Ok(vec![OutgoingMessage::plain(
                "✅ Этот скрининг уже завершён. Результаты переданы вашему специалисту.",
            )]);
        }

        let payload = json!({
            "assessment_id": assessment.id,
            "run_id": token.run_id,
        });
        ctx.fsm
            .upsert(BOT_ID, ctx.chat_id, ctx.user_id, "client", "active", payload, Some(token.context_id))
            .await?;

        Ok(vec![OutgoingMessage::plain(
            "👋 Добро пожаловать в PsycheOS Screen!\n\n\
             Этот короткий скрининг поможет вашему специалисту лучше понять ваше текущее состояние.\n\n\
             📋 Вас ждут несколько вопросов с вариантами ответа.\n\
             Вы можете выбирать несколько вариантов одновременно.\n\n\
             Нажмите «Начать», когда будете готовы.",
        )
        .with_keyboard(vec![vec![KeyboardButton {
            label: "▶️ Начать скрининг".to_string(),
            callback_data: "start_screening".to_string(),
        }]])])
    }

    async fn handle_text(&self, ctx: &HandlerContext<'_>, _text: &str) -> anyhow::Result<Vec<OutgoingMessage>> {
        match ctx.state_name() {
            "completed" => Ok(vec![OutgoingMessage::plain(
                "✅ Скрининг завершён. Результаты переданы вашему специалисту.",
            )]),
            "phase1" | "phase2" | "phase3" => {
                Ok(vec![OutgoingMessage::plain("Пожалуйста, используйте кнопки для ответа.")])
            }
            _ => Ok(vec![OutgoingMessage::plain("Для запуска скрининга используйте ссылку от специалиста.")]),
        }
    }

    async fn handle_callback(&self, ctx: &HandlerContext<'_>, data: &str) -> anyhow::Result<Vec<OutgoingMessage>> {
        let state_name = ctx.state_name().to_string();
        let mut payload = ctx.payload();

        if data == "start_screening" && state_name == "active" {
            let Some(assessment_id) = assessment_id(&payload) else {
                return Ok(vec![OutgoingMessage::plain("❌ Ошибка сессии. Используйте ссылку от специалиста.")]);
            };
            let action = Self::orchestrator(ctx).start_assessment(assessment_id).await?;
            return self.apply_action(ctx, payload, "phase1", action).await;
        }

        if let Some(idx_str) = data.strip_prefix("toggle_") {
            if matches!(state_name.as_str(), "phase1" | "phase2" | "phase3") {
                let Ok(idx) = idx_str.parse::<usize>() else {
                    return Ok(Vec::new());
                };
                let mut selected = selected_options(&payload);
                if let Some(pos) = selected.iter().position(|v| *v == idx) {
                    selected.remove(pos);
                } else {
                    selected.push(idx);
                }
                payload["selected_options"] = json!(selected);
                ctx.fsm
                    .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), &state_name, payload.clone(), ctx.context_id())
                    .await?;
                let view = current_screen(&payload);
                return Ok(vec![render_multi_select(&view, &selected, None)]);
            }
        }

        if data == "confirm_selection" && matches!(state_name.as_str(), "phase1" | "phase2" | "phase3") {
            let selected = selected_options(&payload);
            if selected.is_empty() {
                return Ok(vec![OutgoingMessage::plain("Выберите хотя бы один вариант.")]);
            }
            let Some(assessment_id) = assessment_id(&payload) else {
                return Ok(vec![OutgoingMessage::plain("❌ Ошибка сессии.")]);
            };
            let view = current_screen(&payload);
            let template = Phase2Template {
                node: view.node.clone().unwrap_or_default(),
                reference_question: view.question.clone(),
                diagnostic_split: String::new(),
                options: view.options.clone(),
            };

            let orchestrator = Self::orchestrator(ctx);
            let action = match state_name.as_str() {
                "phase1" => {
                    let screen_index = payload["screen_index"].as_u64().unwrap_or(0) as usize;
                    orchestrator.process_phase1_response(assessment_id, screen_index, &selected).await?
                }
                "phase2" => orchestrator.process_phase2_response(assessment_id, &template, &selected).await?,
                _ => orchestrator.process_phase3_response(assessment_id, &template, &selected).await?,
            };

            return self.apply_action(ctx, payload, &state_name, action).await;
        }

        Ok(Vec::new())
    }

    async fn apply_action(
        &self,
        ctx: &HandlerContext<'_>,
        mut payload: Value,
        current_state: &str,
        action: ScreenAction,
    ) -> anyhow::Result<Vec<OutgoingMessage>> {
        match action {
            ScreenAction::ShowScreen { screen, phase } => {
                let next_state = format!("phase{phase}");
                payload["current_screen"] = json!(screen);
                payload["screen_index"] = json!(screen.node.as_deref().and_then(|n| n.strip_prefix("screen_")).and_then(|n| n.parse::<u64>().ok()).unwrap_or(0));
                payload["selected_options"] = json!(Vec::<usize>::new());
                payload["phase"] = json!(phase);
                ctx.fsm
                    .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), &next_state, payload, ctx.context_id())
                    .await?;

                let mut messages = Vec::new();
                if next_state != current_state {
                    if let Some(text) = phase_transition_text(current_state, &next_state) {
                        messages.push(OutgoingMessage::plain(text));
                    }
                }
                let header = (phase == 1).then(|| {
                    let idx = screen
                        .node
                        .as_deref()
                        .and_then(|n| n.strip_prefix("screen_"))
                        .and_then(|n| n.parse::<usize>().ok())
                        .unwrap_or(0);
                    format!("📋 Вопрос {} из 6", idx + 1)
                });
                messages.push(render_multi_select(&screen, &[], header.as_deref()));
                Ok(messages)
            }
            ScreenAction::Complete { report_json, report_text } => {
                let clean_payload = json!({
                    "assessment_id": payload["assessment_id"],
                    "run_id": payload["run_id"],
                });
                ctx.fsm
                    .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "completed", clean_payload, ctx.context_id())
                    .await?;

                if let Some(context_id) = ctx.context_id() {
                    if let Some(run_id) = payload["run_id"].as_str().and_then(|s| s.parse::<Uuid>().ok()) {
                        let summary: String = report_text.chars().take(150).collect();
                        ctx.artifacts
                            .save_artifact(
                                context_id,
                                BOT_ID,
                                run_id,
                                ctx.user_id.unwrap_or(ctx.chat_id),
                                report_json,
                                Some(&summary),
                            )
                            .await?;
                    }
                }

                Ok(vec![OutgoingMessage::plain(
                    "✅ Скрининг завершён!\n\n\
                     Спасибо за ваши ответы. Результаты переданы вашему специалисту.\n\n\
                     Специалист свяжется с вами для обсуждения результатов.",
                )])
            }
        }
    }
}

fn assessment_id(payload: &Value) -> Option<Uuid> {
    payload["assessment_id"].as_str().and_then(|s| s.parse().ok())
}

fn selected_options(payload: &Value) -> Vec<usize> {
    payload["selected_options"]
        .as_array()
        .map(|arr| arr.iter().filter_map(Value::as_u64).map(|v| v as usize).collect())
        .unwrap_or_default()
}

fn current_screen(payload: &Value) -> QuestionView {
    serde_json::from_value(payload["current_screen"].clone()).unwrap_or(QuestionView {
        question: String::new(),
        options: Vec::new(),
        node: None,
    })
}

fn phase_transition_text(from_state: &str, to_state: &str) -> Option<&'static str> {
    match (from_state, to_state) {
        ("phase1", "phase2") => Some(
            "✅ Первая часть пройдена.\n\n\
             📝 Переходим к уточняющим вопросам — их будет немного, они помогут лучше понять вашу ситуацию.",
        ),
        ("phase2", "phase3") => Some(
            "✅ Основные вопросы пройдены.\n\n\
             🔍 Последний блок — несколько дополнительных вопросов для уточнения.",
        ),
        _ => None,
    }
}

fn render_multi_select(screen: &QuestionView, selected: &[usize], header: Option<&str>) -> OutgoingMessage {
    let question = header.map_or_else(|| screen.question.clone(), |h| format!("{h}\n\n{}", screen.question));

    let mut rows: Vec<Vec<KeyboardButton>> = screen
        .options
        .iter()
        .enumerate()
        .map(|(i, opt)| {
            let mark = if selected.contains(&i) { "✅" } else { "⬜" };
            vec![KeyboardButton { label: format!("{mark} {}", opt.text), callback_data: format!("toggle_{i}") }]
        })
        .collect();
    rows.push(vec![KeyboardButton { label: "Подтвердить ✓".to_string(), callback_data: "confirm_selection".to_string() }]);

    OutgoingMessage::plain(question).with_keyboard(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_screening::ScreenOption;

    fn option(text: &str) -> ScreenOption {
        ScreenOption { text: text.to_string(), axis_weights: Default::default(), layer_weights: Default::default() }
    }

    fn sample_screen() -> QuestionView {
        QuestionView {
            question: "Как вы себя чувствуете?".to_string(),
            options: vec![option("Тревожно"), option("Спокойно")],
            node: Some("screen_2".to_string()),
        }
    }

    #[test]
    fn assessment_id_parses_a_valid_uuid() {
        let id = Uuid::new_v4();
        let payload = json!({ "assessment_id": id.to_string() });
        assert_eq!(assessment_id(&payload), Some(id));
    }

    #[test]
    fn assessment_id_is_none_when_missing_or_invalid() {
        assert_eq!(assessment_id(&json!({})), None);
        assert_eq!(assessment_id(&json!({ "assessment_id": "not-a-uuid" })), None);
    }

    #[test]
    fn selected_options_reads_an_index_array() {
        let payload = json!({ "selected_options": [0, 2, 5] });
        assert_eq!(selected_options(&payload), vec![0, 2, 5]);
    }

    #[test]
    fn selected_options_defaults_to_empty() {
        assert_eq!(selected_options(&json!({})), Vec::<usize>::new());
    }

    #[test]
    fn current_screen_round_trips_through_the_payload() {
        let screen = sample_screen();
        let payload = json!({ "current_screen": screen });
        let roundtripped = current_screen(&payload);
        assert_eq!(roundtripped.question, screen.question);
        assert_eq!(roundtripped.options.len(), 2);
        assert_eq!(roundtripped.node.as_deref(), Some("screen_2"));
    }

    #[test]
    fn current_screen_falls_back_to_blank_when_absent() {
        let view = current_screen(&json!({}));
        assert_eq!(view.question, "");
        assert!(view.options.is_empty());
        assert_eq!(view.node, None);
    }

    #[test]
    fn phase_transition_text_covers_phase1_to_phase2() {
        assert!(phase_transition_text("phase1", "phase2").is_some());
    }

    #[test]
    fn phase_transition_text_covers_phase2_to_phase3() {
        assert!(phase_transition_text("phase2", "phase3").is_some());
    }

    #[test]
    fn phase_transition_text_is_none_for_same_phase_or_unknown_pairs() {
        assert_eq!(phase_transition_text("phase1", "phase1"), None);
        assert_eq!(phase_transition_text("active", "phase1"), None);
    }

    #[test]
    fn render_multi_select_marks_selected_options_and_adds_confirm_button() {
        let screen = sample_screen();
        let message = render_multi_select(&screen, &[1], None);
        assert_eq!(message.keyboard.len(), 3);
        assert!(message.keyboard[0][0].label.starts_with('⬜'));
        assert!(message.keyboard[1][0].label.starts_with('✅'));
        assert_eq!(message.keyboard[2][0].callback_data, "confirm_selection");
        assert_eq!(message.text, screen.question);
    }

    #[test]
    fn render_multi_select_prefixes_a_header_when_given() {
        let screen = sample_screen();
        let message = render_multi_select(&screen, &[], Some("📋 Вопрос 3 из 6"));
        assert!(message.text.starts_with("📋 Вопрос 3 из 6\n\n"));
        assert!(message.text.ends_with(&screen.question));
    }
}

#[async_trait]
impl Handler for ScreenHandler {
    fn bot_id(&self) -> &'static str {
        BOT_ID
    }

    async fn handle(&self, ctx: HandlerContext<'_>) -> anyhow::Result<Vec<OutgoingMessage>> {
        match ctx.incoming {
            Incoming::Text(text) => {
                let text = text.trim();
                if let Some(rest) = text.strip_prefix("/start") {
                    let token = rest.trim();
                    return if token.is_empty() {
                        Ok(vec![OutgoingMessage::plain("❌ Доступ ограничен.\n\nОжидайте ссылку от специалиста.")])
                    } else {
                        self.start_session(&ctx, token).await
                    };
                }
                self.handle_text(&ctx, text).await
            }
            Incoming::Callback(data) => self.handle_callback(&ctx, data).await,
        }
    }
}
