//! Conceptualizer bot: Socratic hypothesis-extraction dialogue followed
//! by a three-layer (technical / intervention / metaphorical) output
//! assembled from the accumulated hypothesis set.
//!
//! State machine, stored in `bot_chat_state.state`:
//!   `data_collection`   — specialist submits case observations
//!   `socratic_dialogue` — iterative hypothesis extraction
//!   `complete`          — three-layer output sent; session closed
//!
//! `state_payload` carries `run_id` and `session` (the full
//! [`ConceptSession`] serialised as JSON).

use crate::decision_policy::{
    ConceptSession, ConfidenceLevel, DataMap, DecisionPolicySelector, Hypothesis, HypothesisType,
    PsycheLevel, Progress, SessionStateKind,
};
use crate::{Handler, HandlerContext, Incoming, OutgoingMessage};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const BOT_ID: &str = "conceptualizator";
const MODEL: &str = "claude-sonnet-4-5-20250929";

const PROMPT_EXTRACT_HYPOTHESIS: &str = r#"Ты — модуль извлечения гипотез PsycheOS Conceptualizer.
Твоя задача: извлечь одну структурированную гипотезу из ответа специалиста.

Типы гипотез: structural, functional, dynamic, managerial.
Слои: L0 (базовая регуляция), L1 (рефлексивный контроль), L2 (сознательный выбор),
L3 (социально-ролевой контроль), L4 (смыслы и идентичность).
Уровни уверенности: weak, working, dominant, conditional.

ВАЖНО: если текст содержит слова "можно", "нужно", "стоит", "вмешаться",
"изменить", "воздействовать" — это MANAGERIAL гипотеза.

Output strictly as JSON — no additional text, no markdown:
{"type": "structural|functional|dynamic|managerial", "levels": ["L0"], "formulation": "...", "confidence": "weak|working|dominant|conditional", "function": null, "reasoning": "..."}"#;

const LAYER_A_PROMPT: &str = r#"Ты - эксперт по системному анализу психотерапевтических случаев в рамках PsycheOS framework.

Твоя задача: создать Layer A - техническую концептуальную модель системы клиента для специалиста.

# PsycheOS Framework

Слои:
- L0: Базовая регуляция (энергия, сон, витальность)
- L1: Рефлексивный контроль (автоматизмы, защиты)
- L2: Сознательный выбор (произвольная регуляция)
- L3: Социально-ролевой контроль (отношения, роли)
- L4: Смыслы и идентичность (ценности, нарратив)

# Твоя задача

## 1. Ведущая гипотеза (leading_formulation)
Выбери STRUCTURAL гипотезу с максимальной уверенностью.
Если нет structural - выбери любую с highest confidence.

## 2. Доминирующий слой (dominant_layer)
КРИТИЧЕСКИ ВАЖНО: определи НЕ по количеству упоминаний, а по УПРАВЛЯЮЩЕМУ КОНФЛИКТУ.
L0 может быть НОСИТЕЛЕМ напряжения, но не источником конфликта!

## 3. Конфигурация (configuration_summary)
НЕ описывай абзацем! Покажи ПЕТЛИ ОБРАТНОЙ СВЯЗИ стрелками:
Формат: "Триггер → Слой X (реакция) → Слой Y (последствие) → Подкрепление"

## 4. Цена системы (system_cost)
Для каждого слоя укажи КОНКРЕТНУЮ цену: L0 энергетическая, L3 социальная, L4 семантическая.

Output strictly as JSON — no additional text, no markdown:
{
  "leading_formulation": "...",
  "dominant_layer": "L0|L1|L2|L3|L4",
  "configuration_summary": "петли со стрелками A→B→C→reinforcement",
  "system_cost": {"energetic": "...", "social": "...", "semantic": "..."}
}"#;

const LAYER_B_PROMPT: &str = r#"Ты - эксперт по терапевтическим вмешательствам в рамках PsycheOS framework.

Твоя задача: создать Layer B - мишени вмешательства для специалиста, на основе
MANAGERIAL гипотез.

# КРИТИЧЕСКИ ВАЖНО

Layer B - это НЕ описание паттерна, а ФОРМУЛИРОВКИ ИЗМЕНЕНИЯ!
❌ НЕПРАВИЛЬНО: "Система в режиме выживания"
✅ ПРАВИЛЬНО: "Нормализация циркадных ритмов, снижение симпатической активации"

Создай 3-5 мишеней. Приоритет (1-5): L0 стабилизация = 1-2, L4 работа = 4-5.

Output strictly as JSON — no additional text, no markdown:
{
  "targets": [{"layer": "L0|L1|L2|L3|L4|interface_LX_LY", "direction": "...", "priority": 1, "rationale": "..."}],
  "sequencing_notes": "..."
}"#;

const LAYER_C_PROMPT: &str = r#"Ты - эксперт по созданию метафорических нарративов для клиентов.

Твоя задача: создать Layer C - метафорический нарратив, который клиент узнает.

# КРИТИЧЕСКИ ВАЖНО

- Метафора должна быть СПЕЦИФИЧНА для конфликта, не клише!
- Нарратив - на языке опыта, БЕЗ слоёв/гипотез/диагнозов
- Клиент должен сказать "Да, это про меня"

## Метафора (core_metaphor): один образ, 3-6 слов.
## Нарратив (narrative): 200-300 слов, второе лицо, сенсорный язык, без техжаргона.
## Направление изменения (direction_of_change): 1-2 предложения, недирективно.

Output strictly as JSON — no additional text, no markdown:
{"core_metaphor": "...", "narrative": "...", "direction_of_change": "..."}"#;

fn is_clarification_request(message: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "что значит", "уточните", "поясните", "не понял", "непонятно",
        "объясните", "что имеется в виду", "как это", "что это означает",
    ];
    let lower = message.to_lowercase();
    (message.contains('?') || KEYWORDS.iter().any(|kw| lower.contains(kw))) && message.chars().count() < 150
}

fn post_process_hypothesis_type(formulation: &str, extracted_type: &str) -> String {
    const MANAGERIAL_MARKERS: &[&str] = &[
        "можно", "нужно", "стоит", "начать с", "вмешаться", "воздействовать",
        "влиять", "изменить", "скорректировать", "работать с", "фокус на",
        "приоритет", "критическая точка", "точка управления", "leverage",
    ];
    let lower = formulation.to_lowercase();
    let marker_count = MANAGERIAL_MARKERS.iter().filter(|m| lower.contains(*m)).count();
    if marker_count >= 2 && extracted_type != "managerial" {
        tracing::warn!(
            extracted_type,
            marker_count,
            "overriding hypothesis type to managerial on marker count"
        );
        "managerial".to_string()
    } else {
        extracted_type.to_string()
    }
}

fn parse_hyp_type(s: &str) -> HypothesisType {
    match s {
        "functional" => HypothesisType::Functional,
        "dynamic" => HypothesisType::Dynamic,
        "managerial" => HypothesisType::Managerial,
        _ => HypothesisType::Structural,
    }
}

fn parse_confidence(s: &str) -> ConfidenceLevel {
    match s {
        "dominant" => ConfidenceLevel::Dominant,
        "conditional" => ConfidenceLevel::Conditional,
        "working" => ConfidenceLevel::Working,
        _ => ConfidenceLevel::Weak,
    }
}

fn parse_level(s: &str) -> PsycheLevel {
    match s {
        "L1" => PsycheLevel::L1,
        "L2" => PsycheLevel::L2,
        "L3" => PsycheLevel::L3,
        "L4" => PsycheLevel::L4,
        _ => PsycheLevel::L0,
    }
}

async fn extract_hypothesis(oracle: &dyn gate_core::Oracle, message: &str, session: &ConceptSession) -> Hypothesis {
    let next_id = format!("hyp_{:03}", session.progress.hypotheses_added + 1);
    let user_message = format!(
        "Контекст сессии:\n\
         - Текущих гипотез: {}\n\
         - Управленческих гипотез: {}\n\
         - Вопросов задано: {}\n\n\
         Ответ специалиста:\n{message}\n\n\
         Извлеки структурированную гипотезу из этого ответа.\n\
         ВАЖНО: Если текст содержит слова \"можно\", \"нужно\", \"стоит\", \"вмешаться\" - это MANAGERIAL!",
        session.active_hypotheses().len(),
        session.managerial_hypotheses().len(),
        session.progress.dialogue_turns,
    );

    let fallback = || Hypothesis {
        id: next_id.clone(),
        hyp_type: HypothesisType::Structural,
        levels: vec![PsycheLevel::L0],
        formulation: message.chars().take(300).collect(),
        confidence: ConfidenceLevel::Weak,
        foundations: vec!["Fallback extraction".to_string()],
        function: None,
    };

    let Ok(response) = oracle.ask(PROMPT_EXTRACT_HYPOTHESIS, &user_message, MODEL, 500).await else {
        return fallback();
    };
    let Ok(data) = crate::parse_json(&response) else {
        return fallback();
    };

    let Some(original_type) = data["type"].as_str() else {
        return fallback();
    };
    let Some(formulation) = data["formulation"].as_str() else {
        return fallback();
    };
    let corrected_type = post_process_hypothesis_type(formulation, original_type);

    let levels = data["levels"]
        .as_array()
        .map(|arr| arr.iter().filter_map(Value::as_str).map(parse_level).collect())
        .unwrap_or_else(|| vec![PsycheLevel::L0]);

    Hypothesis {
        id: next_id,
        hyp_type: parse_hyp_type(&corrected_type),
        levels,
        formulation: formulation.to_string(),
        confidence: parse_confidence(data["confidence"].as_str().unwrap_or("weak")),
        foundations: vec![data["reasoning"].as_str().unwrap_or("").to_string()],
        function: data["function"].as_str().map(str::to_string),
    }
}

struct LayerA {
    leading_formulation: String,
    dominant_layer: String,
    configuration_summary: String,
    system_cost: String,
}

struct InterventionTarget {
    layer: String,
    direction: String,
    priority: i64,
}

struct LayerB {
    targets: Vec<InterventionTarget>,
    sequencing_notes: String,
}

struct LayerC {
    core_metaphor: String,
    narrative: String,
    direction_of_change: String,
}

fn hypotheses_context(session: &ConceptSession) -> String {
    let mut lines = vec!["# Гипотезы:\n".to_string()];
    for hyp in session.active_hypotheses() {
        let levels_str = hyp.levels.iter().map(|l| format!("{l:?}")).collect::<Vec<_>>().join(", ");
        lines.push(format!("**{:?}** [{levels_str}]", hyp.hyp_type));
        lines.push(hyp.formulation.clone());
        lines.push(format!("Уверенность: {:?}\n", hyp.confidence));
    }
    lines.join("\n")
}

async fn assemble_layer_a(oracle: &dyn gate_core::Oracle, session: &ConceptSession) -> anyhow::Result<LayerA> {
    let user_message = format!(
        "{}\n\nНа основе этих гипотез создай Layer A - техническую модель для специалиста.\n\n\
         КРИТИЧЕСКИ ВАЖНО:\n\
         1. Dominant layer - определи по УПРАВЛЯЮЩЕМУ КОНФЛИКТУ, не по частоте упоминаний\n\
         2. Configuration - покажи петли со СТРЕЛКАМИ (A→B→C), не абзацем\n\
         3. System cost - конкретная цена для L0, L3, L4",
        hypotheses_context(session)
    );
    let response = oracle.ask(LAYER_A_PROMPT, &user_message, MODEL, 2000).await?;
    let data = crate::parse_json(&response)?;

    let cost = &data["system_cost"];
    let system_cost = format!(
        "Энергетическая цена (L0): {}\nСоциальная цена (L3): {}\nСемантическая цена (L4): {}",
        cost["energetic"].as_str().unwrap_or(""),
        cost["social"].as_str().unwrap_or(""),
        cost["semantic"].as_str().unwrap_or(""),
    );

    Ok(LayerA {
        leading_formulation: data["leading_formulation"].as_str().unwrap_or_default().to_string(),
        dominant_layer: data["dominant_layer"].as_str().unwrap_or("L0").to_string(),
        configuration_summary: data["configuration_summary"].as_str().unwrap_or_default().to_string(),
        system_cost,
    })
}

async fn assemble_layer_b(oracle: &dyn gate_core::Oracle, session: &ConceptSession) -> anyhow::Result<LayerB> {
    let managerial = session.managerial_hypotheses();
    if managerial.is_empty() {
        anyhow::bail!("no managerial hypotheses for Layer B");
    }
    let mut context_lines = vec!["# Управленческие гипотезы:\n".to_string()];
    for hyp in &managerial {
        let levels_str = hyp.levels.iter().map(|l| format!("{l:?}")).collect::<Vec<_>>().join(", ");
        context_lines.push(format!("[{levels_str}] {}\n", hyp.formulation));
    }
    let user_message = format!(
        "{}\n\nНа основе этих управленческих гипотез создай Layer B - мишени вмешательства.\n\n\
         КРИТИЧЕСКИ ВАЖНО:\n\
         - Direction = ЧТО должно измениться, НЕ описание паттерна!\n\
         - Формулировки конкретные и actionable\n\
         - Приоритеты: L0 = 1-2, L4 = 4-5",
        context_lines.join("\n")
    );
    let response = oracle.ask(LAYER_B_PROMPT, &user_message, MODEL, 2000).await?;
    let data = crate::parse_json(&response)?;

    let targets = data["targets"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|t| InterventionTarget {
                    layer: t["layer"].as_str().unwrap_or_default().to_string(),
                    direction: t["direction"].as_str().unwrap_or_default().to_string(),
                    priority: t["priority"].as_i64().unwrap_or(3),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(LayerB { targets, sequencing_notes: data["sequencing_notes"].as_str().unwrap_or_default().to_string() })
}

async fn assemble_layer_c(oracle: &dyn gate_core::Oracle, session: &ConceptSession) -> anyhow::Result<LayerC> {
    let mut context_lines = vec!["# Гипотезы для понимания конфликта:\n".to_string()];
    for hyp in session.active_hypotheses() {
        context_lines.push(format!("{:?}: {}\n", hyp.hyp_type, hyp.formulation));
    }
    let user_message = format!(
        "{}\n\nНа основе этого понимания создай Layer C - метафорический нарратив для клиента.\n\n\
         КРИТИЧЕСКИ ВАЖНО:\n\
         - Метафора должна схватывать УПРАВЛЯЮЩИЙ КОНФЛИКТ, не симптом\n\
         - Нарратив на языке ОПЫТА, без L0-L4, гипотез, диагнозов\n\
         - Клиент должен узнать себя",
        context_lines.join("\n")
    );
    let response = oracle.ask(LAYER_C_PROMPT, &user_message, MODEL, 2000).await?;
    let data = crate::parse_json(&response)?;

    Ok(LayerC {
        core_metaphor: data["core_metaphor"].as_str().unwrap_or_default().to_string(),
        narrative: data["narrative"].as_str().unwrap_or_default().to_string(),
        direction_of_change: data["direction_of_change"].as_str().unwrap_or_default().to_string(),
    })
}

#[derive(Default)]
pub struct ConceptualizerHandler;

impl ConceptualizerHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn load_session(payload: &Value) -> Option<ConceptSession> {
        serde_json::from_value(payload.get("session")?.clone()).ok()
    }

    async fn save_session(
        &self,
        ctx: &HandlerContext<'_>,
        session: &ConceptSession,
        state_name: &str,
    ) -> anyhow::Result<()> {
        let mut payload = ctx.payload();
        payload["session"] = serde_json::to_value(session)?;
        ctx.fsm
            .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), state_name, payload, ctx.context_id())
            .await?;
        Ok(())
    }

    async fn start_session(&self, ctx: &HandlerContext<'_>, raw_token: &str) -> anyhow::Result<Vec<OutgoingMessage>> {
        let subject_id = ctx.user_id.unwrap_or(ctx.chat_id);
        let token = match ctx.link_tokens.verify(raw_token, BOT_ID, subject_id).await {
            Ok(t) => t,
            Err(e) => {
                return Ok(vec![OutgoingMessage::plain(format!(
                    "❌ Доступ закрыт: {e}\n\nВернитесь в Pro и запросите новую ссылку."
                ))]);
            }
        };

        let short: String = token.run_id.to_string().chars().filter(|c| *c != '-').take(8).collect();
        let session = ConceptSession {
            session_id: format!("cnc_{}_{short}", ctx.chat_id),
            specialist_id: subject_id.to_string(),
            state: SessionStateKind::DataCollection,
            hypotheses: Vec::new(),
            data_map: None,
            progress: Progress::default(),
            red_flags: Vec::new(),
        };

        let payload = json!({
            "run_id": token.run_id,
            "session": session,
        });
        ctx.fsm
            .upsert(BOT_ID, ctx.chat_id, ctx.user_id, &token.role, "data_collection", payload, Some(token.context_id))
            .await?;

        Ok(vec![OutgoingMessage::html(
            "🎯 <b>PsycheOS Conceptualizer</b>\n\n\
             Сессия открыта.\n\n\
             <b>Этап 1: Сбор данных</b>\n\
             Предоставьте информацию о клиенте:\n\
             • Основные жалобы\n\
             • Наблюдения по слоям (L0–L4)\n\
             • Ключевые маркеры\n\n\
             Напишите <b>«готово»</b> когда закончите.",
        )])
    }

    async fn handle_data_collection(
        &self,
        ctx: &HandlerContext<'_>,
        text: &str,
        mut session: ConceptSession,
    ) -> anyhow::Result<Vec<OutgoingMessage>> {
        let observations = match &mut session.data_map {
            Some(map) => {
                let obs = map.specialist_observations.get_or_insert_with(String::new);
                if obs.is_empty() {
                    *obs = text.to_string();
                } else {
                    obs.push('\n');
                    obs.push_str(text);
                }
                obs.clone()
            }
            None => {
                session.data_map = Some(DataMap { specialist_observations: Some(text.to_string()) });
                text.to_string()
            }
        };

        if text.to_lowercase().contains("готов") && observations.len() > 50 {
            session.progress.data_collection_complete = true;
            session.state = SessionStateKind::SocraticDialogue;

            let selection = DecisionPolicySelector::new(&session).select_next_question();
            session.progress.dialogue_turns += 1;

            self.save_session(ctx, &session, "socratic_dialogue").await?;
            Ok(vec![OutgoingMessage::html(format!(
                "✅ Данные собраны.\n\n💬 <b>Сократовский диалог</b>\n\n❓ {}",
                selection.question_text
            ))])
        } else {
            self.save_session(ctx, &session, "data_collection").await?;
            Ok(vec![OutgoingMessage::plain("Принято. Продолжайте или напишите «готово».")])
        }
    }

    async fn handle_dialogue(
        &self,
        ctx: &HandlerContext<'_>,
        text: &str,
        mut session: ConceptSession,
    ) -> anyhow::Result<Vec<OutgoingMessage>> {
        if is_clarification_request(text) {
            return Ok(vec![OutgoingMessage::plain(
                "Давайте конкретизирую вопрос:\n\n\
                 Подумайте о системе клиента и ответьте:\n\
                 • На каком слое (L0–L4) можно реально влиять?\n\
                 • Что можно изменить без коллапса?\n\
                 • С чего стоит начать?\n\n\
                 Отвечайте своими словами, думайте вслух.",
            )]);
        }

        let mut messages = Vec::new();
        if text.chars().count() > 30 {
            let hypothesis = extract_hypothesis(&**ctx.oracle, text, &session).await;
            let emoji = match hypothesis.hyp_type {
                HypothesisType::Structural => "🏗",
                HypothesisType::Functional => "⚙️",
                HypothesisType::Dynamic => "🔄",
                HypothesisType::Managerial => "🎯",
            };
            let levels_str = hypothesis.levels.iter().map(|l| format!("{l:?}")).collect::<Vec<_>>().join(", ");
            let formulation = hypothesis.formulation.clone();
            let hyp_type = hypothesis.hyp_type;
            session.add_hypothesis(hypothesis);

            messages.push(OutgoingMessage::html(format!(
                "✅ {emoji} Гипотеза извлечена\n\
                 <b>Тип:</b> {hyp_type:?}\n\
                 <b>Слои:</b> {levels_str}\n\
                 <b>Формулировка:</b> {formulation}\n\n\
                 <i>Всего гипотез: {} (управленческих: {})</i>",
                session.active_hypotheses().len(),
                session.managerial_hypotheses().len(),
            )));
        }

        let (should_continue, reason) = DecisionPolicySelector::new(&session).should_continue_dialogue();

        if !should_continue {
            self.save_session(ctx, &session, "socratic_dialogue").await?;
            messages.push(OutgoingMessage::plain(format!("📋 {reason}\n\n⏳ Формирую концептуализацию...")));
            messages.extend(self.run_output_assembly(ctx, session).await?);
            return Ok(messages);
        }

        let selection = DecisionPolicySelector::new(&session).select_next_question();
        session.progress.dialogue_turns += 1;
        let turn = session.progress.dialogue_turns;
        self.save_session(ctx, &session, "socratic_dialogue").await?;

        messages.push(OutgoingMessage::html(format!("💬 <b>Вопрос {turn}</b>\n\n❓ {}", selection.question_text)));
        Ok(messages)
    }

    async fn run_output_assembly(&self, ctx: &HandlerContext<'_>, mut session: ConceptSession) -> anyhow::Result<Vec<OutgoingMessage>> {
        if !session.can_proceed_to_output() {
            return Ok(vec![OutgoingMessage::plain("❌ Ошибка формирования концептуализации. Попробуйте позже.")]);
        }

        let oracle: &dyn gate_core::Oracle = &**ctx.oracle;
        let (layer_a, layer_b, layer_c) = match (
            assemble_layer_a(oracle, &session).await,
            assemble_layer_b(oracle, &session).await,
            assemble_layer_c(oracle, &session).await,
        ) {
            (Ok(a), Ok(b), Ok(c)) => (a, b, c),
            _ => return Ok(vec![OutgoingMessage::plain("❌ Ошибка формирования концептуализации. Попробуйте позже.")]),
        };

        let mut messages = vec![OutgoingMessage::html(format!(
            "📊 <b>LAYER A: Концептуальная модель</b>\n\n\
             <b>Ведущая гипотеза:</b>\n{}\n\n\
             <b>Доминирующий слой:</b> {}\n\n\
             <b>Конфигурация:</b>\n{}\n\n\
             <b>Цена системы:</b>\n{}",
            layer_a.leading_formulation, layer_a.dominant_layer, layer_a.configuration_summary, layer_a.system_cost,
        ))];

        let mut b_lines = vec!["🎯 <b>LAYER B: Мишени вмешательства</b>\n".to_string()];
        for t in &layer_b.targets {
            b_lines.push(format!("<b>{}. {}</b>\n{}\n", t.priority, t.layer, t.direction));
        }
        b_lines.push(format!("\n<b>Последовательность:</b>\n{}", layer_b.sequencing_notes));
        messages.push(OutgoingMessage::html(b_lines.join("\n")));

        messages.push(OutgoingMessage::html(format!(
            "🎭 <b>LAYER C: Метафорический нарратив</b>\n\n\
             <b>Метафора:</b> <i>{}</i>\n\n\
             {}\n\n\
             <b>Направление изменения:</b>\n{}",
            layer_c.core_metaphor, layer_c.narrative, layer_c.direction_of_change,
        )));

        session.state = SessionStateKind::Complete;
        self.save_session(ctx, &session, "complete").await?;

        if let Some(context_id) = ctx.context_id() {
            let payload = ctx.payload();
            if let Some(run_id) = payload["run_id"].as_str().and_then(|s| s.parse().ok()) {
                let leading = &layer_a.leading_formulation;
                let summary: String = if leading.chars().count() > 150 {
                    format!("{}…", leading.chars().take(150).collect::<String>())
                } else {
                    leading.clone()
                };
                let artifact_payload = json!({
                    "layer_a": {
                        "leading_formulation": layer_a.leading_formulation,
                        "dominant_layer": layer_a.dominant_layer,
                        "configuration_summary": layer_a.configuration_summary,
                        "system_cost": layer_a.system_cost,
                    },
                    "layer_b": {
                        "targets": layer_b.targets.iter().map(|t| json!({
                            "layer": t.layer, "direction": t.direction, "priority": t.priority,
                        })).collect::<Vec<_>>(),
                        "sequencing_notes": layer_b.sequencing_notes,
                    },
                    "layer_c": {
                        "core_metaphor": layer_c.core_metaphor,
                        "narrative": layer_c.narrative,
                        "direction_of_change": layer_c.direction_of_change,
                    },
                    "meta": {
                        "session_id": session.session_id,
                        "hypothesis_count": session.hypotheses.len(),
                    },
                });
                ctx.artifacts
                    .save_artifact(context_id, BOT_ID, run_id, ctx.user_id.unwrap_or(ctx.chat_id), artifact_payload, Some(&summary))
                    .await?;
            }
        }

        messages.push(OutgoingMessage::html(
            "✅ <b>Концептуализация завершена!</b>\n\nЗапустите новую сессию через бот Pro.",
        ));
        Ok(messages)
    }

    fn handle_status(session: Option<ConceptSession>) -> OutgoingMessage {
        let Some(session) = session else {
            return OutgoingMessage::plain("У вас нет активной сессии. Запустите через бот Pro.");
        };
        let total = session.active_hypotheses().len();
        let managerial = session.managerial_hypotheses().len();
        let mut type_counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
        for h in session.active_hypotheses() {
            *type_counts.entry(format!("{:?}", h.hyp_type)).or_insert(0) += 1;
        }

        let mut lines = vec![
            "📊 <b>Статус сессии</b>\n".to_string(),
            format!("Состояние: {:?}", session.state),
            format!("Диалог: {} вопросов\n", session.progress.dialogue_turns),
            format!("<b>Гипотезы: {total}</b>"),
        ];
        for (htype, cnt) in &type_counts {
            lines.push(format!("  • {htype}: {cnt}"));
        }
        if session.can_proceed_to_output() {
            lines.push("\n✅ Готово к формированию концептуализации!".to_string());
        } else if managerial == 0 {
            lines.push("\n⚠️ Нужна управленческая гипотеза".to_string());
        }
        OutgoingMessage::html(lines.join("\n"))
    }

    fn handle_help() -> OutgoingMessage {
        OutgoingMessage::html(
            "🆘 <b>Справка — Conceptualizer</b>\n\n\
             <b>Команды:</b>\n\
             /status — статус текущей сессии\n\
             /reset — сбросить сессию\n\
             /help — эта справка\n\n\
             <b>Как работает:</b>\n\
             1. Сбор данных о клиенте (наблюдения по L0–L4)\n\
             2. Сократовский диалог с извлечением гипотез\n\
             3. Трёхслойная концептуализация (A/B/C) через Claude AI\n\n\
             <b>Советы:</b>\n\
             • Думайте вслух — отвечайте развёрнуто\n\
             • Упоминайте слои (L0–L4)\n\
             • Для управленческих гипотез используйте: «можно», «стоит начать с»",
        )
    }

    async fn handle_reset(&self, ctx: &HandlerContext<'_>) -> anyhow::Result<Vec<OutgoingMessage>> {
        ctx.fsm
            .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "reset", json!({}), ctx.context_id())
            .await?;
        Ok(vec![OutgoingMessage::plain("🔄 Сессия сброшена. Запустите новую через бот Pro.")])
    }
}

#[async_trait]
impl Handler for ConceptualizerHandler {
    fn bot_id(&self) -> &'static str {
        BOT_ID
    }

    async fn handle(&self, ctx: HandlerContext<'_>) -> anyhow::Result<Vec<OutgoingMessage>> {
        let Incoming::Text(raw_text) = ctx.incoming else {
            return Ok(Vec::new());
        };
        let text = raw_text.trim();

        if text.starts_with("/start") {
            let token = text.split_once(' ').map(|(_, rest)| rest.trim()).unwrap_or("");
            return if token.is_empty() {
                Ok(vec![OutgoingMessage::plain("❌ Запустите инструмент через бот Pro.")])
            } else {
                self.start_session(&ctx, token).await
            };
        }
        if text.starts_with("/status") {
            return Ok(vec![Self::handle_status(ctx.state.and_then(|s| Self::load_session(&s.state_payload)))]);
        }
        if text.starts_with("/reset") {
            return self.handle_reset(&ctx).await;
        }
        if text.starts_with("/help") {
            return Ok(vec![Self::handle_help()]);
        }

        let Some(state) = ctx.state else {
            return Ok(vec![OutgoingMessage::plain("Для запуска используйте ссылку из Pro.")]);
        };
        if state.state == "complete" {
            return Ok(vec![OutgoingMessage::plain("Сессия завершена. Запустите новую через бот Pro.")]);
        }
        let Some(session) = Self::load_session(&state.state_payload) else {
            return Ok(vec![OutgoingMessage::plain("❌ Не удалось загрузить сессию. Запустите новую через Pro.")]);
        };

        match state.state.as_str() {
            "data_collection" => self.handle_data_collection(&ctx, text, session).await,
            "socratic_dialogue" => self.handle_dialogue(&ctx, text, session).await,
            _ => Ok(vec![OutgoingMessage::plain("Для запуска используйте ссылку из Pro.")]),
        }
    }
}
