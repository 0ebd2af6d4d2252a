//! Interpretator bot: turns symbolic material (dream, drawing, projective
//! image) into a structured, policy-checked interpretation.
//!
//! State machine, stored in `bot_chat_state.state`:
//!   `active`             — session opened via a link token, awaiting material
//!   `intake`             — oracle asked a short clarifying question
//!   `clarification_loop` — material partial/fragmentary; at most two rounds
//!   `completed`          — interpretation delivered
//!
//! `state_payload` carries `run_id`, `mode`, `iteration_count`,
//! `repair_attempts`, `material_type`, `completeness`,
//! `accumulated_material[]`, `clarifications_received[]`.

use crate::policy::PolicyEngine;
use crate::{Handler, HandlerContext, Incoming, OutgoingMessage};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const BOT_ID: &str = "interpretator";
const MODEL: &str = "claude-sonnet-4-5-20250929";
const MAX_TOKENS: u32 = 4000;
const MAX_CLARIFICATION_ITERATIONS: i64 = 2;
const MAX_REPAIR_ATTEMPTS: i64 = 2;

const PROMPT_INTAKE: &str = r#"You are the intake module of PsycheOS Interpreter.
Your task is to receive symbolic material (dream, drawing, projective image)
from a specialist and decide whether it is ready for interpretation.

You MUST:
- Ask at most one short clarifying question if the material is too thin to work with.
- Never interpret the material yourself at this stage.
- Never offer a diagnosis or diagnostic language.

If the material already gives you enough to work with, acknowledge receipt
without asking a question.

Output strictly as JSON — no additional text, no markdown:
{"clarifying_question": "...", "acknowledgment": null}
or
{"clarifying_question": null, "acknowledgment": "..."}"#;

const PROMPT_MATERIAL_CHECK: &str = r#"You are the material-completeness module of PsycheOS Interpreter.
Assess whether the accumulated symbolic material is sufficient for a
structured interpretation, or whether it is partial or fragmentary.

You MUST NOT interpret the material at this stage — only judge its completeness."#;

const PROMPT_CLARIFICATION_LOOP: &str = r#"You are the clarification module of PsycheOS Interpreter.
Ask ONE phenomenological question that would help complete the picture of
the symbolic material already received.

You MUST:
- Ask about sensory/phenomenological detail, never about meaning or cause.
- Never interpret the material or suggest what it might mean.
- Keep the question short (under one sentence).

Output only the question text, nothing else."#;

const PROMPT_INTERPRETATION: &str = r#"You are the interpretation module of PsycheOS Interpreter.
Produce a structured interpretation of the symbolic material in Russian.

You MUST NOT:
- State or imply a clinical diagnosis.
- Assert that trauma is definitely present.
- Use pathologising language (dysfunctional, broken, abnormal, maladaptive).

You MUST:
- Offer at most 3 interpretative hypotheses (STANDARD mode) or 1 (LOW_DATA mode).
- Ground every hypothesis in specific elements of the material.
- Populate uncertainty_profile with substantive data_gaps and/or ambiguities.

Output strictly as JSON — no additional text, no markdown:
{
  "meta": {"session_id": "...", "timestamp": "...", "state": "completed", "mode": "...", "iteration_count": 0},
  "input_summary": {"material_type": "...", "source": "specialist_observation", "completeness": "...", "clarifications_received": []},
  "phenomenological_summary": {"text": "...", "key_elements": [{"element": "...", "prominence": "high", "description": "..."}]},
  "interpretative_hypotheses": [{"hypothesis_text": "...", "supporting_evidence": ["..."], "limitations": "...", "alternatives": ["..."]}],
  "focus_of_tension": {"domains": ["..."], "indicators": ["..."]},
  "compensatory_patterns": [{"pattern": "...", "confidence": "moderate", "evidence": "..."}],
  "uncertainty_profile": {"overall_confidence": "moderate", "data_gaps": ["..."], "ambiguities": ["..."], "cautions": ["..."]},
  "clarification_directions": [{"direction": "...", "priority": "medium", "rationale": "..."}],
  "policy_flags": {}
}"#;

const PROMPT_LOW_DATA: &str = r#"You are the interpretation module of PsycheOS Interpreter, operating in LOW_DATA mode.
The material received is thin. Produce a single, tightly-hedged interpretative
hypothesis in Russian rather than a full set.

You MUST NOT:
- State or imply a clinical diagnosis.
- Assert that trauma is definitely present.
- Use pathologising language.

You MUST:
- Offer exactly 1 interpretative hypothesis.
- Set uncertainty_profile.overall_confidence to "low".
- Populate data_gaps with what is missing.

Output strictly as JSON with the same shape as STANDARD mode, but with a
single hypothesis and overall_confidence "low"."#;

fn assemble_prompt(base: &str, context: &Value) -> String {
    if context.as_object().is_none_or(serde_json::Map::is_empty) {
        return base.to_string();
    }
    let mut out = String::from(base);
    out.push_str("\n\n--- INPUT DATA ---");
    if let Some(obj) = context.as_object() {
        for (key, value) in obj {
            if value.is_object() || value.is_array() {
                out.push_str(&format!(
                    "\n{key}:\n{}",
                    serde_json::to_string_pretty(value).unwrap_or_default()
                ));
            } else {
                out.push_str(&format!("\n{key}: {}", value_as_plain(value)));
            }
        }
    }
    out
}

fn value_as_plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct InterpreterHandler {
    policy: PolicyEngine,
}

impl Default for InterpreterHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpreterHandler {
    #[must_use]
    pub fn new() -> Self {
        Self { policy: PolicyEngine::new() }
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

        let payload = json!({
            "run_id": token.run_id,
            "mode": "STANDARD",
            "iteration_count": 0,
            "repair_attempts": 0,
            "material_type": "unknown",
            "completeness": "unknown",
            "accumulated_material": [],
            "clarifications_received": [],
        });
        ctx.fsm
            .upsert(BOT_ID, ctx.chat_id, ctx.user_id, &token.role, "active", payload, Some(token.context_id))
            .await?;

        Ok(vec![OutgoingMessage::html(
            "🧠 <b>PsycheOS Interpreter</b>\n\n\
             Сессия открыта.\n\n\
             Отправьте описание символического материала:\n\
             • Сон\n\
             • Рисунок (текстом или изображением)\n\
             • Проективный образ",
        )])
    }

    async fn handle_text(
        &self,
        ctx: &HandlerContext<'_>,
        text: &str,
    ) -> anyhow::Result<Vec<OutgoingMessage>> {
        let Some(state) = ctx.state else {
            return Ok(vec![OutgoingMessage::plain("Для запуска используйте ссылку из бота Pro.")]);
        };
        if !matches!(state.state.as_str(), "active" | "intake" | "clarification_loop") {
            let text = if state.state == "completed" {
                "Сессия завершена. Запустите новую через бот Pro."
            } else {
                "Для запуска используйте ссылку из бота Pro."
            };
            return Ok(vec![OutgoingMessage::plain(text)]);
        }

        let mut payload = ctx.payload();
        push_material(&mut payload, text, None);
        if matches!(state.state.as_str(), "intake" | "clarification_loop") {
            payload
                .as_object_mut()
                .unwrap()
                .entry("clarifications_received")
                .or_insert_with(|| json!([]))
                .as_array_mut()
                .unwrap()
                .push(json!(text));
        }

        if state.state == "clarification_loop" {
            self.run_clarification_loop(ctx, payload).await
        } else {
            self.run_intake(ctx, payload).await
        }
    }

    async fn run_intake(&self, ctx: &HandlerContext<'_>, payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let context = self.turn_context(ctx, &payload);
        let system_prompt = assemble_prompt(PROMPT_INTAKE, &context);
        let last_message = last_material_content(&payload);

        let response_text = match ctx.oracle.ask(&system_prompt, &last_message, MODEL, MAX_TOKENS).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "interpretator INTAKE oracle call failed");
                return Ok(vec![OutgoingMessage::plain("❌ Ошибка при обращении к AI. Попробуйте ещё раз.")]);
            }
        };
        let clean = extract_message(&response_text);

        if clean.contains('?') && clean.chars().count() < 200 {
            self.persist(ctx, "intake", payload).await?;
            Ok(vec![OutgoingMessage::plain(clean)])
        } else {
            self.run_material_check(ctx, payload).await
        }
    }

    /// Assesses completeness of the accumulated material and routes to
    /// interpretation (sufficient) or the clarification loop (otherwise).
    async fn run_material_check(&self, ctx: &HandlerContext<'_>, mut payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let context = self.turn_context(ctx, &payload);
        let system_prompt = format!(
            "{}\n\nReturn JSON: {{\"completeness\": \"sufficient|partial|fragmentary\", \"message\": \"brief statement or clarifying question for the specialist\"}}",
            assemble_prompt(PROMPT_MATERIAL_CHECK, &context)
        );
        let material_text = payload["accumulated_material"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|m| m["content"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            })
            .unwrap_or_default();

        let response_text = match ctx.oracle.ask(&system_prompt, &material_text, MODEL, 500).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "interpretator MATERIAL_CHECK oracle call failed");
                return self.run_interpretation(ctx, payload).await;
            }
        };

        let completeness = parse_completeness(&response_text);
        let user_message = extract_message(&response_text);
        payload["completeness"] = json!(completeness);
        tracing::info!(bot_id = BOT_ID, completeness, "material check complete");

        if completeness == "sufficient" {
            self.run_interpretation(ctx, payload).await
        } else {
            payload.as_object_mut().unwrap().entry("iteration_count").or_insert_with(|| json!(0));
            self.persist(ctx, "clarification_loop", payload).await?;
            if user_message.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![OutgoingMessage::plain(user_message)])
            }
        }
    }

    async fn run_clarification_loop(&self, ctx: &HandlerContext<'_>, mut payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let iteration_count = payload["iteration_count"].as_i64().unwrap_or(0);

        if iteration_count >= MAX_CLARIFICATION_ITERATIONS {
            let mut out = vec![OutgoingMessage::plain("⏳ Формирую интерпретацию на основе имеющихся данных...")];
            out.extend(self.run_interpretation(ctx, payload).await?);
            return Ok(out);
        }

        let context = self.turn_context(ctx, &payload);
        let system_prompt = assemble_prompt(PROMPT_CLARIFICATION_LOOP, &context);
        let user_content = material_with_clarifications(&payload);

        let question = match ctx.oracle.ask(&system_prompt, &user_content, MODEL, 200).await {
            Ok(t) => t.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "interpretator CLARIFICATION_LOOP oracle call failed");
                return self.run_interpretation(ctx, payload).await;
            }
        };

        payload["iteration_count"] = json!(iteration_count + 1);
        self.persist(ctx, "clarification_loop", payload).await?;
        Ok(vec![OutgoingMessage::plain(question)])
    }

    async fn run_interpretation(&self, ctx: &HandlerContext<'_>, mut payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let mode = payload["mode"].as_str().unwrap_or("STANDARD").to_string();
        let context = self.turn_context(ctx, &payload);
        let system_prompt = if mode == "LOW_DATA" {
            assemble_prompt(PROMPT_LOW_DATA, &context)
        } else {
            assemble_prompt(PROMPT_INTERPRETATION, &context)
        };
        let user_content = format!(
            "{}\n\nСоздайте структурированную интерпретацию в формате JSON.",
            material_with_clarifications(&payload)
        );

        let response_text = match ctx.oracle.ask(&system_prompt, &user_content, MODEL, MAX_TOKENS).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "interpretator interpretation oracle call failed");
                return Ok(vec![OutgoingMessage::plain("❌ Ошибка AI при интерпретации. Попробуйте позже.")]);
            }
        };

        let Ok(mut output) = crate::parse_json(&response_text) else {
            if mode != "LOW_DATA" {
                payload["mode"] = json!("LOW_DATA");
                payload["repair_attempts"] = json!(payload["repair_attempts"].as_i64().unwrap_or(0) + 1);
                let mut out = vec![OutgoingMessage::plain(
                    "⚠ Не удалось разобрать ответ AI. Повторяю в упрощённом режиме...",
                )];
                out.extend(Box::pin(self.run_interpretation(ctx, payload)).await?);
                return Ok(out);
            }
            return Ok(vec![OutgoingMessage::plain(
                "❌ Критическая ошибка: AI не вернул структурированный результат.\n\nЗапустите новую сессию через Pro.",
            )]);
        };

        let validation = self.policy.validate(&output);
        if !validation.valid {
            let repair_attempts = payload["repair_attempts"].as_i64().unwrap_or(0);
            if repair_attempts < MAX_REPAIR_ATTEMPTS {
                let (repaired, _) = self.policy.repair(&output, &validation);
                output = repaired;
                payload["repair_attempts"] = json!(repair_attempts + 1);
                tracing::info!(bot_id = BOT_ID, "policy engine repair applied");
            }
        }

        let (schema_valid, schema_errors) = validate_structured_results(&output);
        if !schema_valid {
            tracing::warn!(bot_id = BOT_ID, ?schema_errors, "structured results schema validation failed");
            return Ok(vec![OutgoingMessage::plain(
                "⚠ Ошибка структуры результата. Запустите новую сессию через Pro.",
            )]);
        }

        let txt_report = format_to_txt(&output);
        let json_report = serde_json::to_string_pretty(&output).unwrap_or_default();
        let base_name = format!("interpretation_{}_{}", session_id(ctx, &payload), chrono::Utc::now().format("%Y%m%d_%H%M%S"));

        if let Some(context_id) = ctx.context_id() {
            let run_id = payload["run_id"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(uuid::Uuid::new_v4);
            ctx.artifacts
                .save_artifact(context_id, BOT_ID, run_id, ctx.user_id.unwrap_or(ctx.chat_id), output.clone(), None)
                .await?;
        }

        self.persist(ctx, "completed", payload).await?;

        Ok(vec![
            OutgoingMessage::plain("✅ Интерпретация завершена!"),
            OutgoingMessage::plain("📄 Результаты интерпретации")
                .with_document(format!("{base_name}.txt"), txt_report),
            OutgoingMessage::plain("📋 Структурированные данные (JSON)")
                .with_document(format!("{base_name}.json"), json_report),
            OutgoingMessage::plain("Сессия завершена. Запустите новую через бот Pro."),
        ])
    }

    async fn persist(&self, ctx: &HandlerContext<'_>, state: &str, payload: Value) -> anyhow::Result<()> {
        ctx.fsm
            .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), state, payload, ctx.context_id())
            .await?;
        Ok(())
    }

    fn turn_context(&self, ctx: &HandlerContext<'_>, payload: &Value) -> Value {
        json!({
            "session_id": session_id(ctx, payload),
            "mode": payload["mode"].as_str().unwrap_or("STANDARD"),
            "iteration_count": payload["iteration_count"].as_i64().unwrap_or(0),
            "max_iterations": MAX_CLARIFICATION_ITERATIONS,
            "material_type": payload["material_type"].as_str().unwrap_or("unknown"),
            "completeness": payload["completeness"].as_str().unwrap_or("unknown"),
        })
    }
}

fn session_id(ctx: &HandlerContext<'_>, payload: &Value) -> String {
    let run_id = payload["run_id"].as_str().unwrap_or("");
    let short: String = run_id.chars().filter(|c| *c != '-').take(8).collect();
    if short.is_empty() {
        format!("int_{}", ctx.chat_id)
    } else {
        format!("int_{}_{short}", ctx.chat_id)
    }
}

fn push_material(payload: &mut Value, content: &str, kind: Option<&str>) {
    let mut entry = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "content": content,
    });
    if let Some(kind) = kind {
        entry["type"] = json!(kind);
    }
    payload
        .as_object_mut()
        .unwrap()
        .entry("accumulated_material")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .unwrap()
        .push(entry);
}

/// Extracts the completeness verdict from a MATERIAL_CHECK response,
/// falling back to keyword matching when JSON parsing fails.
fn parse_completeness(response_text: &str) -> String {
    if let Ok(j) = crate::parse_json(response_text) {
        if let Some(c) = j["completeness"].as_str() {
            if matches!(c, "sufficient" | "partial" | "fragmentary") {
                return c.to_string();
            }
        }
    }
    let lower = response_text.to_lowercase();
    if lower.contains("fragmentary") || lower.contains("фрагментарн") {
        "fragmentary".to_string()
    } else if lower.contains("partial") || lower.contains("частичн") {
        "partial".to_string()
    } else {
        "sufficient".to_string()
    }
}

fn last_material_content(payload: &Value) -> String {
    payload["accumulated_material"]
        .as_array()
        .and_then(|a| a.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn material_with_clarifications(payload: &Value) -> String {
    let material_text = payload["accumulated_material"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m["content"].as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default();

    let clarifications = payload["clarifications_received"].as_array();
    match clarifications {
        Some(items) if !items.is_empty() => {
            let block = items
                .iter()
                .filter_map(|c| c.as_str())
                .map(|c| format!("- {c}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Символический материал:\n{material_text}\n\nПолученные уточнения:\n{block}")
        }
        _ => format!("Символический материал:\n{material_text}"),
    }
}

/// Pulls the single user-facing field out of an oracle JSON reply; falls
/// back to the raw text when no known field is present or parsing fails.
fn extract_message(response_text: &str) -> String {
    let Ok(data) = crate::parse_json(response_text) else {
        return response_text.to_string();
    };
    for key in ["clarifying_question", "message", "question"] {
        if let Some(v) = data.get(key).and_then(Value::as_str) {
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    match data.get("acknowledgment") {
        Some(Value::Object(obj)) => obj.get("text").and_then(Value::as_str).map(str::to_string),
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
    .or_else(|| data.get("text").and_then(Value::as_str).map(str::to_string))
    .unwrap_or_else(|| response_text.to_string())
}

const MATERIAL_TYPE_LABELS: &[(&str, &str)] = &[
    ("dream", "Сон"),
    ("drawing", "Рисунок"),
    ("image_series", "Серия образов"),
    ("mixed", "Смешанный"),
];
const SOURCE_LABELS: &[(&str, &str)] = &[
    ("client_report", "Рассказ клиента"),
    ("specialist_observation", "Наблюдение специалиста"),
    ("therapeutic_session", "Терапевтическая сессия"),
];
const COMPLETENESS_LABELS: &[(&str, &str)] = &[
    ("sufficient", "Достаточно"),
    ("partial", "Частично"),
    ("fragmentary", "Фрагментарно"),
];
const DOMAIN_LABELS: &[(&str, &str)] = &[
    ("safety_and_protection", "Безопасность и защита"),
    ("connection_and_belonging", "Связь и принадлежность"),
    ("autonomy_and_control", "Автономия и контроль"),
    ("change_and_uncertainty", "Изменения и неопределённость"),
    ("identity_and_continuity", "Идентичность и непрерывность"),
    ("meaning_and_purpose", "Смысл и цель"),
    ("resource_management", "Управление ресурсами"),
];
const PATTERN_LABELS: &[(&str, &str)] = &[
    ("distancing", "Дистанцирование"),
    ("control_seeking", "Поиск контроля"),
    ("symbolic_repair", "Символическое восстановление"),
    ("affect_modulation", "Модуляция аффекта"),
    ("fragmentation", "Фрагментация"),
    ("idealization", "Идеализация"),
    ("externalization", "Экстернализация"),
    ("other", "Другое"),
];

fn lookup<'a>(table: &'a [(&str, &str)], key: &str, fallback: &'a str) -> &'a str {
    table.iter().find(|(k, _)| *k == key).map_or(fallback, |(_, v)| v)
}

const REQUIRED_FIELDS: [&str; 9] = [
    "meta",
    "input_summary",
    "phenomenological_summary",
    "interpretative_hypotheses",
    "focus_of_tension",
    "compensatory_patterns",
    "uncertainty_profile",
    "clarification_directions",
    "policy_flags",
];

const REQUIRED_META_FIELDS: [&str; 5] = ["session_id", "timestamp", "state", "mode", "iteration_count"];

/// Schema gate run after `PolicyEngine` validate/repair: a document that
/// passes policy but is missing required shape still must not reach the
/// client. Distinct from `PolicyEngine::validate`, which checks content
/// safety, not document shape.
fn validate_structured_results(data: &Value) -> (bool, Vec<String>) {
    let mut errors = Vec::new();

    for field in REQUIRED_FIELDS {
        if data.get(field).is_none() {
            errors.push(format!("Missing required field: {field}"));
        }
    }
    if !errors.is_empty() {
        return (false, errors);
    }

    for field in REQUIRED_META_FIELDS {
        if data["meta"].get(field).is_none() {
            errors.push(format!("Missing meta.{field}"));
        }
    }

    let hypothesis_count = data["interpretative_hypotheses"].as_array().map_or(0, Vec::len);
    let mode = data["meta"]["mode"].as_str().unwrap_or("STANDARD");
    if mode == "LOW_DATA" && hypothesis_count > 1 {
        errors.push(format!("LOW_DATA mode allows max 1 hypothesis, got {hypothesis_count}"));
    } else if mode == "STANDARD" && hypothesis_count > 3 {
        errors.push(format!("STANDARD mode allows max 3 hypotheses, got {hypothesis_count}"));
    }

    let profile = &data["uncertainty_profile"];
    let has_gaps = profile["data_gaps"].as_array().is_some_and(|a| !a.is_empty());
    let has_ambiguities = profile["ambiguities"].as_array().is_some_and(|a| !a.is_empty());
    if !has_gaps && !has_ambiguities {
        errors.push("Uncertainty profile lacks substantive content".to_string());
    }

    (errors.is_empty(), errors)
}

/// Renders a Structured Results JSON document into the human-readable
/// report sent as the `.txt` attachment.
pub fn format_to_txt(data: &Value) -> String {
    let mut lines: Vec<String> = Vec::new();
    let bar = "=".repeat(80);
    let dash = "-".repeat(80);

    lines.push(bar.clone());
    lines.push("PsycheOS INTERPRETER — РЕЗУЛЬТАТЫ ИНТЕРПРЕТАЦИИ".to_string());
    lines.push(bar.clone());
    lines.push(String::new());

    let meta = &data["meta"];
    lines.push(format!("Сессия: {}", meta["session_id"].as_str().unwrap_or("Н/Д")));
    lines.push(format!("Дата: {}", meta["timestamp"].as_str().unwrap_or("N/A")));
    lines.push(format!("Режим: {}", meta["mode"].as_str().unwrap_or("N/A")));
    lines.push(String::new());
    lines.push(dash.clone());
    lines.push(String::new());

    let input_sum = &data["input_summary"];
    lines.push("ИСХОДНЫЙ МАТЕРИАЛ".to_string());
    lines.push(String::new());
    lines.push(format!(
        "Тип материала: {}",
        lookup(MATERIAL_TYPE_LABELS, input_sum["material_type"].as_str().unwrap_or(""), "Не указано")
    ));
    lines.push(format!(
        "Источник: {}",
        lookup(SOURCE_LABELS, input_sum["source"].as_str().unwrap_or(""), "Не указан")
    ));
    lines.push(format!(
        "Полнота данных: {}",
        lookup(COMPLETENESS_LABELS, input_sum["completeness"].as_str().unwrap_or(""), "Не указана")
    ));

    if let Some(clarifications) = input_sum["clarifications_received"].as_array() {
        if !clarifications.is_empty() {
            lines.push(String::new());
            lines.push("Уточнения:".to_string());
            for (i, clar) in clarifications.iter().enumerate() {
                lines.push(format!("  {}. {}", i + 1, clar.as_str().unwrap_or("")));
            }
        }
    }
    lines.push(String::new());
    lines.push(dash.clone());
    lines.push(String::new());

    let phenom = &data["phenomenological_summary"];
    lines.push("ФЕНОМЕНОЛОГИЧЕСКОЕ ОПИСАНИЕ".to_string());
    lines.push(String::new());
    lines.push(phenom["text"].as_str().unwrap_or("N/A").to_string());

    if let Some(elements) = phenom["key_elements"].as_array() {
        if !elements.is_empty() {
            lines.push(String::new());
            lines.push("Ключевые элементы:".to_string());
            for elem in elements {
                lines.push(format!(
                    "  • [{}] {}",
                    elem["prominence"].as_str().unwrap_or("N/A").to_uppercase(),
                    elem["element"].as_str().unwrap_or("N/A")
                ));
                if let Some(desc) = elem["description"].as_str() {
                    if !desc.is_empty() {
                        lines.push(format!("    {desc}"));
                    }
                }
            }
        }
    }
    lines.push(String::new());
    lines.push(dash.clone());
    lines.push(String::new());

    let hypotheses = data["interpretative_hypotheses"].as_array().cloned().unwrap_or_default();
    lines.push("ИНТЕРПРЕТАТИВНЫЕ ГИПОТЕЗЫ".to_string());
    lines.push(String::new());
    if hypotheses.is_empty() {
        lines.push("(Недостаточно данных для формулировки гипотез)".to_string());
    } else {
        for (i, hyp) in hypotheses.iter().enumerate() {
            lines.push(format!("ГИПОТЕЗА {}", i + 1));
            lines.push(String::new());
            lines.push(hyp["hypothesis_text"].as_str().unwrap_or("N/A").to_string());
            lines.push(String::new());

            if let Some(evidence) = hyp["supporting_evidence"].as_array() {
                if !evidence.is_empty() {
                    lines.push("Поддерживающие элементы:".to_string());
                    for ev in evidence {
                        lines.push(format!("  • {}", ev.as_str().unwrap_or("")));
                    }
                    lines.push(String::new());
                }
            }
            if let Some(lim) = hyp["limitations"].as_str() {
                if !lim.is_empty() {
                    lines.push("Ограничения:".to_string());
                    lines.push(format!("  {lim}"));
                    lines.push(String::new());
                }
            }
            if let Some(alts) = hyp["alternatives"].as_array() {
                if !alts.is_empty() {
                    lines.push("Альтернативные интерпретации:".to_string());
                    for alt in alts {
                        lines.push(format!("  • {}", alt.as_str().unwrap_or("")));
                    }
                    lines.push(String::new());
                }
            }
        }
    }
    lines.push(dash.clone());
    lines.push(String::new());

    let focus = &data["focus_of_tension"];
    lines.push("ОБЛАСТИ НАПРЯЖЕНИЯ".to_string());
    lines.push(String::new());
    if let Some(domains) = focus["domains"].as_array() {
        if !domains.is_empty() {
            lines.push("Домены:".to_string());
            for d in domains {
                let key = d.as_str().unwrap_or("");
                lines.push(format!("  • {}", lookup(DOMAIN_LABELS, key, key)));
            }
        }
    }
    if let Some(indicators) = focus["indicators"].as_array() {
        if !indicators.is_empty() {
            lines.push(String::new());
            lines.push("Индикаторы:".to_string());
            for ind in indicators {
                lines.push(format!("  • {}", ind.as_str().unwrap_or("")));
            }
        }
    }
    lines.push(String::new());
    lines.push(dash.clone());
    lines.push(String::new());

    if let Some(patterns) = data["compensatory_patterns"].as_array() {
        if !patterns.is_empty() {
            lines.push("КОМПЕНСАТОРНЫЕ ПАТТЕРНЫ".to_string());
            lines.push(String::new());
            for patt in patterns {
                let key = patt["pattern"].as_str().unwrap_or("");
                lines.push(format!(
                    "• {} ({})",
                    lookup(PATTERN_LABELS, key, key),
                    patt["confidence"].as_str().unwrap_or("N/A")
                ));
                if let Some(ev) = patt["evidence"].as_str() {
                    if !ev.is_empty() {
                        lines.push(format!("  {ev}"));
                    }
                }
                lines.push(String::new());
            }
            lines.push(dash.clone());
            lines.push(String::new());
        }
    }

    let uncertainty = &data["uncertainty_profile"];
    lines.push("ПРОФИЛЬ НЕОПРЕДЕЛЁННОСТИ".to_string());
    lines.push(String::new());
    lines.push(format!(
        "Общая уверенность: {}",
        uncertainty["overall_confidence"].as_str().unwrap_or("N/A").to_uppercase()
    ));
    lines.push(String::new());

    for (label, key) in [
        ("Недостающие данные:", "data_gaps"),
        ("Неоднозначности:", "ambiguities"),
        ("Предостережения:", "cautions"),
    ] {
        if let Some(items) = uncertainty[key].as_array() {
            if !items.is_empty() {
                lines.push(label.to_string());
                for item in items {
                    lines.push(format!("  • {}", item.as_str().unwrap_or("")));
                }
                lines.push(String::new());
            }
        }
    }
    lines.push(dash.clone());
    lines.push(String::new());

    if let Some(directions) = data["clarification_directions"].as_array() {
        if !directions.is_empty() {
            lines.push("НАПРАВЛЕНИЯ ДЛЯ УТОЧНЕНИЯ".to_string());
            lines.push(String::new());
            for direction in directions {
                lines.push(format!(
                    "[{}] {}",
                    direction["priority"].as_str().unwrap_or("medium").to_uppercase(),
                    direction["direction"].as_str().unwrap_or("")
                ));
                if let Some(rationale) = direction["rationale"].as_str() {
                    if !rationale.is_empty() {
                        lines.push(format!("  Обоснование: {rationale}"));
                    }
                }
                lines.push(String::new());
            }
        }
    }

    lines.push(bar.clone());
    lines.push("Конец отчёта".to_string());
    lines.push(bar);

    lines.join("\n")
}

#[async_trait]
impl Handler for InterpreterHandler {
    fn bot_id(&self) -> &'static str {
        BOT_ID
    }

    async fn handle(&self, ctx: HandlerContext<'_>) -> anyhow::Result<Vec<OutgoingMessage>> {
        match ctx.incoming {
            Incoming::Text(text) if text.starts_with("/start") => {
                let token = text.split_once(' ').map(|(_, rest)| rest.trim()).unwrap_or("");
                if token.is_empty() {
                    Ok(vec![OutgoingMessage::plain("❌ Запустите инструмент через бот Pro.")])
                } else {
                    self.start_session(&ctx, token).await
                }
            }
            Incoming::Text(text) => self.handle_text(&ctx, text).await,
            Incoming::Callback(_) => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validate_structured_results;
    use serde_json::json;

    fn valid_document() -> serde_json::Value {
        json!({
            "meta": {"session_id": "s1", "timestamp": "t", "state": "done", "mode": "STANDARD", "iteration_count": 1},
            "input_summary": "",
            "phenomenological_summary": "",
            "interpretative_hypotheses": [{"hypothesis_text": "a"}],
            "focus_of_tension": "",
            "compensatory_patterns": "",
            "uncertainty_profile": {"data_gaps": ["missing context"], "ambiguities": []},
            "clarification_directions": [],
            "policy_flags": {},
        })
    }

    #[test]
    fn accepts_a_well_formed_document() {
        let (valid, errors) = validate_structured_results(&valid_document());
        assert!(valid, "{errors:?}");
    }

    #[test]
    fn rejects_a_document_missing_a_required_field() {
        let mut doc = valid_document();
        doc.as_object_mut().unwrap().remove("focus_of_tension");
        let (valid, errors) = validate_structured_results(&doc);
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("focus_of_tension")));
    }

    #[test]
    fn rejects_a_document_missing_a_required_meta_field() {
        let mut doc = valid_document();
        doc["meta"].as_object_mut().unwrap().remove("mode");
        let (valid, errors) = validate_structured_results(&doc);
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("meta.mode")));
    }

    #[test]
    fn rejects_too_many_hypotheses_for_low_data_mode() {
        let mut doc = valid_document();
        doc["meta"]["mode"] = json!("LOW_DATA");
        doc["interpretative_hypotheses"] = json!([{"hypothesis_text": "a"}, {"hypothesis_text": "b"}]);
        let (valid, errors) = validate_structured_results(&doc);
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("LOW_DATA")));
    }

    #[test]
    fn rejects_an_uncertainty_profile_with_no_substantive_content() {
        let mut doc = valid_document();
        doc["uncertainty_profile"] = json!({"data_gaps": [], "ambiguities": []});
        let (valid, errors) = validate_structured_results(&doc);
        assert!(!valid);
        assert!(errors.iter().any(|e| e.contains("Uncertainty profile")));
    }
}
