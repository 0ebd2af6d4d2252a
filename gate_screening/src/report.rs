use chrono::{DateTime, Utc};
use gate_core::Oracle;
use gate_engine::EngineState;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::parse_json;

const SONNET_MODEL: &str = "claude-sonnet-4-5-20250929";

pub struct Report {
    pub report_json: Value,
    pub report_text: String,
}

/// Builds the complete report for a finished screening assessment: two
/// oracle calls (structural report, then session-bridge interview
/// protocol), assembled into `report_json` per §6's artifact shape, with
/// `report_text` rendered from it by the pure formatter below.
pub async fn generate_full_report(
    oracle: &dyn Oracle,
    state: &EngineState,
    assessment_id: Uuid,
    phase2_questions: i32,
    phase3_questions: i32,
) -> Report {
    let report_context = json!({
        "AxisVector": state.axis_vector,
        "LayerVector": state.layer_vector,
        "TensionMatrix": state.tension_matrix,
        "RigidityIndex": state.rigidity,
        "DominantCells": state.dominant_cells,
        "Confidence": state.confidence,
    });
    let structural_report = match oracle
        .ask(
            "You are the structural report generator of a psychological screening system. \
             Write a neutral, professional report in Russian describing axis configuration \
             and dominant layers objectively. Never provide or imply a diagnosis, treatment \
             suggestion, or judgement of normal/healthy/pathological.",
            &format!("Составь структурный отчёт на основе следующих данных:\n{report_context}"),
            SONNET_MODEL,
            2000,
        )
        .await
    {
        Ok(text) if !text.trim().is_empty() => text,
        _ => "(Отчёт недоступен — ошибка генерации)".to_string(),
    };

    let bridge_context = json!({
        "AxisVector": state.axis_vector,
        "LayerVector": state.layer_vector,
        "DominantCells": state.dominant_cells,
        "RigidityIndex": state.rigidity,
        "Confidence": state.confidence,
    });
    let bridge_raw = oracle
        .ask(
            "You are the session-bridge module of a psychological screening system. Generate \
             6-8 first-session interview questions in Russian, split across \
             axis_verification, layer_exploration and functional_context. Questions should \
             invite reflection, not presuppose answers or use clinical framing. Respond only \
             with valid JSON.",
            &format!("Составь протокол первой сессии на основе следующих данных:\n{bridge_context}"),
            SONNET_MODEL,
            1500,
        )
        .await;
    let interview_protocol = match bridge_raw {
        Ok(text) if !text.trim().is_empty() => parse_json(&text).unwrap_or_else(|_| {
            json!({
                "axis_verification": [] as [String; 0],
                "layer_exploration": [] as [String; 0],
                "functional_context": [] as [String; 0],
            })
        }),
        _ => json!({}),
    };

    let report_json = json!({
        "assessment_id": assessment_id,
        "timestamp": Utc::now().to_rfc3339(),
        "axis_vector": state.axis_vector,
        "layer_vector": state.layer_vector,
        "tension_matrix": state.tension_matrix,
        "dominant_cells": state.dominant_cells,
        "rigidity": state.rigidity,
        "confidence": state.confidence,
        "phases": {
            "phase1_questions": 6,
            "phase2_questions": phase2_questions,
            "phase3_questions": phase3_questions,
        },
        "structural_report": structural_report,
        "interview_protocol": interview_protocol,
    });
    let report_text = format_report_txt(&report_json);

    Report { report_json, report_text }
}

fn axis_profile(key: &str, value: f64) -> (&'static str, &'static str) {
    let (name, negative, neutral, positive) = match key {
        "A1" => ("Активация", "сниженная", "стабильная", "повышенная"),
        "A2" => ("Неопределённость", "избегание", "нейтральная", "исследование"),
        "A3" => ("Импульс", "импульсивность", "гибкая пауза", "избыточное удержание"),
        "A4" => ("Временная ориентация", "короткий цикл", "смешанная", "горизонт"),
        _ => (key, "−", "нейтральная", "+"),
    };
    let pole = if value < -0.3 {
        negative
    } else if value > 0.3 {
        positive
    } else {
        neutral
    };
    (name, pole)
}

fn layer_name(key: &str) -> &'static str {
    match key {
        "L0" => "Энергетический",
        "L1" => "Поведенческий",
        "L2" => "Аффективный",
        "L3" => "Социальный",
        "L4" => "Когнитивный",
        _ => "—",
    }
}

fn rigidity_label(total: f64) -> &'static str {
    if total < 0.3 {
        "low"
    } else if total < 0.6 {
        "medium"
    } else {
        "high"
    }
}

/// Renders `report_json` (the shape assembled above) as the Russian
/// plain-text report sent to the specialist — pure, no I/O.
#[must_use]
pub fn format_report_txt(report_json: &Value) -> String {
    let axis_v = &report_json["axis_vector"];
    let layer_v = &report_json["layer_vector"];
    let dominant: Vec<String> = report_json["dominant_cells"]
        .as_array()
        .map(|cells| cells.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let rigidity = &report_json["rigidity"];
    let tension = &report_json["tension_matrix"];
    let confidence = report_json["confidence"].as_f64().unwrap_or(0.0);
    let structural = report_json["structural_report"].as_str().unwrap_or("");
    let protocol = &report_json["interview_protocol"];
    let timestamp = report_json["timestamp"].as_str().unwrap_or("");

    let date_str = DateTime::parse_from_rfc3339(timestamp).map_or_else(
        |_| if timestamp.is_empty() { "—".to_string() } else { timestamp.chars().take(10).collect() },
        |dt| dt.format("%d.%m.%Y").to_string(),
    );

    let sep = "═".repeat(47);
    let mut lines = vec![
        sep.clone(),
        "PsycheOS Screening v2 — Структурный профиль".to_string(),
        format!("Дата: {date_str}"),
        sep,
        String::new(),
        "▸ ПРОФИЛЬ ОСЕЙ РЕГУЛЯЦИИ".to_string(),
    ];

    for key in ["A1", "A2", "A3", "A4"] {
        let val = axis_v[key].as_f64().unwrap_or(0.0);
        let (name, label) = axis_profile(key, val);
        lines.push(format!("  {name} ({key}): {val:+.3} — {label}"));
    }

    lines.push(String::new());
    lines.push("▸ ДОМИНИРУЮЩИЕ СЛОИ".to_string());
    let mut layer_pairs: Vec<(&str, f64)> = ["L0", "L1", "L2", "L3", "L4"]
        .iter()
        .map(|key| (*key, layer_v[*key].as_f64().unwrap_or(0.0)))
        .collect();
    layer_pairs.sort_by(|a, b| b.1.abs().partial_cmp(&a.1.abs()).unwrap_or(std::cmp::Ordering::Equal));
    for (i, (lkey, lval)) in layer_pairs.into_iter().enumerate() {
        let rank = i + 1;
        let name = layer_name(lkey);
        lines.push(format!("  {rank}. {name} ({lkey}): {lval:+.3}"));
    }

    lines.push(String::new());
    lines.push("▸ КЛЮЧЕВЫЕ СОЧЕТАНИЯ".to_string());
    for (i, cell) in dominant.iter().take(3).enumerate() {
        let rank = i + 1;
        let cell_val = tension[cell.as_str()].as_f64().unwrap_or(0.0);
        lines.push(format!("  {rank}. {cell}: {cell_val:+.3}"));
    }

    let rig_total = rigidity["total"].as_f64().unwrap_or(0.0);
    let rig_label = rigidity_label(rig_total);
    let rig_pol = rigidity["polarization"].as_f64().unwrap_or(0.0);
    let rig_var = rigidity["low_variance"].as_f64().unwrap_or(0.0);
    let rig_rep = rigidity["strategy_repetition"].as_f64().unwrap_or(0.0);
    lines.push(String::new());
    lines.push("▸ ИНДЕКС ГИБКОСТИ".to_string());
    lines.push(format!("  Ригидность: {rig_label} ({rig_total:.2})"));
    lines.push(format!(
        "  Поляризация: {rig_pol:.2} | Стабильность: {rig_var:.2} | Повторяемость: {rig_rep:.2}"
    ));
    lines.push(String::new());
    lines.push(format!("▸ УВЕРЕННОСТЬ: {:.0}%", confidence * 100.0));
    lines.push(String::new());
    lines.push("▸ ПОЯСНЕНИЕ".to_string());
    lines.push(structural.to_string());

    lines.push(String::new());
    lines.push("▸ ОРИЕНТИРЫ ДЛЯ ПЕРВОЙ СЕССИИ".to_string());
    if let Some(obj) = protocol.as_object() {
        for (section_key, section_label) in [
            ("axis_verification", "Верификация осей"),
            ("layer_exploration", "Исследование слоёв"),
            ("functional_context", "Функциональный контекст"),
        ] {
            if let Some(questions) = obj.get(section_key).and_then(Value::as_array) {
                if !questions.is_empty() {
                    lines.push(format!("\n  {section_label}:"));
                    for q in questions.iter().filter_map(Value::as_str) {
                        lines.push(format!("    • {q}"));
                    }
                }
            }
        }
    } else if let Some(s) = protocol.as_str() {
        lines.push(s.to_string());
    }

    lines.push(String::new());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report_json() -> Value {
        json!({
            "assessment_id": Uuid::nil(),
            "timestamp": "2026-03-05T10:00:00+00:00",
            "axis_vector": {"A1": -0.5, "A2": 0.1, "A3": 0.4, "A4": -0.05},
            "layer_vector": {"L0": 0.1, "L1": 0.2, "L2": 0.6, "L3": -0.05, "L4": 0.5},
            "tension_matrix": {"L2_A1": 0.4, "L4_A3": 0.35, "L1_A2": 0.1},
            "dominant_cells": ["L2_A1", "L4_A3", "L1_A2"],
            "rigidity": {"polarization": 0.2, "low_variance": 0.4, "strategy_repetition": 0.1, "total": 0.25},
            "confidence": 0.72,
            "phases": {"phase1_questions": 6, "phase2_questions": 2, "phase3_questions": 0},
            "structural_report": "Структурный профиль демонстрирует выраженную активацию аффективного слоя.",
            "interview_protocol": {
                "axis_verification": ["Как вы описали бы своё состояние в последние недели?"],
                "layer_exploration": [],
                "functional_context": ["В каких ситуациях это проявляется сильнее всего?"],
            },
        })
    }

    #[test]
    fn formats_axis_profile_dominant_layers_and_confidence() {
        let text = format_report_txt(&sample_report_json());
        assert!(text.contains("Активация (A1): -0.500 — сниженная"));
        assert!(text.contains("▸ ДОМИНИРУЮЩИЕ СЛОИ"));
        assert!(text.contains("1. Аффективный (L2): +0.600"));
        assert!(text.contains("▸ УВЕРЕННОСТЬ: 72%"));
        assert!(text.contains("Ригидность: low (0.25)"));
    }

    #[test]
    fn renders_only_non_empty_interview_protocol_sections() {
        let text = format_report_txt(&sample_report_json());
        assert!(text.contains("Верификация осей:"));
        assert!(text.contains("Функциональный контекст:"));
        assert!(!text.contains("Исследование слоёв:"));
    }

    #[test]
    fn falls_back_to_raw_date_slice_when_timestamp_is_not_iso() {
        let mut report = sample_report_json();
        report["timestamp"] = json!("not-a-date");
        let text = format_report_txt(&report);
        assert!(text.contains("Дата: not-a-date"));
    }

    #[test]
    fn renders_string_interview_protocol_verbatim() {
        let mut report = sample_report_json();
        report["interview_protocol"] = json!("оракул недоступен");
        let text = format_report_txt(&report);
        assert!(text.contains("оракул недоступен"));
    }
}
