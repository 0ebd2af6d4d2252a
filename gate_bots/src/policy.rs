//! Interpreter policy engine: validates and repairs interpretation output
//! against safety rules (diagnostic language, trauma claims, pathologising
//! language, uncertainty requirements, mode constraints).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub critical_count: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone)]
pub struct RepairReport {
    pub repaired: bool,
    pub changes: Vec<&'static str>,
}

static DIAGNOSTIC_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bPTSD\b",
        r"(?i)\bдепресси[яи]\b",
        r"(?i)\bтревожн\w+ расстройств\w+",
        r"(?i)\bОКР\b",
        r"(?i)\bбиполярн\w+",
        r"(?i)\bшизофрени\w+",
        r"(?i)\bдиагноз\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static TRAUMA_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(явно|очевидно|определённо) травм\w+",
        r"(?i)\bтравма присутствует\b",
        r"(?i)\bбыл\w* травмирован\w*",
        r"(?i)\bдетская травма\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

static PATHOLOGY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bдисфункциональн\w+",
        r"(?i)\bмаладаптивн\w+",
        r"(?i)\bпатологическ\w+",
        r"(?i)\bсломан\w+",
        r"(?i)\bповрежд[её]нн\w+",
        r"(?i)\bненормальн\w+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

const DIAGNOSTIC_REPLACEMENTS: &[(&str, &str)] = &[
    ("PTSD", "паттерны, которые могут относиться к непереработанным сложным переживаниям"),
    ("депрессия", "состояния сниженного настроения"),
    ("депрессии", "состояний сниженного настроения"),
    ("тревожное расстройство", "паттерны повышенной тревоги"),
    ("ОКР", "повторяющиеся паттерны мыслей и поведения"),
    ("биполярное", "вариативность настроения"),
    ("шизофрения", "сложности обработки реальности"),
    ("диагноз", "наблюдаемые паттерны"),
];

const PATHOLOGY_REPLACEMENTS: &[(&str, &str)] = &[
    ("дисфункциональный", "находящийся под напряжением"),
    ("дисфункциональная", "находящаяся под напряжением"),
    ("маладаптивный", "не служащий в настоящее время"),
    ("маладаптивная", "не служащая в настоящее время"),
    ("патологический", "заметный паттерн"),
    ("патологическая", "заметная структура"),
    ("сломанный", "фрагментированный"),
    ("сломанная", "фрагментированная"),
    ("повреждённый", "затронутый"),
    ("повреждённая", "затронутая"),
    ("ненормальный", "атипичный"),
    ("ненормальная", "атипичная"),
];

const MAX_REPAIR_ATTEMPTS: u32 = 2;

pub struct PolicyEngine;

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    pub fn validate(&self, output: &Value) -> ValidationResult {
        let violations: Vec<Violation> = [
            Self::check_hypothesis_count(output),
            Self::check_diagnostic_language(output),
            Self::check_trauma_claims(output),
            Self::check_pathology_language(output),
            Self::check_uncertainty(output),
            Self::check_mode_constraints(output),
        ]
        .into_iter()
        .flatten()
        .collect();

        let critical_count = violations.iter().filter(|v| v.severity == Severity::Critical).count();
        let error_count = violations.iter().filter(|v| v.severity == Severity::Error).count();

        ValidationResult { valid: violations.is_empty(), violations, critical_count, error_count }
    }

    /// Applies every repair corresponding to a violation, then relies on
    /// the caller to re-validate. Mirrors the single-pass repair map; the
    /// two-attempt cap lives in the handler's repair loop.
    pub fn repair(&self, output: &Value, validation: &ValidationResult) -> (Value, RepairReport) {
        if validation.valid {
            return (output.clone(), RepairReport { repaired: false, changes: Vec::new() });
        }

        let mut repaired = output.clone();
        let mut changes = Vec::new();

        for violation in &validation.violations {
            match violation.rule_id {
                "R001" => {
                    Self::repair_hypothesis_count(&mut repaired);
                    changes.push("Reduced hypothesis count");
                }
                "R002" => {
                    Self::repair_diagnostic_language(&mut repaired);
                    changes.push("Removed diagnostic language");
                }
                "R003" => {
                    Self::repair_trauma_claims(&mut repaired);
                    changes.push("Added modality to trauma statements");
                }
                "R004" => {
                    Self::repair_pathology_language(&mut repaired);
                    changes.push("Neutralised pathology language");
                }
                "R006" => {
                    Self::repair_uncertainty(&mut repaired);
                    changes.push("Enhanced uncertainty profile");
                }
                "R010" => {
                    Self::repair_mode_constraints(&mut repaired);
                    changes.push("Enforced mode constraints");
                }
                _ => {}
            }
        }

        if let Some(flags) = repaired.get_mut("policy_flags").and_then(Value::as_object_mut) {
            flags.insert("repair_applied".to_string(), Value::Bool(true));
            let violations: Vec<Value> = validation
                .violations
                .iter()
                .map(|v| {
                    serde_json::json!({
                        "rule": v.rule_id,
                        "severity": if v.severity == Severity::Critical { "CRITICAL" } else { "ERROR" },
                    })
                })
                .collect();
            flags.insert("violations".to_string(), Value::Array(violations));
        }

        (repaired, RepairReport { repaired: true, changes })
    }

    /// Validates, repairs, and re-validates up to `MAX_REPAIR_ATTEMPTS`
    /// times; returns the final (possibly still-invalid) output.
    pub fn validate_and_repair(&self, output: Value) -> (Value, ValidationResult) {
        let mut current = output;
        let mut validation = self.validate(&current);
        let mut attempts = 0;
        while !validation.valid && attempts < MAX_REPAIR_ATTEMPTS {
            let (repaired, _) = self.repair(&current, &validation);
            current = repaired;
            validation = self.validate(&current);
            attempts += 1;
        }
        (current, validation)
    }

    fn check_hypothesis_count(output: &Value) -> Option<Violation> {
        let mode = output["meta"]["mode"].as_str().unwrap_or("STANDARD");
        let count = output["interpretative_hypotheses"].as_array().map_or(0, Vec::len);
        let max_allowed = if mode == "LOW_DATA" { 1 } else { 3 };

        if count > max_allowed {
            return Some(Violation {
                rule_id: "R001",
                severity: Severity::Error,
                message: format!("Hypothesis count {count} exceeds {max_allowed} for {mode} mode"),
            });
        }
        None
    }

    fn check_diagnostic_language(output: &Value) -> Option<Violation> {
        let count = Self::count_pattern_hits(output, &DIAGNOSTIC_PATTERNS);
        (count > 0).then(|| Violation {
            rule_id: "R002",
            severity: Severity::Critical,
            message: format!("Diagnostic language detected ({count} instances)"),
        })
    }

    fn check_trauma_claims(output: &Value) -> Option<Violation> {
        let empty = [];
        let count = output["interpretative_hypotheses"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .map(|h| h["hypothesis_text"].as_str().unwrap_or(""))
            .flat_map(|text| TRAUMA_PATTERNS.iter().filter(move |p| p.is_match(text)))
            .count();
        (count > 0).then(|| Violation {
            rule_id: "R003",
            severity: Severity::Error,
            message: format!("Definitive trauma claims ({count} instances)"),
        })
    }

    fn check_pathology_language(output: &Value) -> Option<Violation> {
        let count = Self::count_pattern_hits(output, &PATHOLOGY_PATTERNS);
        (count > 0).then(|| Violation {
            rule_id: "R004",
            severity: Severity::Error,
            message: format!("Pathology language detected ({count} instances)"),
        })
    }

    fn count_pattern_hits(output: &Value, patterns: &[Regex]) -> usize {
        let empty = [];
        output["interpretative_hypotheses"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .map(|h| format!("{} {}", h["hypothesis_text"].as_str().unwrap_or(""), h["limitations"].as_str().unwrap_or("")))
            .map(|text| patterns.iter().filter(|p| p.is_match(&text)).count())
            .sum()
    }

    fn check_uncertainty(output: &Value) -> Option<Violation> {
        let profile = &output["uncertainty_profile"];
        if profile["overall_confidence"].as_str() == Some("high") {
            let no_gaps = profile["data_gaps"].as_array().is_none_or(Vec::is_empty);
            let no_ambiguities = profile["ambiguities"].as_array().is_none_or(Vec::is_empty);
            if no_gaps && no_ambiguities {
                return Some(Violation {
                    rule_id: "R006",
                    severity: Severity::Error,
                    message: "High confidence without substantive uncertainty".to_string(),
                });
            }
        }
        None
    }

    fn check_mode_constraints(output: &Value) -> Option<Violation> {
        let mode = output["meta"]["mode"].as_str().unwrap_or("STANDARD");
        if mode != "LOW_DATA" {
            return None;
        }

        let mut bad = false;
        let count = output["interpretative_hypotheses"].as_array().map_or(0, Vec::len);
        if count > 1 {
            bad = true;
        }
        if output["uncertainty_profile"]["overall_confidence"].as_str() != Some("low") {
            bad = true;
        }

        bad.then(|| Violation {
            rule_id: "R010",
            severity: Severity::Critical,
            message: "LOW_DATA mode constraints violated".to_string(),
        })
    }

    fn repair_hypothesis_count(output: &mut Value) {
        let mode = output["meta"]["mode"].as_str().unwrap_or("STANDARD").to_string();
        let max_allowed = if mode == "LOW_DATA" { 1 } else { 3 };
        if let Some(hyps) = output.get_mut("interpretative_hypotheses").and_then(Value::as_array_mut) {
            hyps.truncate(max_allowed);
        }
    }

    fn repair_diagnostic_language(output: &mut Value) {
        Self::apply_replacements(output, DIAGNOSTIC_REPLACEMENTS);
        Self::set_flag(output, "contains_diagnosis", false);
    }

    fn repair_trauma_claims(output: &mut Value) {
        if let Some(hyps) = output.get_mut("interpretative_hypotheses").and_then(Value::as_array_mut) {
            for hyp in hyps {
                if let Some(text) = hyp.get("hypothesis_text").and_then(Value::as_str) {
                    let replaced = text
                        .replace("травма присутствует", "потенциально сложные переживания могут присутствовать")
                        .replace("явно травм", "потенциально значимые переживания")
                        .replace("очевидно травм", "потенциально значимые переживания");
                    hyp["hypothesis_text"] = Value::String(replaced);
                }
            }
        }
        Self::set_flag(output, "contains_trauma_claim", false);
    }

    fn repair_pathology_language(output: &mut Value) {
        Self::apply_replacements(output, PATHOLOGY_REPLACEMENTS);
        Self::set_flag(output, "contains_pathology_language", false);
    }

    fn apply_replacements(output: &mut Value, table: &[(&str, &str)]) {
        if let Some(hyps) = output.get_mut("interpretative_hypotheses").and_then(Value::as_array_mut) {
            for hyp in hyps {
                if let Some(text) = hyp.get("hypothesis_text").and_then(Value::as_str) {
                    let mut replaced = text.to_string();
                    for (term, replacement) in table {
                        replaced = replace_word_case_insensitive(&replaced, term, replacement);
                    }
                    hyp["hypothesis_text"] = Value::String(replaced);
                }
            }
        }
    }

    fn repair_uncertainty(output: &mut Value) {
        if let Some(profile) = output.get_mut("uncertainty_profile").and_then(Value::as_object_mut) {
            if profile.get("data_gaps").and_then(Value::as_array).is_none_or(Vec::is_empty) {
                profile.insert(
                    "data_gaps".to_string(),
                    serde_json::json!([
                        "Текущие жизненные обстоятельства клиента",
                        "Исторический контекст символических элементов",
                        "Феноменологические детали субъективного опыта",
                    ]),
                );
            }
            if profile.get("ambiguities").and_then(Value::as_array).is_none_or(Vec::is_empty) {
                profile.insert(
                    "ambiguities".to_string(),
                    serde_json::json!([
                        "Символические значения культурно и персонально вариативны",
                        "Существуют множественные валидные интерпретации этого материала",
                    ]),
                );
            }
            if profile.get("overall_confidence").and_then(Value::as_str) == Some("high") {
                profile.insert("overall_confidence".to_string(), Value::String("moderate".to_string()));
            }
        }
        Self::set_flag(output, "uncertainty_present", true);
    }

    fn repair_mode_constraints(output: &mut Value) {
        if output["meta"]["mode"].as_str() == Some("LOW_DATA") {
            if let Some(hyps) = output.get_mut("interpretative_hypotheses").and_then(Value::as_array_mut) {
                if hyps.len() > 1 {
                    hyps.truncate(1);
                }
            }
            if let Some(profile) = output.get_mut("uncertainty_profile").and_then(Value::as_object_mut) {
                profile.insert("overall_confidence".to_string(), Value::String("low".to_string()));
            }
        }
    }

    fn set_flag(output: &mut Value, key: &str, value: bool) {
        if let Some(flags) = output.get_mut("policy_flags").and_then(Value::as_object_mut) {
            flags.insert(key.to_string(), Value::Bool(value));
        }
    }
}

fn replace_word_case_insensitive(text: &str, term: &str, replacement: &str) -> String {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
    Regex::new(&pattern).map_or_else(|_| text.to_string(), |re| re.replace_all(text, replacement).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_diagnostic_language_as_critical() {
        let output = serde_json::json!({
            "meta": {"mode": "STANDARD"},
            "interpretative_hypotheses": [{"hypothesis_text": "Похоже на PTSD", "limitations": ""}],
            "uncertainty_profile": {"overall_confidence": "moderate"},
        });
        let result = PolicyEngine::new().validate(&output);
        assert!(!result.valid);
        assert_eq!(result.critical_count, 1);
        assert!(result.violations.iter().any(|v| v.rule_id == "R002"));
    }

    #[test]
    fn repairs_diagnostic_term_and_reports_applied() {
        let output = serde_json::json!({
            "meta": {"mode": "STANDARD"},
            "interpretative_hypotheses": [{"hypothesis_text": "Похоже на PTSD", "limitations": ""}],
            "uncertainty_profile": {"overall_confidence": "moderate"},
            "policy_flags": {},
        });
        let engine = PolicyEngine::new();
        let (repaired, validation) = engine.validate_and_repair(output);
        assert!(validation.valid);
        assert!(repaired["policy_flags"]["repair_applied"].as_bool().unwrap());
        assert!(!repaired["interpretative_hypotheses"][0]["hypothesis_text"]
            .as_str()
            .unwrap()
            .contains("PTSD"));
    }

    #[test]
    fn caps_hypotheses_at_one_for_low_data_mode() {
        let output = serde_json::json!({
            "meta": {"mode": "LOW_DATA"},
            "interpretative_hypotheses": [{"hypothesis_text": "a", "limitations": ""}, {"hypothesis_text": "b", "limitations": ""}],
            "uncertainty_profile": {"overall_confidence": "low"},
        });
        let result = PolicyEngine::new().validate(&output);
        assert!(result.violations.iter().any(|v| v.rule_id == "R001"));
        assert!(result.violations.iter().any(|v| v.rule_id == "R010"));
    }
}
