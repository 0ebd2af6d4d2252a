//! Simulator bot: role-play a client against a specialist, track the
//! hidden regulatory state, and close the session with a TSI/CCI
//! analytical report and a rolling per-specialist profile update.
//!
//! FSM states:
//!   `setup`    — mode/case/goal (or upload/crisis/goal) selection via buttons
//!   `active`   — session running; specialist messages go to the oracle
//!   `complete` — report sent, session closed

use crate::{Handler, HandlerContext, Incoming, KeyboardButton, OutgoingMessage};
use async_trait::async_trait;
use gate_store::specialist_profile::SessionSignals;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const BOT_ID: &str = "simulator";
const MODEL: &str = "claude-sonnet-4-5-20250929";
const MAX_SESSION_HISTORY: usize = 50;

// ───────────────────────────────────────────────────────────────────────────
// Case bank (representative subset — full weight-tuned bank is out of scope)
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Moderate,
    High,
}

impl Level {
    fn weight(self) -> f64 {
        match self {
            Self::Low => 0.25,
            Self::Moderate => 0.5,
            Self::High => 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    Narrow,
    Moderate,
    Wide,
}

impl Width {
    fn weight(self) -> f64 {
        match self {
            Self::Narrow => 0.75,
            Self::Moderate => 0.5,
            Self::Wide => 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Slow,
    Moderate,
    Fast,
}

impl Speed {
    fn weight(self) -> f64 {
        match self {
            Self::Slow => 0.25,
            Self::Moderate => 0.5,
            Self::Fast => 0.75,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseDynamics {
    pub baseline_tension_l0: i32,
    pub l0_reactivity: Level,
    pub l3_accessibility: Level,
    pub escalation_speed: Speed,
    pub intervention_range: Width,
    pub volatility: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CciComponents {
    pub baseline_l0: f64,
    pub volatility: f64,
    pub layer_depth: f64,
    pub cascade_risk: f64,
    pub intervention_window: f64,
}

impl CciComponents {
    pub fn cci(&self) -> f64 {
        round2(
            self.baseline_l0 * 0.25
                + self.volatility * 0.15
                + self.layer_depth * 0.20
                + self.cascade_risk * 0.25
                + self.intervention_window * 0.15,
        )
    }
}

pub fn compute_cci(dynamics: &CaseDynamics) -> CciComponents {
    let cascade_risk = round2((dynamics.escalation_speed.weight() + dynamics.l0_reactivity.weight()) / 2.0);
    CciComponents {
        baseline_l0: round2(f64::from(dynamics.baseline_tension_l0) / 100.0),
        volatility: dynamics.volatility,
        layer_depth: round2(1.0 - dynamics.l3_accessibility.weight()),
        cascade_risk,
        intervention_window: dynamics.intervention_range.weight(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CrisisFlag {
    None,
    Moderate,
    High,
}

impl CrisisFlag {
    fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Self::None => "⚪",
            Self::Moderate => "🟡",
            Self::High => "🔴",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "MODERATE" => Self::Moderate,
            "HIGH" => Self::High,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinCase {
    pub case_id: String,
    pub case_name: String,
    pub difficulty: String,
    pub client_gender: String,
    pub client_age: u8,
    pub presenting_complaints: Vec<String>,
    pub layer_brief: String,
    pub dynamics: CaseDynamics,
    pub crisis_flag: CrisisFlag,
}

impl BuiltinCase {
    fn cci(&self) -> CciComponents {
        compute_cci(&self.dynamics)
    }
}

fn builtin_cases() -> Vec<(&'static str, BuiltinCase)> {
    vec![
        (
            "1",
            BuiltinCase {
                case_id: "case_neurotic_conflict".to_string(),
                case_name: "Невротический конфликт: перфекционизм и выгорание".to_string(),
                difficulty: "умеренная".to_string(),
                client_gender: "женский".to_string(),
                client_age: 34,
                presenting_complaints: vec!["хроническая усталость".to_string(), "тревога перед дедлайнами".to_string()],
                layer_brief: "L0: истощение, нарушение сна. L1: автоматическое перепроверяние работы. \
                    L2: осознанный выбор работать сверхурочно. L3: роль «незаменимого сотрудника». \
                    L4: идентичность через достижения. Доминирующий конфликт: L4→L0 (идентичность требует \
                    мобилизации сверх ресурса)."
                    .to_string(),
                dynamics: CaseDynamics {
                    baseline_tension_l0: 55,
                    l0_reactivity: Level::Moderate,
                    l3_accessibility: Level::Moderate,
                    escalation_speed: Speed::Moderate,
                    intervention_range: Width::Moderate,
                    volatility: 0.35,
                },
                crisis_flag: CrisisFlag::None,
            },
        ),
        (
            "2",
            BuiltinCase {
                case_id: "case_acute_crisis".to_string(),
                case_name: "Острая кризисная динамика: утрата и дереализация".to_string(),
                difficulty: "высокая".to_string(),
                client_gender: "мужской".to_string(),
                client_age: 27,
                presenting_complaints: vec!["эпизоды дереализации".to_string(), "суицидальные мысли без плана".to_string()],
                layer_brief: "L0: острая активация, нарушение витальных функций. L1: диссоциативные реакции. \
                    L2: слабый сознательный контроль. L3: социальная изоляция. L4: утрата смысла после тяжёлой \
                    потери. Доминирующий конфликт: L0↔L4 (витальная тревога разрушает удержание смысла)."
                    .to_string(),
                dynamics: CaseDynamics {
                    baseline_tension_l0: 85,
                    l0_reactivity: Level::High,
                    l3_accessibility: Level::Low,
                    escalation_speed: Speed::Fast,
                    intervention_range: Width::Narrow,
                    volatility: 0.75,
                },
                crisis_flag: CrisisFlag::High,
            },
        ),
    ]
}

fn find_case(case_key: &str) -> Option<BuiltinCase> {
    builtin_cases().into_iter().find(|(k, _)| *k == case_key).map(|(_, c)| c)
}

fn case_by_id(case_id: &str) -> Option<BuiltinCase> {
    builtin_cases().into_iter().find(|(_, c)| c.case_id == case_id).map(|(_, c)| c)
}

// ───────────────────────────────────────────────────────────────────────────
// Goals / modes (labels ported verbatim from the Russian UI copy)
// ───────────────────────────────────────────────────────────────────────────

const GOALS: &[(&str, &str)] = &[
    ("CONTACT_STABILIZATION", "Установление контакта и стабилизация"),
    ("DIAGNOSTIC_CLARIFICATION", "Диагностическое уточнение"),
    ("SYMPTOM_WORK", "Работа с симптомом"),
    ("REGULATORY_CONFLICT", "Работа с регуляторным конфликтом"),
    ("COGNITIVE_RESTRUCTURING", "Когнитивная реструктуризация"),
    ("AFFECT_WORK", "Работа с аффектом"),
    ("CRISIS_SUPPORT", "Поддержка в кризисе"),
    ("THERAPY_TERMINATION", "Завершение терапии"),
];

fn goal_label(value: &str) -> &str {
    GOALS.iter().find(|(v, _)| *v == value).map_or(value, |(_, l)| *l)
}

fn mode_label(value: &str) -> &'static str {
    match value {
        "PRACTICE" => "🏋️ Тренировка (только сигнал)",
        _ => "🎓 Обучение (сигнал + объяснение)",
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Runtime session state
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiddenState {
    pub tension_l0: i32,
    pub cognitive_access: i32,
    pub uncertainty_index: i32,
    pub trust_level: i32,
    pub defense_activation: i32,
    pub active_layer: String,
}

impl Default for HiddenState {
    fn default() -> Self {
        Self { tension_l0: 40, cognitive_access: 68, uncertainty_index: 65, trust_level: 30, defense_activation: 40, active_layer: "L0".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltaValues {
    pub trust: i32,
    pub tension_l0: i32,
    pub uncertainty: i32,
    pub defense_activation: i32,
    pub cognitive_access: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationLog {
    pub replica_id: u32,
    pub specialist_input: String,
    pub active_layer_before: String,
    pub signal: String,
    pub signal_reason: String,
    pub regulatory_match_score: f64,
    pub delta: DeltaValues,
    pub cascade_probability: f64,
    pub crisis_warning: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TsiComponents {
    pub r_match: f64,
    pub l_consistency: f64,
    pub alliance_score: f64,
    pub uncertainty_modulation: f64,
    pub therapist_reactivity: f64,
}

impl TsiComponents {
    pub fn tsi(&self) -> f64 {
        round2(
            self.r_match * 0.25
                + self.l_consistency * 0.20
                + self.alliance_score * 0.20
                + self.uncertainty_modulation * 0.20
                + (1.0 - self.therapist_reactivity) * 0.15,
        )
    }

    pub fn interpretation(&self) -> &'static str {
        let t = self.tsi();
        if t >= 0.85 {
            "высокая устойчивость"
        } else if t >= 0.70 {
            "функциональная"
        } else if t >= 0.50 {
            "нестабильная"
        } else {
            "риск каскада"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub case_id: String,
    pub case_name: String,
    pub mode: String,
    pub session_goal: String,
    pub crisis_flag: String,
    pub fsm_state: String,
    pub hidden_state: HiddenState,
    pub messages: Vec<ChatTurn>,
    pub signal_log: Vec<String>,
    pub fsm_log: Vec<String>,
    pub iteration_log: Vec<IterationLog>,
}

// ───────────────────────────────────────────────────────────────────────────
// Claude response parsing (regex-driven, mirrors the supervisor block the
// system prompt asks the oracle to emit)
// ───────────────────────────────────────────────────────────────────────────

static SPLIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n-{3,}\n").unwrap());
static SIGNAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SIGNAL:\s*(🟢|🟡|🔴)").unwrap());
static FSM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"SUPERVISOR\s*\[S(\d)").unwrap());
static LAYER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ACTIVE_LAYER:\s*(L\d)").unwrap());
static MATCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"MATCH:\s*([\d.]+)").unwrap());
static CASCADE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CASCADE_PROB:\s*([\d.]+)").unwrap());
static DELTA_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"DELTA:\s*trust=([+\-]?\d+)\s+tension_L0=([+\-]?\d+)\s+uncertainty=([+\-]?\d+)\s+defense=([+\-]?\d+)\s+cognitive=([+\-]?\d+)",
    )
    .unwrap()
});

#[derive(Debug, Clone, Default)]
struct ParsedResponse {
    client_text: String,
    supervisor_block: String,
    signal: String,
    fsm_state: String,
    active_layer: String,
    match_score: f64,
    cascade_prob: f64,
    delta: DeltaValues,
    crisis_warning: bool,
    signal_reason: String,
}

fn parse_claude_response(raw: &str) -> ParsedResponse {
    let mut result = ParsedResponse::default();

    let Some(split) = SPLIT_RE.find(raw) else {
        result.client_text = raw.trim().to_string();
        return result;
    };
    result.client_text = raw[..split.start()].trim().to_string();
    let supervisor_raw = raw[split.end()..].trim();
    let supervisor_raw = supervisor_raw.trim_end_matches(|c: char| c == '-' || c.is_whitespace());
    result.supervisor_block = supervisor_raw.to_string();

    let block = result.supervisor_block.clone();

    if let Some(c) = SIGNAL_RE.captures(&block) {
        result.signal = c[1].to_string();
    }
    if let Some(c) = FSM_RE.captures(&block) {
        result.fsm_state = format!("S{}", &c[1]);
    }
    if let Some(c) = LAYER_RE.captures(&block) {
        result.active_layer = c[1].to_string();
    }
    if let Some(c) = MATCH_RE.captures(&block) {
        result.match_score = c[1].parse().unwrap_or(0.0);
    }
    if let Some(c) = CASCADE_RE.captures(&block) {
        result.cascade_prob = c[1].parse().unwrap_or(0.0);
    }
    if let Some(c) = DELTA_RE.captures(&block) {
        result.delta = DeltaValues {
            trust: c[1].parse().unwrap_or(0),
            tension_l0: c[2].parse().unwrap_or(0),
            uncertainty: c[3].parse().unwrap_or(0),
            defense_activation: c[4].parse().unwrap_or(0),
            cognitive_access: c[5].parse().unwrap_or(0),
        };
    }

    result.crisis_warning = block.contains("CRISIS WARNING");

    let mut reason_lines = Vec::new();
    let mut started = false;
    for line in block.lines() {
        let stripped = line.trim();
        if ["📊", "SIGNAL:", "ACTIVE_LAYER:", "MATCH:", "CASCADE_PROB:", "DELTA:", "⚠️"]
            .iter()
            .any(|prefix| stripped.starts_with(prefix))
        {
            started = true;
            continue;
        }
        if started && !stripped.is_empty() && !stripped.starts_with("---") {
            reason_lines.push(stripped);
        }
    }
    result.signal_reason = reason_lines.into_iter().take(2).collect::<Vec<_>>().join(" ");

    result
}

fn build_iteration_log(parsed: &ParsedResponse, replica_id: u32, specialist_input: &str) -> IterationLog {
    IterationLog {
        replica_id,
        specialist_input: specialist_input.chars().take(200).collect(),
        active_layer_before: parsed.active_layer.clone(),
        signal: parsed.signal.clone(),
        signal_reason: parsed.signal_reason.chars().take(300).collect(),
        regulatory_match_score: parsed.match_score,
        delta: parsed.delta.clone(),
        cascade_probability: parsed.cascade_prob,
        crisis_warning: parsed.crisis_warning,
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn format_for_telegram(parsed: &ParsedResponse) -> String {
    let mut parts = vec![format!("🗣 <b>Клиент:</b>\n{}", escape_html(&parsed.client_text))];
    if !parsed.supervisor_block.is_empty() {
        parts.push(format!("\n{}\n{}", "─".repeat(30), escape_html(&parsed.supervisor_block)));
    }
    if parsed.crisis_warning {
        parts.push("\n🚨 <b>CRISIS WARNING</b> — Рекомендуется стабилизация L0".to_string());
    }
    parts.join("\n")
}

fn split_text(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let char_count = remaining.chars().count();
        if char_count <= max_len {
            chunks.push(remaining.to_string());
            break;
        }
        let boundary_char = max_len;
        let byte_idx = remaining.char_indices().nth(boundary_char).map_or(remaining.len(), |(i, _)| i);
        let split_at = remaining[..byte_idx].rfind('\n').unwrap_or(byte_idx);
        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start_matches('\n');
    }
    chunks
}

// ───────────────────────────────────────────────────────────────────────────
// System prompts
// ───────────────────────────────────────────────────────────────────────────

fn build_system_prompt(case: &BuiltinCase, goal_value: &str, mode_value: &str) -> String {
    let explain = if mode_value == "PRACTICE" {
        "Режим тренировки: выдавай ТОЛЬКО структурированный блок супервизора, без объяснений динамики в тексте клиента."
    } else {
        "Режим обучения: в блоке супервизора кратко поясняй, почему сработал тот или иной сигнал."
    };

    format!(
        "Ты симулируешь клиента в психотерапевтической ролевой сессии по фреймворку PsycheOS.\n\n\
         # Профиль клиента\n\
         {}, {} лет. Жалобы: {}.\n\
         Сложность кейса: {}. Кризисный флаг: {}.\n\n\
         # Карта слоёв (L0–L4)\n\
         {}\n\n\
         # Скрытые переменные (не раскрывай их напрямую)\n\
         tension_L0, cognitive_access, uncertainty_index, trust_level, defense_activation — \
         меняются по ходу диалога в зависимости от того, насколько реплика специалиста попадает \
         в активный слой клиента.\n\n\
         # Цель сессии специалиста\n\
         {}\n\n\
         {explain}\n\n\
         # Формат ответа — ОБЯЗАТЕЛЬНО в двух блоках, разделённых строкой из трёх и более дефисов:\n\
         1. Реплика клиента от первого лица — живая, без терминологии.\n\
         2. Блок супервизора строго в следующем формате:\n\
         SUPERVISOR [S<1-7>]\n\
         SIGNAL: 🟢|🟡|🔴\n\
         ACTIVE_LAYER: L<0-4>\n\
         MATCH: 0.00-1.00\n\
         CASCADE_PROB: 0.00-1.00\n\
         DELTA: trust=±N tension_L0=±N uncertainty=±N defense=±N cognitive=±N\n\
         (если риск острый) ⚠️ CRISIS WARNING\n\
         Краткое пояснение сигнала (1-2 строки).\n\n\
         Не выходи из роли клиента в первом блоке ни при каких обстоятельствах.",
        case.client_gender,
        case.client_age,
        case.presenting_complaints.join(", "),
        case.difficulty,
        case.crisis_flag.as_str(),
        case.layer_brief,
        goal_label(goal_value),
    )
}

fn build_report_prompt() -> &'static str {
    "Сессия завершена. На основе всего диалога сформируй аналитический отчёт для специалиста.\n\n\
     Структура отчёта (свободный текст, без JSON):\n\
     1. Динамика по слоям L0–L4 в ходе сессии.\n\
     2. Ключевые точки эскалации и деэскалации.\n\
     3. Оценка терапевтической позиции специалиста: что сработало, что создавало риск каскада.\n\
     4. Рекомендации для дальнейшей работы.\n\n\
     В конце ОБЯЗАТЕЛЬНО выведи пять компонентов индекса устойчивости терапевтической позиции \
     (Therapist Stability Index), каждый числом от 0.00 до 1.00, каждый на отдельной строке:\n\
     R_match: 0.00\n\
     L_consistency: 0.00\n\
     Alliance_score: 0.00\n\
     Uncertainty_modulation: 0.00\n\
     Therapist_reactivity: 0.00"
}

fn parse_tsi_from_report(report_text: &str) -> Option<TsiComponents> {
    fn extract(re: &Regex, text: &str) -> f64 {
        re.captures(text).and_then(|c| c[1].parse().ok()).unwrap_or(0.0)
    }
    static R_MATCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"R_match:\s*([\d.]+)").unwrap());
    static L_CONS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"L_consistency:\s*([\d.]+)").unwrap());
    static ALLIANCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Alliance_score:\s*([\d.]+)").unwrap());
    static UNC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Uncertainty_modulation:\s*([\d.]+)").unwrap());
    static REACT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Therapist_reactivity:\s*([\d.]+)").unwrap());

    let r_match = extract(&R_MATCH_RE, report_text);
    let l_cons = extract(&L_CONS_RE, report_text);
    let alliance = extract(&ALLIANCE_RE, report_text);
    let unc_mod = extract(&UNC_RE, report_text);
    let reactivity = extract(&REACT_RE, report_text);

    let found = [r_match, l_cons, alliance, unc_mod, reactivity].iter().filter(|v| **v > 0.0).count();
    if found < 3 {
        tracing::warn!("TSI parsing: fewer than 3 components found in report");
        return None;
    }

    Some(TsiComponents {
        r_match: r_match.min(1.0),
        l_consistency: l_cons.min(1.0),
        alliance_score: alliance.min(1.0),
        uncertainty_modulation: unc_mod.min(1.0),
        therapist_reactivity: reactivity.min(1.0),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ───────────────────────────────────────────────────────────────────────────
// Keyboards
// ───────────────────────────────────────────────────────────────────────────

fn mode_keyboard() -> Vec<Vec<KeyboardButton>> {
    vec![
        vec![KeyboardButton { label: "🎓 Обучение — готовые кейсы".to_string(), callback_data: "mode:TRAINING".to_string() }],
        vec![KeyboardButton { label: "🏋️ Тренировка — свои данные".to_string(), callback_data: "mode:PRACTICE".to_string() }],
    ]
}

fn case_keyboard() -> Vec<Vec<KeyboardButton>> {
    builtin_cases()
        .into_iter()
        .map(|(key, case)| {
            let label = format!("{key}. {} {} CCI:{:.2}", case.case_name, case.crisis_flag.icon(), case.cci().cci());
            vec![KeyboardButton { label, callback_data: format!("case:{key}") }]
        })
        .collect()
}

fn goal_keyboard() -> Vec<Vec<KeyboardButton>> {
    GOALS.iter().map(|(value, label)| vec![KeyboardButton { label: (*label).to_string(), callback_data: format!("goal:{value}") }]).collect()
}

fn crisis_keyboard() -> Vec<Vec<KeyboardButton>> {
    vec![
        vec![KeyboardButton { label: "⚪ Нет кризиса".to_string(), callback_data: "crisis:NONE".to_string() }],
        vec![KeyboardButton { label: "🟡 Умеренный".to_string(), callback_data: "crisis:MODERATE".to_string() }],
        vec![KeyboardButton { label: "🔴 Высокий".to_string(), callback_data: "crisis:HIGH".to_string() }],
    ]
}

// ───────────────────────────────────────────────────────────────────────────
// Handler
// ───────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SimulatorHandler;

impl SimulatorHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
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

        let payload = json!({ "run_id": token.run_id, "setup_step": "mode" });
        ctx.fsm
            .upsert(BOT_ID, ctx.chat_id, ctx.user_id, &token.role, "setup", payload, Some(token.context_id))
            .await?;

        Ok(vec![OutgoingMessage::html("🔬 <b>PsycheOS Simulator v1.1</b>\n\nВыберите режим работы:")
            .with_keyboard(mode_keyboard())])
    }

    async fn handle_callback(&self, ctx: &HandlerContext<'_>, data: &str) -> anyhow::Result<Vec<OutgoingMessage>> {
        let state_name = ctx.state_name().to_string();
        if !matches!(state_name.as_str(), "setup" | "active") {
            return Ok(Vec::new());
        }
        let mut payload = ctx.payload();
        let setup_step = payload["setup_step"].as_str().unwrap_or("").to_string();

        if let Some(mode_value) = data.strip_prefix("mode:") {
            return self.on_mode_selected(ctx, mode_value, payload).await;
        }
        if let Some(case_key) = data.strip_prefix("case:") {
            return self.on_case_selected(ctx, case_key, payload).await;
        }
        if let Some(goal_value) = data.strip_prefix("goal:") {
            if setup_step == "goal" {
                let case_key = payload["case_key"].as_str().unwrap_or("1").to_string();
                let case = find_case(&case_key).unwrap_or_else(|| builtin_cases().remove(0).1);
                return self.launch_session(ctx, case, goal_value, "TRAINING", &mut payload).await;
            }
            if setup_step == "goal_practice" {
                let custom_data = payload["custom_data"].as_str().unwrap_or("").to_string();
                let crisis = payload["crisis"].as_str().unwrap_or("NONE").to_string();
                let case = BuiltinCase {
                    case_id: format!("custom_{}", ctx.chat_id),
                    case_name: "Пользовательский кейс".to_string(),
                    difficulty: "индивидуальная".to_string(),
                    client_gender: "не указан".to_string(),
                    client_age: 0,
                    presenting_complaints: vec!["см. загруженные данные".to_string()],
                    layer_brief: custom_data,
                    dynamics: CaseDynamics {
                        baseline_tension_l0: 50,
                        l0_reactivity: Level::Moderate,
                        l3_accessibility: Level::Moderate,
                        escalation_speed: Speed::Moderate,
                        intervention_range: Width::Moderate,
                        volatility: 0.5,
                    },
                    crisis_flag: CrisisFlag::parse(&crisis),
                };
                return self.launch_session(ctx, case, goal_value, "PRACTICE", &mut payload).await;
            }
        }
        if let Some(crisis_value) = data.strip_prefix("crisis:") {
            payload["crisis"] = json!(crisis_value);
            payload["setup_step"] = json!("goal_practice");
            ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "setup", payload, ctx.context_id()).await?;
            return Ok(vec![OutgoingMessage::html(format!("⚠️ Кризис: {crisis_value}\n\nВыберите цель сессии:")).with_keyboard(goal_keyboard())]);
        }
        if data == "end:confirm" && state_name == "active" {
            return self.finish_session(ctx, payload).await;
        }
        if data == "end:cancel" {
            return Ok(vec![OutgoingMessage::plain("Сессия продолжается. Пишите реплику.")]);
        }

        Ok(Vec::new())
    }

    async fn on_mode_selected(&self, ctx: &HandlerContext<'_>, mode_value: &str, mut payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        payload["mode"] = json!(mode_value);
        if mode_value == "PRACTICE" {
            payload["setup_step"] = json!("upload");
            ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "setup", payload, ctx.context_id()).await?;
            return Ok(vec![OutgoingMessage::html(
                "🏋️ <b>Режим: Тренировка</b>\n\
                 Только сигнал супервизора (без объяснений)\n\n\
                 📎 Опишите кейс клиента текстом: Screen-профиль, L0–L4 описания, концептуализацию.",
            )]);
        }
        payload["setup_step"] = json!("case");
        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "setup", payload, ctx.context_id()).await?;
        Ok(vec![OutgoingMessage::html(
            "🎓 <b>Режим: Обучение</b>\nСигнал супервизора + объяснение динамики\n\nВыберите кейс:",
        )
        .with_keyboard(case_keyboard())])
    }

    async fn on_case_selected(&self, ctx: &HandlerContext<'_>, case_key: &str, mut payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let Some(case) = find_case(case_key) else {
            return Ok(vec![OutgoingMessage::plain("❌ Кейс не найден.")]);
        };
        payload["case_key"] = json!(case_key);
        payload["setup_step"] = json!("goal");
        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "setup", payload, ctx.context_id()).await?;
        Ok(vec![OutgoingMessage::html(format!(
            "📋 <b>{}</b>\n👤 {}, {} лет\n⚠️ Кризис: {} {}\n📊 Сложность: {}\n\nВыберите цель сессии:",
            case.case_name,
            case.client_gender,
            case.client_age,
            case.crisis_flag.icon(),
            case.crisis_flag.as_str(),
            case.difficulty,
        ))
        .with_keyboard(goal_keyboard())])
    }

    async fn handle_upload_text(&self, ctx: &HandlerContext<'_>, text: &str, mut payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        payload["custom_data"] = json!(text);
        payload["setup_step"] = json!("crisis");
        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "setup", payload, ctx.context_id()).await?;
        Ok(vec![OutgoingMessage::plain("✅ Данные получены.\n\nВыберите кризисный флаг:").with_keyboard(crisis_keyboard())])
    }

    async fn launch_session(
        &self,
        ctx: &HandlerContext<'_>,
        case: BuiltinCase,
        goal_value: &str,
        mode_value: &str,
        payload: &mut Value,
    ) -> anyhow::Result<Vec<OutgoingMessage>> {
        let system_prompt = build_system_prompt(&case, goal_value, mode_value);
        let first_user_msg = "Сессия начинается. Клиент входит в кабинет. Сгенерируй первую реплику клиента и начальный блок супервизора.";

        let response = match ctx.oracle.ask(&system_prompt, first_user_msg, MODEL, 2048).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(vec![OutgoingMessage::html(format!("❌ Ошибка при обращении к Claude:\n<code>{}</code>", escape_html(&e.to_string())))]);
            }
        };

        let mut session = SessionData {
            case_id: case.case_id.clone(),
            case_name: case.case_name.clone(),
            mode: mode_value.to_string(),
            session_goal: goal_value.to_string(),
            crisis_flag: case.crisis_flag.as_str().to_string(),
            fsm_state: "S1".to_string(),
            hidden_state: HiddenState::default(),
            messages: vec![
                ChatTurn { role: "user".to_string(), content: first_user_msg.to_string() },
                ChatTurn { role: "assistant".to_string(), content: response.clone() },
            ],
            signal_log: Vec::new(),
            fsm_log: Vec::new(),
            iteration_log: Vec::new(),
        };

        let parsed = parse_claude_response(&response);
        if !parsed.signal.is_empty() {
            session.signal_log.push(parsed.signal.clone());
        }
        if !parsed.fsm_state.is_empty() {
            session.fsm_state = parsed.fsm_state.clone();
            session.fsm_log.push(parsed.fsm_state.clone());
        }

        payload["session"] = serde_json::to_value(&session)?;
        payload["system_prompt"] = json!(system_prompt);
        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "active", payload.clone(), ctx.context_id()).await?;

        let header = format!(
            "🔬 <b>PsycheOS Simulator v1.1</b>\n\n\
             📋 <b>Кейс:</b> {}\n\
             👤 <b>Клиент:</b> {}, {} лет\n\
             ⚠️ <b>Кризис:</b> {}\n\
             🎯 <b>Цель:</b> {}\n\
             📖 <b>Режим:</b> {}\n\
             📊 <b>CCI:</b> {:.2}\n\n\
             {}\nСессия начинается. Клиент входит в кабинет.\n{}\n\n",
            case.case_name,
            case.client_gender,
            case.client_age,
            case.crisis_flag.as_str(),
            goal_label(goal_value),
            mode_label(mode_value),
            case.cci().cci(),
            "─".repeat(30),
            "─".repeat(30),
        );

        Ok(vec![OutgoingMessage::html(format!("{header}{}", format_for_telegram(&parsed)))])
    }

    async fn handle_specialist_message(&self, ctx: &HandlerContext<'_>, text: &str, mut payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let Some(mut session) = payload.get("session").and_then(|v| serde_json::from_value::<SessionData>(v.clone()).ok()) else {
            return Ok(vec![OutgoingMessage::plain("❌ Данные сессии не найдены.")]);
        };
        let system_prompt = payload["system_prompt"].as_str().unwrap_or_default().to_string();

        session.messages.push(ChatTurn { role: "user".to_string(), content: text.to_string() });
        if session.messages.len() > MAX_SESSION_HISTORY {
            let excess = session.messages.len() - MAX_SESSION_HISTORY;
            session.messages.drain(0..excess);
        }

        let transcript = session
            .messages
            .iter()
            .map(|m| format!("[{}]: {}", if m.role == "user" { "Специалист" } else { "Клиент+супервизор" }, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let response = match ctx.oracle.ask(&system_prompt, &transcript, MODEL, 1500).await {
            Ok(r) => r,
            Err(e) => {
                session.messages.pop();
                payload["session"] = serde_json::to_value(&session)?;
                ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "active", payload, ctx.context_id()).await?;
                return Ok(vec![OutgoingMessage::html(format!("❌ Ошибка при обращении к Claude:\n<code>{}</code>", escape_html(&e.to_string())))]);
            }
        };

        session.messages.push(ChatTurn { role: "assistant".to_string(), content: response.clone() });
        let parsed = parse_claude_response(&response);
        if !parsed.signal.is_empty() {
            session.signal_log.push(parsed.signal.clone());
        }
        if !parsed.fsm_state.is_empty() {
            session.fsm_log.push(parsed.fsm_state.clone());
        }

        let replica_id = session.iteration_log.len() as u32 + 1;
        session.iteration_log.push(build_iteration_log(&parsed, replica_id, text));

        payload["session"] = serde_json::to_value(&session)?;
        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "active", payload, ctx.context_id()).await?;

        let formatted = format_for_telegram(&parsed);
        if formatted.chars().count() > 4000 {
            let mut messages = vec![OutgoingMessage::html(format!("🗣 <b>Клиент:</b>\n{}", escape_html(&parsed.client_text)))];
            if !parsed.supervisor_block.is_empty() {
                messages.push(OutgoingMessage::html(format!("{}\n{}", "─".repeat(30), escape_html(&parsed.supervisor_block))));
            }
            Ok(messages)
        } else {
            Ok(vec![OutgoingMessage::html(formatted)])
        }
    }

    async fn finish_session(&self, ctx: &HandlerContext<'_>, payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let Some(mut session) = payload.get("session").and_then(|v| serde_json::from_value::<SessionData>(v.clone()).ok()) else {
            return Ok(vec![OutgoingMessage::plain("❌ Данные сессии не найдены.")]);
        };
        let system_prompt = payload["system_prompt"].as_str().unwrap_or_default().to_string();

        session.messages.push(ChatTurn { role: "user".to_string(), content: "/end".to_string() });
        let transcript = session
            .messages
            .iter()
            .map(|m| format!("[{}]: {}", if m.role == "user" { "Специалист" } else { "Клиент+супервизор" }, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let report_text = match ctx.oracle.ask(&system_prompt, &format!("{transcript}\n\n{}", build_report_prompt()), MODEL, 4096).await {
            Ok(r) => r,
            Err(e) => {
                return Ok(vec![OutgoingMessage::html(format!("❌ Ошибка:\n<code>{}</code>", escape_html(&e.to_string())))]);
            }
        };

        let tsi = parse_tsi_from_report(&report_text);
        let cci = case_by_id(&session.case_id).map(|c| c.cci());

        let total_signals = session.signal_log.len() as u32;
        let yellows = session.signal_log.iter().filter(|s| *s == "🟡").count() as u32;
        let reds = session.signal_log.iter().filter(|s| *s == "🔴").count() as u32;
        let average_delta_trust = if session.iteration_log.is_empty() {
            None
        } else {
            Some(session.iteration_log.iter().map(|i| f64::from(i.delta.trust)).sum::<f64>() / session.iteration_log.len() as f64)
        };

        let signals = SessionSignals {
            case_id: session.case_id.clone(),
            tsi: tsi.map(|t| t.tsi()),
            yellow_signals: yellows,
            red_signals: reds,
            total_signals,
            average_delta_trust,
        };
        let specialist_telegram_id = ctx.user_id.unwrap_or(ctx.chat_id);
        let profile = ctx.specialist_profiles.update_after_session(specialist_telegram_id, &signals).await?;

        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "complete", json!({}), ctx.context_id()).await?;

        let greens = total_signals - yellows - reds;
        let tsi_text = tsi.map_or("TSI: н/д".to_string(), |t| format!("TSI: {:.2} ({})", t.tsi(), t.interpretation()));
        let cci_text = cci.map_or(String::new(), |c| format!(" | CCI: {:.2}", c.cci()));

        let mut report = vec![
            "📋 <b>АНАЛИТИЧЕСКИЙ ОТЧЁТ v1.1</b>".to_string(),
            String::new(),
            format!("Кейс: {}", escape_html(&session.case_name)),
            format!("Реплик: {} | 🟢{greens} 🟡{yellows} 🔴{reds}", session.iteration_log.len()),
            format!("📊 {tsi_text}{cci_text}"),
            String::new(),
            "─".repeat(30),
            String::new(),
            escape_html(&report_text),
        ];
        if profile.sessions_count > 1 {
            report.push(String::new());
            report.push("─".repeat(30));
            report.push(format!(
                "\n📈 <b>Профиль специалиста</b>\nСессий: {}\nСредний TSI: {:.2}\nΔtrust (средн.): {:.2}\n🟡 {:.0}% 🔴 {:.0}%",
                profile.sessions_count,
                profile.average_tsi,
                profile.average_delta_trust,
                profile.yellow_ratio * 100.0,
                profile.red_ratio * 100.0,
            ));
        }
        let full_report = report.join("\n");

        if let Some(context_id) = ctx.context_id() {
            if let Some(run_id) = payload["run_id"].as_str().and_then(|s| s.parse().ok()) {
                let summary = format!("Симуляция. {tsi_text}{cci_text}.");
                let artifact_payload = json!({
                    "tsi": tsi.map(|t| json!({ "tsi": t.tsi(), "interpretation": t.interpretation() })),
                    "cci": cci.map(|c| c.cci()),
                    "session_turns": session.iteration_log.len(),
                    "report_text": report_text,
                });
                ctx.artifacts.save_artifact(context_id, BOT_ID, run_id, specialist_telegram_id, artifact_payload, Some(&summary)).await?;
            }
        }

        let mut messages: Vec<OutgoingMessage> = split_text(&full_report, 4000).into_iter().map(OutgoingMessage::html).collect();
        messages.push(OutgoingMessage::plain("✅ Сессия завершена. Используйте /start для новой симуляции."));
        Ok(messages)
    }

    fn handle_state(session: Option<SessionData>) -> OutgoingMessage {
        let Some(session) = session else {
            return OutgoingMessage::plain("Нет активной сессии. /start для запуска.");
        };
        let greens = session.signal_log.iter().filter(|s| *s == "🟢").count();
        let yellows = session.signal_log.iter().filter(|s| *s == "🟡").count();
        let reds = session.signal_log.iter().filter(|s| *s == "🔴").count();

        let last_info = session.iteration_log.last().map_or(String::new(), |last| {
            format!(
                "\n\n📈 <b>Последняя реплика:</b>\nLayer: {} | Match: {:.2} | Cascade: {:.2}\nΔtrust={:+} Δtension={:+} Δuncertainty={:+}",
                last.active_layer_before, last.regulatory_match_score, last.cascade_probability, last.delta.trust, last.delta.tension_l0, last.delta.uncertainty,
            )
        });

        OutgoingMessage::html(format!(
            "📊 <b>Состояние сессии</b>\n\n\
             📋 Кейс: {}\n🎯 Цель: {}\n📖 Режим: {}\n⚠️ Кризис: {}\n\n\
             🔄 FSM: <b>{}</b>\n💬 Реплик: {}\n🟢 {greens}  🟡 {yellows}  🔴 {reds}\n\
             📈 Траектория: {}{last_info}",
            escape_html(&session.case_name),
            goal_label(&session.session_goal),
            mode_label(&session.mode),
            session.crisis_flag,
            session.fsm_state,
            session.iteration_log.len(),
            session.fsm_log.iter().rev().take(10).rev().cloned().collect::<Vec<_>>().join(" → "),
        ))
    }

    fn handle_help() -> OutgoingMessage {
        OutgoingMessage::html(
            "🔬 <b>PsycheOS Simulator v1.1 — Команды</b>\n\n\
             /end — Завершить сессию → аналитический отчёт\n\
             /state — Текущее состояние сессии\n\
             /pause — Пауза\n\
             /help — Эта справка\n\n\
             <i>Во время сессии просто пишите текстом — это ваши реплики как специалиста.</i>",
        )
    }
}

#[async_trait]
impl Handler for SimulatorHandler {
    fn bot_id(&self) -> &'static str {
        BOT_ID
    }

    async fn handle(&self, ctx: HandlerContext<'_>) -> anyhow::Result<Vec<OutgoingMessage>> {
        if let Incoming::Callback(data) = ctx.incoming {
            return self.handle_callback(&ctx, data).await;
        }
        let Incoming::Text(raw_text) = ctx.incoming else {
            return Ok(Vec::new());
        };
        let text = raw_text.trim();

        if let Some(rest) = text.strip_prefix("/start") {
            let token = rest.trim();
            return if token.is_empty() {
                Ok(vec![OutgoingMessage::plain("❌ Доступ ограничен.\n\nЗапустите инструмент через Pro.")])
            } else {
                self.start_session(&ctx, token).await
            };
        }
        if text.starts_with("/help") {
            return Ok(vec![Self::handle_help()]);
        }
        if text.starts_with("/state") {
            let session = ctx.state.and_then(|s| s.state_payload.get("session").cloned()).and_then(|v| serde_json::from_value(v).ok());
            return Ok(vec![Self::handle_state(session)]);
        }
        if text.starts_with("/pause") {
            return if ctx.state_name() == "active" {
                Ok(vec![OutgoingMessage::html("⏸ <b>Пауза</b>\n\nСессия приостановлена.\nДля продолжения просто напишите следующую реплику.")])
            } else {
                Ok(vec![OutgoingMessage::plain("Нет активной сессии.")])
            };
        }
        if text.starts_with("/end") {
            return if ctx.state_name() == "active" {
                Ok(vec![OutgoingMessage::plain("Завершить сессию и получить аналитический отчёт?").with_keyboard(vec![vec![
                    KeyboardButton { label: "✅ Да, завершить".to_string(), callback_data: "end:confirm".to_string() },
                    KeyboardButton { label: "❌ Продолжить".to_string(), callback_data: "end:cancel".to_string() },
                ]])])
            } else {
                Ok(vec![OutgoingMessage::plain("Нет активной сессии.")])
            };
        }

        if !matches!(ctx.state_name(), "setup" | "active") {
            return Ok(vec![OutgoingMessage::plain("Для запуска используйте ссылку из Pro.")]);
        }

        let payload = ctx.payload();
        let setup_step = payload["setup_step"].as_str().unwrap_or("").to_string();

        if ctx.state_name() == "setup" && setup_step == "upload" {
            return self.handle_upload_text(&ctx, text, payload).await;
        }
        if ctx.state_name() == "active" {
            return self.handle_specialist_message(&ctx, text, payload).await;
        }
        Ok(vec![OutgoingMessage::plain("Используйте кнопки для навигации.")])
    }
}
