//! Conceptualizer decision policy: priority checking, next-question
//! selection, and dialogue-continuation control over an in-progress
//! hypothesis set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisType {
    Structural,
    Functional,
    Dynamic,
    Managerial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Weak,
    Working,
    Dominant,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PsycheLevel {
    L0,
    L1,
    L2,
    L3,
    L4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    LevelCheck,
    FunctionCheck,
    DynamicsCheck,
    AlternativesCheck,
    ControlCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub id: String,
    #[serde(rename = "type")]
    pub hyp_type: HypothesisType,
    pub levels: Vec<PsycheLevel>,
    pub formulation: String,
    pub confidence: ConfidenceLevel,
    pub foundations: Vec<String>,
    pub function: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedFlagSeverity {
    Warning,
    Stop,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedFlag {
    pub description: String,
    pub severity: RedFlagSeverity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub dialogue_turns: u32,
    pub hypotheses_added: u32,
    pub data_collection_complete: bool,
    pub analysis_complete: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataMap {
    pub specialist_observations: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStateKind {
    Init,
    DataCollection,
    Analysis,
    SocraticDialogue,
    OutputAssembly,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptSession {
    pub session_id: String,
    pub specialist_id: String,
    pub state: SessionStateKind,
    pub hypotheses: Vec<Hypothesis>,
    pub data_map: Option<DataMap>,
    pub progress: Progress,
    pub red_flags: Vec<RedFlag>,
}

impl ConceptSession {
    pub fn active_hypotheses(&self) -> &[Hypothesis] {
        &self.hypotheses
    }

    pub fn managerial_hypotheses(&self) -> Vec<&Hypothesis> {
        self.hypotheses.iter().filter(|h| h.hyp_type == HypothesisType::Managerial).collect()
    }

    pub fn has_blocking_flags(&self) -> bool {
        self.red_flags.iter().any(|f| matches!(f.severity, RedFlagSeverity::Stop | RedFlagSeverity::Critical))
    }

    pub fn blocking_red_flags(&self) -> Vec<&RedFlag> {
        self.red_flags.iter().filter(|f| matches!(f.severity, RedFlagSeverity::Stop | RedFlagSeverity::Critical)).collect()
    }

    pub fn can_proceed_to_output(&self) -> bool {
        self.hypotheses.len() >= 2 && !self.managerial_hypotheses().is_empty() && !self.has_blocking_flags()
    }

    pub fn add_hypothesis(&mut self, hypothesis: Hypothesis) {
        self.hypotheses.push(hypothesis);
        self.progress.hypotheses_added += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
    None = 5,
}

pub struct PriorityChecker<'a> {
    session: &'a ConceptSession,
}

impl<'a> PriorityChecker<'a> {
    #[must_use]
    pub const fn new(session: &'a ConceptSession) -> Self {
        Self { session }
    }

    #[must_use]
    pub fn check_priority(&self) -> (Priority, String) {
        for check in [
            Self::check_no_managerial,
            Self::check_dominant_without_alternatives,
            Self::check_structural_issues,
            Self::check_refinement_needed,
        ] {
            let (priority, reason) = check(self.session);
            if priority != Priority::None {
                return (priority, reason);
            }
        }
        (Priority::None, "No specific priority — general exploration".to_string())
    }

    fn check_no_managerial(session: &ConceptSession) -> (Priority, String) {
        let active = session.active_hypotheses();
        let s = active.iter().filter(|h| h.hyp_type == HypothesisType::Structural).count();
        let f = active.iter().filter(|h| h.hyp_type == HypothesisType::Functional).count();
        let d = active.iter().filter(|h| h.hyp_type == HypothesisType::Dynamic).count();
        let m = session.managerial_hypotheses().len();

        if (s > 0 || f > 0 || d > 0) && m == 0 {
            return (Priority::Critical, format!("Have understanding ({s}S+{f}F+{d}D) but NO managerial hypothesis."));
        }
        if active.len() >= 3 && m == 0 {
            return (Priority::Critical, format!("Model has {} hypotheses but no management point.", active.len()));
        }
        (Priority::None, String::new())
    }

    fn check_dominant_without_alternatives(session: &ConceptSession) -> (Priority, String) {
        let active = session.active_hypotheses();
        for dom in active.iter().filter(|h| h.confidence == ConfidenceLevel::Dominant) {
            let has_alternative = active.iter().any(|h| h.hyp_type == dom.hyp_type && h.id != dom.id);
            if !has_alternative {
                return (Priority::High, format!("Dominant {:?} hypothesis has no alternatives.", dom.hyp_type));
            }
        }
        (Priority::None, String::new())
    }

    fn check_structural_issues(session: &ConceptSession) -> (Priority, String) {
        let active = session.active_hypotheses();
        if active.is_empty() {
            return (Priority::None, String::new());
        }

        if active.len() >= 5 {
            let structural = active.iter().filter(|h| h.hyp_type == HypothesisType::Structural).count();
            if structural == 0 {
                return (Priority::Medium, format!("Have {} hypotheses but no structural hypothesis.", active.len()));
            }
            let confident = active
                .iter()
                .filter(|h| matches!(h.confidence, ConfidenceLevel::Working | ConfidenceLevel::Dominant))
                .count();
            if confident == 0 {
                return (Priority::Medium, format!("Have {} hypotheses but all weak/conditional.", active.len()));
            }
        }

        if active.len() >= 3 {
            let mut all_layers = std::collections::HashSet::new();
            for hyp in active {
                all_layers.extend(hyp.levels.iter().copied());
            }
            if all_layers.len() == 1 {
                let layer = all_layers.into_iter().next().unwrap();
                return (Priority::Medium, format!("All hypotheses on {layer:?}. Need multi-layer understanding."));
            }
        }

        (Priority::None, String::new())
    }

    fn check_refinement_needed(session: &ConceptSession) -> (Priority, String) {
        let active = session.active_hypotheses();
        let m = session.managerial_hypotheses().len();
        let total = active.len();
        if m == 0 || total < 2 || total > 6 {
            return (Priority::None, String::new());
        }
        let types_present: std::collections::HashSet<_> = active.iter().map(|h| h.hyp_type).collect();
        if types_present.len() >= 2 && m >= 1 {
            return (Priority::Low, format!("Model nearly complete: {total} hypotheses including {m} managerial."));
        }
        (Priority::None, String::new())
    }
}

pub struct QuestionGenerator<'a> {
    session: &'a ConceptSession,
    hypothesis: Option<&'a Hypothesis>,
}

impl<'a> QuestionGenerator<'a> {
    #[must_use]
    pub const fn new(session: &'a ConceptSession, hypothesis: Option<&'a Hypothesis>) -> Self {
        Self { session, hypothesis }
    }

    fn level_check(&self) -> String {
        let Some(hyp) = self.hypothesis else {
            return "Какой слой показывает максимальное напряжение?".to_string();
        };
        let layers_str = hyp.levels.iter().map(|l| format!("{l:?}")).collect::<Vec<_>>().join(", ");
        if hyp.levels.contains(&PsycheLevel::L4) || hyp.levels.contains(&PsycheLevel::L3) {
            format!(
                "Вы отнесли это к {layers_str}. Что конкретно указывает, что это именно этот уровень, \
                 а не автоматическая реакция (L1) или выученный паттерн (L2)?"
            )
        } else if hyp.levels.len() > 2 {
            format!(
                "Эта гипотеза охватывает {} слоя ({layers_str}). Можем ли мы определить ОСНОВНОЙ слой, где напряжение максимально?",
                hyp.levels.len()
            )
        } else {
            format!("Какие данные подтверждают отнесение к {layers_str}? Могло ли это быть на другом уровне?")
        }
    }

    fn function_check(&self) -> String {
        match self.hypothesis.and_then(|h| h.function.as_deref()) {
            Some(function) => {
                format!("Вы определили функцию как: '{function}'. Что сломается если система прекратит этот паттерн?")
            }
            None => "Какую задачу решает система, поддерживая этот паттерн?".to_string(),
        }
    }

    fn dynamics_check(&self) -> String {
        "Что поддерживает этот паттерн во времени?".to_string()
    }

    fn alternatives_check(&self) -> String {
        "Какое альтернативное объяснение могло бы учесть те же данные?".to_string()
    }

    fn control_check(&self) -> String {
        if self.session.managerial_hypotheses().is_empty() {
            "Где эта система может быть реально затронута? Что может измениться?".to_string()
        } else {
            "Кто реальный агент изменения? Какова последовательность?".to_string()
        }
    }

    #[must_use]
    pub fn generate(&self, question_type: QuestionType) -> String {
        match question_type {
            QuestionType::LevelCheck => self.level_check(),
            QuestionType::FunctionCheck => self.function_check(),
            QuestionType::DynamicsCheck => self.dynamics_check(),
            QuestionType::AlternativesCheck => self.alternatives_check(),
            QuestionType::ControlCheck => self.control_check(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuestionSelection {
    pub question_text: String,
    pub question_type: QuestionType,
    pub priority: Priority,
    pub priority_reason: String,
    pub context: Option<&'static str>,
}

fn priority_context(priority: Priority) -> Option<&'static str> {
    match priority {
        Priority::Critical => Some("Критический вопрос для определения точки управления."),
        Priority::High => Some("Тестируем гипотезу против альтернатив."),
        Priority::Medium => Some("Организуем гипотезы по архитектуре."),
        Priority::Low => Some("Уточняем понимание динамики."),
        Priority::None => None,
    }
}

pub struct DecisionPolicySelector<'a> {
    session: &'a ConceptSession,
}

impl<'a> DecisionPolicySelector<'a> {
    #[must_use]
    pub const fn new(session: &'a ConceptSession) -> Self {
        Self { session }
    }

    #[must_use]
    pub fn select_next_question(&self) -> QuestionSelection {
        let (priority, reason) = PriorityChecker::new(self.session).check_priority();
        let question_type = self.select_question_type(priority);
        let target = self.identify_target(question_type);
        let question_text = QuestionGenerator::new(self.session, target).generate(question_type);
        QuestionSelection {
            question_text,
            question_type,
            priority,
            priority_reason: reason,
            context: priority_context(priority),
        }
    }

    fn select_question_type(&self, priority: Priority) -> QuestionType {
        match priority {
            Priority::Critical => QuestionType::ControlCheck,
            Priority::High => QuestionType::AlternativesCheck,
            Priority::Medium => {
                let active = self.session.active_hypotheses();
                if active.len() >= 5 && !active.iter().any(|h| h.hyp_type == HypothesisType::Structural) {
                    QuestionType::LevelCheck
                } else {
                    QuestionType::FunctionCheck
                }
            }
            Priority::Low => QuestionType::DynamicsCheck,
            Priority::None => {
                let turns = self.session.progress.dialogue_turns;
                if turns < 3 {
                    QuestionType::FunctionCheck
                } else if turns < 7 {
                    if turns % 2 == 0 { QuestionType::LevelCheck } else { QuestionType::FunctionCheck }
                } else {
                    QuestionType::DynamicsCheck
                }
            }
        }
    }

    fn identify_target(&self, question_type: QuestionType) -> Option<&'a Hypothesis> {
        let active = self.session.active_hypotheses();
        if active.is_empty() {
            return None;
        }
        if question_type == QuestionType::AlternativesCheck {
            if let Some(dominant) = active.iter().find(|h| h.confidence == ConfidenceLevel::Dominant) {
                return Some(dominant);
            }
        }
        if question_type == QuestionType::FunctionCheck {
            let structural: Vec<_> = active.iter().filter(|h| h.hyp_type == HypothesisType::Structural).collect();
            if !structural.is_empty() {
                return Some(structural.iter().find(|h| h.function.is_none()).copied().unwrap_or(structural[0]));
            }
        }
        active.last()
    }

    #[must_use]
    pub fn should_continue_dialogue(&self) -> (bool, String) {
        const MAX_TURNS: u32 = 20;
        if self.session.progress.dialogue_turns >= MAX_TURNS {
            return (false, format!("Достигнут лимит ({MAX_TURNS} вопросов)"));
        }
        if self.session.can_proceed_to_output() {
            return (false, "Минимальная модель достигнута — готово к концептуализации".to_string());
        }
        if self.session.has_blocking_flags() {
            let blocking = self.session.blocking_red_flags();
            return (false, format!("Блокировано флагом: {}", blocking[0].description));
        }
        (true, "Модель неполная — продолжаем диалог".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hyp(id: &str, hyp_type: HypothesisType, levels: Vec<PsycheLevel>, confidence: ConfidenceLevel) -> Hypothesis {
        Hypothesis {
            id: id.to_string(),
            hyp_type,
            levels,
            formulation: "test".to_string(),
            confidence,
            foundations: Vec::new(),
            function: None,
        }
    }

    fn session_with(hypotheses: Vec<Hypothesis>) -> ConceptSession {
        ConceptSession {
            session_id: "s1".to_string(),
            specialist_id: "sp1".to_string(),
            state: SessionStateKind::SocraticDialogue,
            hypotheses,
            data_map: None,
            progress: Progress::default(),
            red_flags: Vec::new(),
        }
    }

    #[test]
    fn flags_critical_priority_without_managerial_hypothesis() {
        let session = session_with(vec![hyp("h1", HypothesisType::Structural, vec![PsycheLevel::L0], ConfidenceLevel::Working)]);
        let (priority, _) = PriorityChecker::new(&session).check_priority();
        assert_eq!(priority, Priority::Critical);
    }

    #[test]
    fn selects_control_check_question_for_critical_priority() {
        let session = session_with(vec![hyp("h1", HypothesisType::Structural, vec![PsycheLevel::L0], ConfidenceLevel::Working)]);
        let selection = DecisionPolicySelector::new(&session).select_next_question();
        assert_eq!(selection.question_type, QuestionType::ControlCheck);
    }

    #[test]
    fn stops_dialogue_once_minimal_model_is_complete() {
        let session = session_with(vec![
            hyp("h1", HypothesisType::Structural, vec![PsycheLevel::L0], ConfidenceLevel::Working),
            hyp("h2", HypothesisType::Managerial, vec![PsycheLevel::L2], ConfidenceLevel::Working),
        ]);
        let (should_continue, _) = DecisionPolicySelector::new(&session).should_continue_dialogue();
        assert!(!should_continue);
    }
}
