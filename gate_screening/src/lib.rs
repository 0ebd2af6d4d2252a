//! Multi-phase psychological screening orchestration: static Phase 1
//! screens, oracle-routed Phase 2/3 questions, and report generation,
//! all built on top of the pure vector math in `gate_engine`.

pub mod orchestrator;
pub mod report;
pub mod screen_bank;
pub mod state;

pub use orchestrator::{QuestionView, ScreenAction, ScreenOrchestrator};
pub use report::{generate_full_report, Report};
pub use screen_bank::{Phase1Screen, Phase2Template, ScreenOption};
pub use state::SessionState;

/// Strips a leading/trailing ```json or ``` markdown fence (if present)
/// before parsing, mirroring how oracle responses are unwrapped before
/// being treated as structured data.
pub fn parse_json(text: &str) -> anyhow::Result<serde_json::Value> {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    Ok(serde_json::from_str(t.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_strips_fenced_blocks() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_json(fenced).unwrap(), serde_json::json!({"a": 1}));
    }

    #[test]
    fn parse_json_accepts_bare_json() {
        assert_eq!(parse_json("{\"a\": 1}").unwrap(), serde_json::json!({"a": 1}));
    }
}
