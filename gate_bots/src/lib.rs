//! Tool-bot handlers: one module per bot, all behind the same `Handler`
//! capability so the webhook dispatcher never needs to know which bot
//! it is driving.

pub mod conceptualizer;
pub mod decision_policy;
pub mod interpreter;
pub mod policy;
pub mod pro;
pub mod screen;
pub mod simulator;

use async_trait::async_trait;
use gate_core::Oracle;
use gate_entities::bot_chat_state;
use gate_store::{ArtifactStore, FsmStore, IdentityStore, LinkTokenStore, ScreeningStore, SpecialistProfileStore};
use serde_json::Value;
use std::sync::Arc;

/// One button in an inline keyboard row; the dispatcher renders these as
/// a Telegram `InlineKeyboardMarkup`, one inner vec per row.
#[derive(Debug, Clone)]
pub struct KeyboardButton {
    pub label: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    PlainText,
    Html,
}

/// A file attachment sent via Telegram's `sendDocument`, text content only
/// (the report/export documents this gateway produces are never binary).
#[derive(Debug, Clone)]
pub struct OutgoingDocument {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub text: String,
    pub parse_mode: ParseMode,
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub document: Option<OutgoingDocument>,
}

impl OutgoingMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), parse_mode: ParseMode::PlainText, keyboard: Vec::new(), document: None }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self { text: text.into(), parse_mode: ParseMode::Html, keyboard: Vec::new(), document: None }
    }

    #[must_use]
    pub fn with_keyboard(mut self, rows: Vec<Vec<KeyboardButton>>) -> Self {
        self.keyboard = rows;
        self
    }

    /// `text` becomes the document's caption; rendered via `sendDocument`
    /// instead of `sendMessage` by the Telegram client.
    #[must_use]
    pub fn with_document(mut self, filename: impl Into<String>, content: impl Into<String>) -> Self {
        self.document = Some(OutgoingDocument { filename: filename.into(), content: content.into() });
        self
    }
}

/// Incoming update, already boiled down to text-or-callback by the
/// dispatcher (media, stickers, etc. are not routed to handlers).
#[derive(Debug, Clone)]
pub enum Incoming {
    Text(String),
    Callback(String),
}

pub struct HandlerContext<'a> {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub incoming: &'a Incoming,
    pub state: Option<&'a bot_chat_state::Model>,
    pub fsm: &'a FsmStore,
    pub identity: &'a IdentityStore,
    pub link_tokens: &'a LinkTokenStore,
    pub artifacts: &'a ArtifactStore,
    pub screenings: &'a ScreeningStore,
    pub specialist_profiles: &'a SpecialistProfileStore,
    pub oracle: &'a Arc<dyn Oracle>,
}

impl HandlerContext<'_> {
    pub fn text(&self) -> Option<&str> {
        match self.incoming {
            Incoming::Text(t) => Some(t.as_str()),
            Incoming::Callback(_) => None,
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        match self.incoming {
            Incoming::Callback(d) => Some(d.as_str()),
            Incoming::Text(_) => None,
        }
    }

    pub fn state_name(&self) -> &str {
        self.state.map_or("no_state", |s| s.state.as_str())
    }

    pub fn payload(&self) -> Value {
        self.state.map_or_else(|| serde_json::json!({}), |s| s.state_payload.clone())
    }

    pub fn role(&self) -> &str {
        self.state.map_or("specialist", |s| s.role.as_str())
    }

    pub fn context_id(&self) -> Option<uuid::Uuid> {
        self.state.and_then(|s| s.context_id)
    }
}

/// One handler per bot: "process one update, return the replies to send."
/// Persistence (FSM transitions, artifacts) happens inside `handle`, via
/// the stores carried on the context — the dispatcher commits afterward.
#[async_trait]
pub trait Handler: Send + Sync {
    fn bot_id(&self) -> &'static str;
    async fn handle(&self, ctx: HandlerContext<'_>) -> anyhow::Result<Vec<OutgoingMessage>>;
}

/// Strips a leading/trailing ```json or ``` markdown fence before parsing.
pub fn parse_json(text: &str) -> anyhow::Result<Value> {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    if let Ok(v) = serde_json::from_str(t.trim()) {
        return Ok(v);
    }
    Ok(serde_json::from_str(&repair_truncated_json(t.trim()))?)
}

/// Balances unterminated `{`/`[`/`"` left by a response cut off mid-stream.
fn repair_truncated_json(text: &str) -> String {
    let mut depth_curly = 0i32;
    let mut depth_square = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth_curly += 1,
            '}' if !in_string => depth_curly -= 1,
            '[' if !in_string => depth_square += 1,
            ']' if !in_string => depth_square -= 1,
            _ => {}
        }
    }

    let mut repaired = text.to_string();
    if in_string {
        repaired.push('"');
    }
    for _ in 0..depth_square.max(0) {
        repaired.push(']');
    }
    for _ in 0..depth_curly.max(0) {
        repaired.push('}');
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_repairs_truncated_object() {
        let truncated = r#"{"a": 1, "b": [1, 2"#;
        let parsed = parse_json(truncated).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn parse_json_strips_fences() {
        let fenced = "```json\n{\"ok\": true}\n```";
        assert_eq!(parse_json(fenced).unwrap(), serde_json::json!({"ok": true}));
    }
}
