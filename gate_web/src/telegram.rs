//! Telegram update shapes and the outbound Bot API client.
//!
//! The update structs mirror only the fields the dispatcher actually reads
//! (`greentic-ai-greentic-messaging`'s ingress follows the same
//! boil-it-down-to-what-you-use approach rather than modeling the full
//! Telegram schema). The outbound side is a small capability trait so
//! dispatcher tests can substitute an in-memory double instead of issuing
//! real HTTP calls.

use async_trait::async_trait;
use gate_bots::{KeyboardButton, OutgoingDocument, OutgoingMessage, ParseMode};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub from: Option<TelegramUser>,
}

/// What the dispatcher needs out of an update, already boiled down from
/// "message or callback query" to one of `Incoming`'s two shapes.
pub struct ExtractedUpdate {
    pub chat_id: i64,
    pub user_id: Option<i64>,
    pub incoming: gate_bots::Incoming,
    pub callback_query_id: Option<String>,
}

#[must_use]
pub fn extract(update: &TelegramUpdate) -> Option<ExtractedUpdate> {
    if let Some(cq) = &update.callback_query {
        let chat_id = cq.message.as_ref().map(|m| m.chat.id)?;
        return Some(ExtractedUpdate {
            chat_id,
            user_id: cq.from.as_ref().map(|u| u.id),
            incoming: gate_bots::Incoming::Callback(cq.data.clone().unwrap_or_default()),
            callback_query_id: Some(cq.id.clone()),
        });
    }
    let message = update.message.as_ref().or(update.edited_message.as_ref())?;
    let text = message.text.clone()?;
    Some(ExtractedUpdate {
        chat_id: message.chat.id,
        user_id: message.from.as_ref().map(|u| u.id),
        incoming: gate_bots::Incoming::Text(text),
        callback_query_id: None,
    })
}

fn keyboard_json(rows: &[Vec<KeyboardButton>]) -> Value {
    let rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({"text": b.label, "callback_data": b.callback_data}))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Outbound capability: send one message, acknowledge one callback query.
/// Split out from `OutgoingMessage` rendering so the dispatcher can be
/// tested against a recording double instead of issuing real HTTP calls.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn send_message(
        &self,
        token: &str,
        chat_id: i64,
        message: &OutgoingMessage,
    ) -> anyhow::Result<()>;

    async fn answer_callback_query(&self, token: &str, callback_query_id: &str) -> anyhow::Result<()>;
}

pub struct HttpTelegramApi {
    client: Client,
    api_base: String,
}

impl HttpTelegramApi {
    #[must_use]
    pub fn new(client: Client, api_base: String) -> Self {
        Self { client, api_base }
    }
}

impl Default for HttpTelegramApi {
    fn default() -> Self {
        Self::new(Client::new(), "https://api.telegram.org".to_string())
    }
}

#[async_trait]
impl TelegramApi for HttpTelegramApi {
    async fn send_message(
        &self,
        token: &str,
        chat_id: i64,
        message: &OutgoingMessage,
    ) -> anyhow::Result<()> {
        if let Some(document) = &message.document {
            return self.send_document(token, chat_id, message, document).await;
        }

        let mut body = json!({
            "chat_id": chat_id,
            "text": message.text,
        });
        if message.parse_mode == ParseMode::Html {
            body["parse_mode"] = json!("HTML");
        }
        if !message.keyboard.is_empty() {
            body["reply_markup"] = keyboard_json(&message.keyboard);
        }

        let response = self
            .client
            .post(format!("{}/bot{token}/sendMessage", self.api_base))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, %text, "telegram sendMessage failed");
        }
        Ok(())
    }

    async fn answer_callback_query(&self, token: &str, callback_query_id: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(format!("{}/bot{token}/answerCallbackQuery", self.api_base))
            .json(&json!({ "callback_query_id": callback_query_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "telegram answerCallbackQuery failed");
        }
        Ok(())
    }
}

impl HttpTelegramApi {
    async fn send_document(
        &self,
        token: &str,
        chat_id: i64,
        message: &OutgoingMessage,
        document: &OutgoingDocument,
    ) -> anyhow::Result<()> {
        let part = Part::bytes(document.content.clone().into_bytes())
            .file_name(document.filename.clone())
            .mime_str("text/plain; charset=utf-8")?;

        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", message.text.clone())
            .part("document", part);

        let response = self
            .client
            .post(format!("{}/bot{token}/sendDocument", self.api_base))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, %text, "telegram sendDocument failed");
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub ok: bool,
}

#[cfg(test)]
mod tests {
    use super::keyboard_json;
    use gate_bots::KeyboardButton;

    #[test]
    fn keyboard_json_renders_rows_of_buttons() {
        let rows = vec![vec![KeyboardButton { label: "Yes".to_string(), callback_data: "yes".to_string() }]];
        let rendered = keyboard_json(&rows);
        assert_eq!(rendered["inline_keyboard"][0][0]["text"], "Yes");
        assert_eq!(rendered["inline_keyboard"][0][0]["callback_data"], "yes");
    }

    #[test]
    fn keyboard_json_handles_no_rows() {
        let rendered = keyboard_json(&[]);
        assert_eq!(rendered["inline_keyboard"].as_array().map(Vec::len), Some(0));
    }
}
