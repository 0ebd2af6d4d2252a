//! The one dispatcher that drives every tool bot, per the webhook contract
//! in the external-interfaces section: compare secret, decode the update,
//! dedup, load FSM state, invoke the handler, always answer 200.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use gate_config::BotId;

use crate::state::AppState;
use crate::telegram::{self, TelegramUpdate};

fn ok_response() -> Response {
    (StatusCode::OK, axum::Json(telegram::WebhookAck { ok: true })).into_response()
}

/// Byte-for-byte but not short-circuiting on the first mismatching byte,
/// so a wrong secret takes the same time to reject regardless of where it
/// first diverges from the configured value.
fn secret_matches(expected: &str, provided: Option<&str>) -> bool {
    let Some(provided) = provided else { return false };
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    if expected.len() != provided.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.iter().zip(provided.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(bot_id_segment): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();

    let Some(bot_id) = BotId::from_path_segment(&bot_id_segment) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let bot_id_str = bot_id.path_segment();

    let credentials = match state.config.credentials(bot_id) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(bot_id = bot_id_str, %err, "no credentials configured for bot");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let provided_secret = headers
        .get("X-Telegram-Bot-Api-Secret-Token")
        .and_then(|v| v.to_str().ok());
    if !secret_matches(&credentials.secret, provided_secret) {
        tracing::warn!(bot_id = bot_id_str, "webhook secret mismatch");
        return StatusCode::FORBIDDEN.into_response();
    }

    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            tracing::warn!(bot_id = bot_id_str, %err, "unparseable telegram update, dropping");
            return ok_response();
        }
    };

    let Some(extracted) = telegram::extract(&update) else {
        tracing::debug!(bot_id = bot_id_str, update_id = update.update_id, "update carries no routable message, dropping");
        return ok_response();
    };

    match state
        .dedup
        .try_insert(bot_id_str, update.update_id, extracted.chat_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(bot_id = bot_id_str, update_id = update.update_id, "duplicate update, dropping");
            return ok_response();
        }
        Err(err) => {
            tracing::error!(bot_id = bot_id_str, update_id = update.update_id, %err, "dedup insert failed");
            return ok_response();
        }
    }

    let fsm_state = match state.fsm.load(bot_id_str, extracted.chat_id).await {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(bot_id = bot_id_str, %err, "fsm load failed");
            None
        }
    };

    let Some(handler) = state.handler(bot_id_str) else {
        tracing::error!(bot_id = bot_id_str, "no handler registered for this bot");
        return ok_response();
    };

    let ctx = state.handler_context(extracted.chat_id, extracted.user_id, &extracted.incoming, fsm_state.as_ref());

    let outcome = handler.handle(ctx).await;

    let status = match outcome {
        Ok(messages) => {
            for message in &messages {
                if let Err(err) = state
                    .telegram
                    .send_message(&credentials.token, extracted.chat_id, message)
                    .await
                {
                    tracing::error!(bot_id = bot_id_str, %err, "failed to deliver outgoing message");
                }
            }
            "ok"
        }
        Err(err) => {
            tracing::error!(bot_id = bot_id_str, chat_id = extracted.chat_id, update_id = update.update_id, %err, "handler failed");
            "handler_error"
        }
    };

    if let Some(callback_query_id) = &extracted.callback_query_id {
        if let Err(err) = state.telegram.answer_callback_query(&credentials.token, callback_query_id).await {
            tracing::warn!(bot_id = bot_id_str, %err, "failed to answer callback query");
        }
    }

    tracing::info!(
        bot_id = bot_id_str,
        update_id = update.update_id,
        outcome = status,
        duration_ms = started.elapsed().as_millis() as u64,
        "webhook request handled"
    );

    ok_response()
}

#[cfg(test)]
mod tests {
    use super::secret_matches;
    use crate::telegram::{self, TelegramUpdate};

    #[test]
    fn secret_matches_exact_value() {
        assert!(secret_matches("topsecret", Some("topsecret")));
    }

    #[test]
    fn secret_matches_rejects_wrong_value() {
        assert!(!secret_matches("topsecret", Some("wrong")));
    }

    #[test]
    fn secret_matches_rejects_missing_header() {
        assert!(!secret_matches("topsecret", None));
    }

    #[test]
    fn secret_matches_rejects_different_length() {
        assert!(!secret_matches("topsecret", Some("short")));
    }

    #[test]
    fn extract_returns_none_for_update_without_message_or_callback() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({ "update_id": 1 })).unwrap();
        assert!(telegram::extract(&update).is_none());
    }

    #[test]
    fn extract_reads_chat_and_user_from_message() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": { "chat": { "id": 555 }, "from": { "id": 42 }, "text": "hello" }
        }))
        .unwrap();
        let extracted = telegram::extract(&update).unwrap();
        assert_eq!(extracted.chat_id, 555);
        assert_eq!(extracted.user_id, Some(42));
        assert!(extracted.callback_query_id.is_none());
        assert!(matches!(extracted.incoming, gate_bots::Incoming::Text(ref t) if t == "hello"));
    }

    #[test]
    fn extract_reads_callback_query() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "callback_query": {
                "id": "cbq1",
                "data": "mode:practice",
                "message": { "chat": { "id": 555 } },
                "from": { "id": 42 }
            }
        }))
        .unwrap();
        let extracted = telegram::extract(&update).unwrap();
        assert_eq!(extracted.chat_id, 555);
        assert_eq!(extracted.callback_query_id.as_deref(), Some("cbq1"));
        assert!(matches!(extracted.incoming, gate_bots::Incoming::Callback(ref d) if d == "mode:practice"));
    }

    #[test]
    fn extract_drops_message_with_no_text_and_no_callback() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": { "chat": { "id": 555 } }
        }))
        .unwrap();
        assert!(telegram::extract(&update).is_none());
    }
}
