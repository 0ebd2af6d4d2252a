//! Pro bot: the front-office. A specialist opens one case (a "context"),
//! then launches any of the four tool bots against it by having this
//! handler issue a one-time link token and handing back the `/start`
//! command the specialist forwards into that tool bot.
//!
//! FSM states:
//!   `main_menu`         — idle, showing the case/tool menu
//!   `awaiting_client_id` — Screen launch in progress, waiting for the
//!                          client's numeric Telegram id

use crate::{Handler, HandlerContext, Incoming, KeyboardButton, OutgoingMessage};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

pub const BOT_ID: &str = "pro";

const TOOLS: &[(&str, &str)] = &[
    ("interpretator", "🧠 Интерпретатор"),
    ("conceptualizator", "🧩 Концептуализатор"),
    ("simulator", "🎭 Симулятор"),
];

#[derive(Default)]
pub struct ProHandler;

impl ProHandler {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    async fn start(&self, ctx: &HandlerContext<'_>) -> anyhow::Result<Vec<OutgoingMessage>> {
        let telegram_id = ctx.user_id.unwrap_or(ctx.chat_id);
        let user = ctx.identity.get_or_create_user(telegram_id, "specialist", None, None).await?;

        let payload = json!({ "user_id": user.user_id });
        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, "specialist", "main_menu", payload, None).await?;

        Ok(vec![OutgoingMessage::html(
            "👋 <b>PsycheOS Pro</b>\n\nЭто рабочий кабинет специалиста. Начните с создания кейса, \
             затем запускайте инструменты для текущего клиента.",
        )
        .with_keyboard(main_menu_keyboard(false))])
    }

    async fn handle_callback(&self, ctx: &HandlerContext<'_>, data: &str) -> anyhow::Result<Vec<OutgoingMessage>> {
        if ctx.state.is_none() {
            return Ok(vec![OutgoingMessage::plain("Сессия не найдена. Отправьте /start.")]);
        }
        let mut payload = ctx.payload();

        if data == "new_case" {
            let Some(user_id) = user_id(&payload) else {
                return Ok(vec![OutgoingMessage::plain("Сессия повреждена. Отправьте /start заново.")]);
            };
            let context = ctx.identity.create_context(user_id, None).await?;
            payload["active_context_id"] = json!(context.context_id);
            ctx.fsm
                .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "main_menu", payload, Some(context.context_id))
                .await?;
            return Ok(vec![OutgoingMessage::html(format!(
                "✅ Новый кейс создан: <code>{}</code>\n\nВыберите инструмент:",
                short_id(context.context_id)
            ))
            .with_keyboard(main_menu_keyboard(true))]);
        }

        if data == "menu" {
            return Ok(vec![OutgoingMessage::plain("Главное меню:").with_keyboard(main_menu_keyboard(active_context_id(&payload).is_some()))]);
        }

        let Some(context_id) = active_context_id(&payload) else {
            return Ok(vec![OutgoingMessage::plain("Сначала создайте кейс.").with_keyboard(main_menu_keyboard(false))]);
        };

        if let Some(service_id) = data.strip_prefix("launch:") {
            if service_id == "screen" {
                ctx.fsm
                    .upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "awaiting_client_id", payload, Some(context_id))
                    .await?;
                return Ok(vec![OutgoingMessage::plain(
                    "Отправьте numeric Telegram ID клиента (он может узнать его, например, у @userinfobot).",
                )]);
            }
            if TOOLS.iter().any(|(id, _)| *id == service_id) {
                return self.issue_specialist_link(ctx, context_id, service_id).await;
            }
        }

        if data == "artifacts" {
            return self.list_artifacts(ctx, context_id).await;
        }

        Ok(Vec::new())
    }

    async fn issue_specialist_link(&self, ctx: &HandlerContext<'_>, context_id: Uuid, service_id: &str) -> anyhow::Result<Vec<OutgoingMessage>> {
        let subject_id = ctx.user_id.unwrap_or(ctx.chat_id);
        let token = ctx.link_tokens.issue(service_id, context_id, "specialist", subject_id).await?;
        let label = TOOLS.iter().find(|(id, _)| *id == service_id).map_or(service_id, |(_, l)| l);

        Ok(vec![OutgoingMessage::html(format!(
            "👉 Откройте бота «{label}» и отправьте команду:\n\n<code>/start {}</code>\n\nСсылка действительна 24 часа.",
            token.jti
        ))])
    }

    async fn handle_client_id(&self, ctx: &HandlerContext<'_>, text: &str, payload: Value) -> anyhow::Result<Vec<OutgoingMessage>> {
        let Some(context_id) = active_context_id(&payload) else {
            return Ok(vec![OutgoingMessage::plain("Кейс не найден. Отправьте /start заново.")]);
        };
        let Ok(client_telegram_id) = text.trim().parse::<i64>() else {
            return Ok(vec![OutgoingMessage::plain("Это не похоже на Telegram ID — нужно целое число. Попробуйте ещё раз.")]);
        };

        let specialist_telegram_id = ctx.user_id.unwrap_or(ctx.chat_id);
        let token = ctx.link_tokens.issue("screen", context_id, "client", client_telegram_id).await?;
        ctx.screenings.create(context_id, specialist_telegram_id, Some(client_telegram_id), Some(token.jti)).await?;

        ctx.fsm.upsert(BOT_ID, ctx.chat_id, ctx.user_id, ctx.role(), "main_menu", payload, Some(context_id)).await?;

        Ok(vec![OutgoingMessage::html(format!(
            "✅ Скрининг создан для клиента {client_telegram_id}.\n\n\
             Перешлите клиенту бота «Screen» и попросите отправить:\n\n<code>/start {}</code>\n\nСсылка действительна 24 часа.",
            token.jti
        ))
        .with_keyboard(main_menu_keyboard(true))])
    }

    async fn list_artifacts(&self, ctx: &HandlerContext<'_>, context_id: Uuid) -> anyhow::Result<Vec<OutgoingMessage>> {
        let artifacts = ctx.artifacts.list_by_context(context_id, None).await?;
        if artifacts.is_empty() {
            return Ok(vec![OutgoingMessage::plain("Пока нет материалов по этому кейсу.")]);
        }
        let lines: Vec<String> = artifacts
            .iter()
            .map(|a| {
                format!(
                    "• <b>{}</b> ({}) — {}",
                    a.service_id,
                    a.created_at.format("%Y-%m-%d %H:%M"),
                    a.summary.as_deref().unwrap_or("без резюме"),
                )
            })
            .collect();
        Ok(vec![OutgoingMessage::html(format!("📁 <b>Материалы кейса</b>\n\n{}", lines.join("\n")))])
    }
}

fn user_id(payload: &Value) -> Option<Uuid> {
    payload["user_id"].as_str().and_then(|s| s.parse().ok())
}

fn active_context_id(payload: &Value) -> Option<Uuid> {
    payload["active_context_id"].as_str().and_then(|s| s.parse().ok())
}

fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

fn main_menu_keyboard(has_context: bool) -> Vec<Vec<KeyboardButton>> {
    if !has_context {
        return vec![vec![KeyboardButton { label: "🆕 Начать новый кейс".to_string(), callback_data: "new_case".to_string() }]];
    }
    let mut rows: Vec<Vec<KeyboardButton>> = TOOLS
        .iter()
        .map(|(id, label)| vec![KeyboardButton { label: (*label).to_string(), callback_data: format!("launch:{id}") }])
        .collect();
    rows.push(vec![KeyboardButton { label: "📋 Screen для клиента".to_string(), callback_data: "launch:screen".to_string() }]);
    rows.push(vec![KeyboardButton { label: "📁 Материалы кейса".to_string(), callback_data: "artifacts".to_string() }]);
    rows.push(vec![KeyboardButton { label: "🆕 Новый кейс".to_string(), callback_data: "new_case".to_string() }]);
    rows
}

#[async_trait]
impl Handler for ProHandler {
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

        if text.starts_with("/start") {
            return self.start(&ctx).await;
        }

        if ctx.state_name() == "awaiting_client_id" {
            let payload = ctx.payload();
            return self.handle_client_id(&ctx, text, payload).await;
        }

        let current_state = ctx.state_name().to_string();
        Ok(vec![OutgoingMessage::plain(format!("[Pro] Текущее состояние: {current_state}. Используйте /start, чтобы открыть меню."))])
    }
}
