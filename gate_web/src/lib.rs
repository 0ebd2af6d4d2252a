//! The HTTP surface: one `axum::Router` serving all five webhook paths
//! plus the REST API the Pro bot host calls, as one socket/one process
//! per §5's concurrency model.

pub mod rest;
pub mod state;
pub mod telegram;
mod webhook;

use axum::Router;
use axum::routing::{get, post};

pub use state::AppState;
pub use telegram::{HttpTelegramApi, TelegramApi};

#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/{bot_id}", post(webhook::handle_webhook))
        .route("/v1/links/issue", post(rest::issue_link))
        .route("/v1/links/verify", post(rest::verify_link))
        .route("/v1/artifacts", get(rest::list_artifacts))
        .route("/v1/artifacts/{id}", get(rest::get_artifact))
        .route("/healthz", get(rest::healthz))
        .with_state(state)
}
