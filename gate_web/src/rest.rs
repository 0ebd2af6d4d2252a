//! REST API used by the Pro bot host: link issuance/verification and
//! artifact retrieval. Webhook-shaped concerns (secret headers, Telegram
//! update decoding) stop here — this surface speaks plain JSON.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use gate_store::TOOL_SERVICES;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message.into() })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct IssueLinkRequest {
    pub service_id: String,
    pub context_id: Uuid,
    pub role: String,
    pub subject_id: i64,
}

#[derive(Debug, Serialize)]
pub struct IssueLinkResponse {
    pub jti: Uuid,
    pub run_id: Uuid,
    pub start_param: String,
}

fn validate_issue_link(service_id: &str, role: &str) -> Result<(), String> {
    if !TOOL_SERVICES.contains(&service_id) {
        return Err(format!("unknown service_id: {service_id}"));
    }
    if role != "specialist" && role != "client" {
        return Err(format!("unknown role: {role}"));
    }
    if role == "client" && service_id != "screen" {
        return Err("role=client is only valid for service_id=screen".to_string());
    }
    Ok(())
}

pub async fn issue_link(State(state): State<AppState>, Json(req): Json<IssueLinkRequest>) -> Response {
    if let Err(message) = validate_issue_link(&req.service_id, &req.role) {
        return bad_request(message);
    }

    match state.link_tokens.issue(&req.service_id, req.context_id, &req.role, req.subject_id).await {
        Ok(token) => Json(IssueLinkResponse {
            jti: token.jti,
            run_id: token.run_id,
            start_param: token.jti.to_string(),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(%err, "link issue failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyLinkRequest {
    pub raw_token: String,
    pub service_id: String,
    pub subject_id: i64,
}

#[derive(Debug, Serialize)]
pub struct VerifyLinkResponse {
    pub context_id: Uuid,
    pub run_id: Uuid,
    pub role: String,
    pub service_id: String,
}

pub async fn verify_link(State(state): State<AppState>, Json(req): Json<VerifyLinkRequest>) -> Response {
    match state.link_tokens.verify(&req.raw_token, &req.service_id, req.subject_id).await {
        Ok(token) => Json(VerifyLinkResponse {
            context_id: token.context_id,
            run_id: token.run_id,
            role: token.role,
            service_id: token.service_id,
        })
        .into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ArtifactsQuery {
    pub context_id: Uuid,
    pub service_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ArtifactSummary {
    pub artifact_id: Uuid,
    pub service_id: String,
    pub run_id: Uuid,
    pub specialist_telegram_id: i64,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub async fn list_artifacts(State(state): State<AppState>, Query(query): Query<ArtifactsQuery>) -> Response {
    let artifacts = match state
        .artifacts
        .list_by_context(query.context_id, query.service_id.as_deref())
        .await
    {
        Ok(a) => a,
        Err(err) => {
            tracing::error!(%err, "artifact list failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let summaries: Vec<ArtifactSummary> = artifacts
        .into_iter()
        .map(|a| ArtifactSummary {
            artifact_id: a.artifact_id,
            service_id: a.service_id,
            run_id: a.run_id,
            specialist_telegram_id: a.specialist_telegram_id,
            summary: a.summary,
            created_at: a.created_at.with_timezone(&Utc),
        })
        .collect();

    Json(summaries).into_response()
}

pub async fn get_artifact(State(state): State<AppState>, Path(artifact_id): Path<Uuid>) -> Response {
    match state.artifacts.get_by_id(artifact_id).await {
        Ok(Some(artifact)) => Json(artifact.payload).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::error!(%err, "artifact fetch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn healthz(State(state): State<AppState>) -> Response {
    match sea_orm::ConnectionTrait::execute_unprepared(&state.db, "SELECT 1").await {
        Ok(_) => Json(json!({ "ok": true })).into_response(),
        Err(err) => {
            tracing::error!(%err, "healthz db ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "ok": false }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::validate_issue_link;

    #[test]
    fn rejects_unknown_service() {
        assert!(validate_issue_link("not_a_service", "specialist").is_err());
    }

    #[test]
    fn rejects_client_role_on_non_screen_service() {
        assert!(validate_issue_link("interpretator", "client").is_err());
    }

    #[test]
    fn accepts_client_role_on_screen() {
        assert!(validate_issue_link("screen", "client").is_ok());
    }

    #[test]
    fn accepts_specialist_role_on_any_tool_service() {
        assert!(validate_issue_link("simulator", "specialist").is_ok());
    }
}
