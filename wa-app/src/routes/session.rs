use crate::export::export_filename;
use crate::http_auth::ApiError;
use crate::server::AppState;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json};
use chrono::Local;
use serde::Deserialize;
use std::sync::Arc;
use wa_channels::TurnView;
use wa_llm::{display_content, export_text};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoginRequest {
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetModelRequest {
    model: String,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/session/login", post(login))
        .route("/api/v1/session/logout", post(logout))
        .route(
            "/api/v1/session/messages",
            get(list_messages).delete(clear_messages),
        )
        .route("/api/v1/session/model", put(set_model))
        .route("/api/v1/session/export", get(export_transcript))
}

#[tracing::instrument(level = "info", skip_all)]
async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.try_session()?;
    session.login(&req.password)?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "session_id": session.id(),
    })))
}

#[tracing::instrument(level = "info", skip_all)]
async fn logout(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.try_session()?;
    session.logout()?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_messages(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state.try_session()?;
    let store = session.store()?;
    let selection = session.selection()?;
    let messages: Vec<TurnView> = store
        .snapshot()
        .iter()
        .map(|turn| TurnView::new(turn.role(), &display_content(turn)))
        .collect();
    Ok(Json(serde_json::json!({
        "session_id": session.id(),
        "created_at": session.created_at(),
        "last_active": session.last_active(),
        "model": { "label": selection.label, "id": selection.id },
        "turn_state": session.turn_state(),
        "messages": messages,
    })))
}

#[tracing::instrument(level = "info", skip_all)]
async fn clear_messages(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut session = state.try_session()?;
    session.clear()?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[tracing::instrument(level = "info", skip_all)]
async fn set_model(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<SetModelRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(entry) = state.cfg.find_model(&req.model) else {
        let available: Vec<&str> = state.cfg.models.iter().map(|m| m.id.as_str()).collect();
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "unknown_model",
            format!(
                "unknown model {:?}; available: {}",
                req.model.trim(),
                available.join(",")
            ),
        ));
    };
    let selection = entry.selection();
    let capabilities = state.assistant.capabilities(&selection)?;

    let mut session = state.try_session()?;
    session.select_model(selection.clone())?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "model": { "label": selection.label, "id": selection.id },
        "supports_image_input": capabilities.supports_image_input,
    })))
}

#[tracing::instrument(level = "info", skip_all)]
async fn export_transcript(Extension(state): Extension<Arc<AppState>>) -> Result<Response, ApiError> {
    let session = state.try_session()?;
    let store = session.store()?;
    let filename = export_filename(Local::now());
    tracing::info!(turns = store.len(), %filename, "transcript exported over http");
    Ok((
        [
            (CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        export_text(store.snapshot()),
    )
        .into_response())
}
