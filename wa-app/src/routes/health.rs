use crate::assistant::TurnState;
use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    // A held session lock means a reply is streaming.
    let (authenticated, turn_state) = match state.session.try_lock() {
        Ok(session) => (session.is_authenticated(), session.turn_state()),
        Err(_) => (true, TurnState::AwaitingReply),
    };

    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "session": {
            "authenticated": authenticated,
            "turn_state": turn_state,
        }
    }))
}
