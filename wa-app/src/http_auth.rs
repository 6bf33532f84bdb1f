//! HTTP error mapping and the session gate middleware.

use crate::assistant::TurnError;
use crate::server::AppState;
use crate::session::SessionError;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde_json::json;
use std::sync::Arc;
use wa_llm::{ErrorKind, LlmError};

pub const SESSION_PREFIX: &str = "/api/v1/session";
pub const LOGIN_PATH: &str = "/api/v1/session/login";

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub hint: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            hint: None,
        }
    }

    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message.to_string())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let (status, code) = match e {
            SessionError::Locked => (StatusCode::UNAUTHORIZED, "locked"),
            SessionError::WrongPassword => (StatusCode::UNAUTHORIZED, "wrong_password"),
            SessionError::GateMisconfigured => {
                (StatusCode::SERVICE_UNAVAILABLE, "gate_misconfigured")
            }
            SessionError::Busy => (StatusCode::CONFLICT, "busy"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<LlmError> for ApiError {
    fn from(e: LlmError) -> Self {
        let status = match e.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            code: e.kind().as_str(),
            message: e.to_string(),
            hint: e.hint().map(str::to_string),
        }
    }
}

impl From<TurnError> for ApiError {
    fn from(e: TurnError) -> Self {
        match e {
            TurnError::Session(e) => e.into(),
            TurnError::Provider(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(error_code = self.code, error = %self.message, "request failed");
        }
        let mut body = serde_json::Map::new();
        body.insert("status".to_string(), json!("error"));
        body.insert("error".to_string(), json!(self.message));
        body.insert("error_code".to_string(), json!(self.code));
        if let Some(hint) = self.hint {
            body.insert("hint".to_string(), json!(hint));
        }
        (self.status, Json(serde_json::Value::Object(body))).into_response()
    }
}

fn is_gated(path: &str) -> bool {
    let Some(rest) = path.strip_prefix(SESSION_PREFIX) else {
        return false;
    };
    (rest.is_empty() || rest.starts_with('/')) && path != LOGIN_PATH
}

/// Rejects session routes with 401 until the gate has been opened.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_unlocked(
    Extension(state): Extension<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !is_gated(req.uri().path()) {
        return next.run(req).await;
    }
    // A held lock means a turn is streaming, which required an open gate.
    let locked = match state.session.try_lock() {
        Ok(session) => !session.is_authenticated(),
        Err(_) => false,
    };
    if locked {
        tracing::debug!(path = %req.uri().path(), "session route rejected; gate closed");
        return ApiError::from(SessionError::Locked).into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        serde_json::from_slice(&body).expect("response json")
    }

    #[test]
    fn gate_covers_session_routes_except_login() {
        assert!(is_gated("/api/v1/session/messages"));
        assert!(is_gated("/api/v1/session/turns"));
        assert!(!is_gated("/api/v1/session/login"));
        assert!(!is_gated("/api/v1/sessions"));
        assert!(!is_gated("/api/v1/health"));
        assert!(!is_gated("/api/v1/models"));
    }

    #[test]
    fn session_errors_map_to_statuses() {
        assert_eq!(
            ApiError::from(SessionError::Locked).status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(SessionError::Busy).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SessionError::GateMisconfigured).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn rate_limit_response_carries_hint() {
        let response =
            ApiError::from(LlmError::RateLimit("quota exhausted".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert_eq!(body["error_code"], "rate_limit");
        assert!(body["hint"].as_str().is_some());
    }
}
