//! HTTP server: one gated chat session behind a small JSON + SSE API.

use crate::assistant::Assistant;
use crate::config::AppConfig;
use crate::http_auth::{self, ApiError};
use crate::routes;
use crate::session::{ChatSession, Gate, SessionError};
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use wa_llm::{CredentialSource, GOOGLE_API_KEY, OPENAI_API_KEY};

const HTTP_MAX_IN_FLIGHT: usize = 64;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    pub cfg: AppConfig,
    pub assistant: Assistant,
    pub session: Arc<Mutex<ChatSession>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(cfg: AppConfig, assistant: Assistant) -> Result<Self> {
        let session = ChatSession::new(Gate::from_config(&cfg), cfg.default_selection()?);
        Ok(Self::with_session(cfg, assistant, session))
    }

    pub fn with_session(cfg: AppConfig, assistant: Assistant, session: ChatSession) -> Self {
        Self {
            cfg,
            assistant,
            session: Arc::new(Mutex::new(session)),
            started_at: Instant::now(),
        }
    }

    /// The session for one request. A streaming turn holds it for the whole
    /// reply, so contention is reported as busy rather than waited on.
    pub fn try_session(&self) -> Result<OwnedMutexGuard<ChatSession>, ApiError> {
        self.session
            .clone()
            .try_lock_owned()
            .map_err(|_| ApiError::from(SessionError::Busy))
    }
}

/// API routes with the session gate and shared state attached.
pub fn router(state: Arc<AppState>) -> axum::Router {
    routes::router()
        .layer(axum::middleware::from_fn(http_auth::require_unlocked))
        .layer(Extension(state))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let selection = cfg.default_selection()?;
    let creds = cfg.credentials();
    let gate = Gate::from_config(&cfg);
    tracing::info!(
        default_model = %selection.id,
        provider = selection.provider()?.as_str(),
        models = cfg.models.len(),
        gate = ?gate,
        google_api_key = creds.get(GOOGLE_API_KEY).is_some(),
        openai_api_key = creds.get(OPENAI_API_KEY).is_some(),
        "config ok"
    );
    println!("config ok");
    println!("default model: {} ({})", selection.label, selection.id);
    println!("session gate: {gate:?}");
    for (key, present) in [
        (GOOGLE_API_KEY, creds.get(GOOGLE_API_KEY).is_some()),
        (OPENAI_API_KEY, creds.get(OPENAI_API_KEY).is_some()),
    ] {
        println!("{key}: {}", if present { "set" } else { "missing" });
    }
    if matches!(gate, Gate::Misconfigured) {
        println!("warning: APP_PASSWORD is not set; the session cannot be unlocked");
    }
    Ok(())
}

pub async fn list_models(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let assistant = Assistant::from_config(&cfg);
    for model in &cfg.models {
        let selection = model.selection();
        let provider = selection.provider()?;
        let images = assistant.capabilities(&selection)?.supports_image_input;
        let marker = if model.id.eq_ignore_ascii_case(&cfg.general.default_model)
            || model.label.eq_ignore_ascii_case(&cfg.general.default_model)
        {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {:<20} {:<20} provider={:<7} images={}",
            model.label,
            model.id,
            provider.as_str(),
            if images { "yes" } else { "no" }
        );
    }
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let addr: SocketAddr = format!("{}:{}", cfg.server.bind, cfg.server.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "invalid server address {}:{}: {e}",
                cfg.server.bind,
                cfg.server.port
            )
        })?;
    tracing::info!(
        bind_addr = %addr,
        default_model = %cfg.general.default_model,
        models = cfg.models.len(),
        request_timeout_secs = cfg.general.request_timeout_secs,
        "server configuration loaded"
    );

    let listener = preflight_bind_listener(addr).await?;
    let assistant = Assistant::from_config(&cfg);
    let state = Arc::new(AppState::new(cfg, assistant)?);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = router(state)
        .layer(GlobalConcurrencyLimitLayer::new(HTTP_MAX_IN_FLIGHT))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            HTTP_TIMEOUT,
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "work-assistant serving");
    println!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind {addr}: {e}"))
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
}
