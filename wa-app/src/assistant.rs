//! Turn orchestrator: one user turn in, one streamed assistant turn out.
//!
//! The store only ever receives a complete reply. A failed or abandoned
//! stream leaves the user's turn in place and nothing else.

use crate::config::AppConfig;
use crate::session::{ChatSession, SessionError};
use futures_util::StreamExt;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use wa_channels::{ChatSurface, ErrorNotice};
use wa_llm::{
    AdapterRegistry, Capabilities, FragmentStream, ImageData, LlmError, ModelSelection,
    ProviderAdapter, Role, Turn, current_turn_payload, display_content, fold_unanswered,
    to_provider_history,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingReply,
    /// Transient; the orchestrator returns to `Idle` before `submit` returns.
    Failed,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Provider(#[from] LlmError),
}

impl TurnError {
    pub fn notice(&self) -> ErrorNotice {
        match self {
            Self::Provider(e) => ErrorNotice::from(e),
            Self::Session(e) => ErrorNotice::new("session", e.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnReport {
    pub reply: String,
    pub fragments: usize,
    pub latency: Duration,
}

/// Resets the turn state when the in-flight turn ends, including when the
/// orchestrating future is dropped mid-stream.
struct InFlight<'a> {
    state: &'a mut TurnState,
}

impl<'a> InFlight<'a> {
    fn begin(state: &'a mut TurnState) -> Self {
        *state = TurnState::AwaitingReply;
        Self { state }
    }

    fn fail(&mut self) {
        *self.state = TurnState::Failed;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *self.state = TurnState::Idle;
    }
}

pub struct Assistant {
    registry: AdapterRegistry,
}

impl Assistant {
    pub fn new(registry: AdapterRegistry) -> Self {
        Self { registry }
    }

    /// Builds both vendor adapters from the configured credentials.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(AdapterRegistry::from_credentials(
            &cfg.credentials(),
            &cfg.client_options(),
        ))
    }

    pub fn capabilities(&self, selection: &ModelSelection) -> Result<Capabilities, LlmError> {
        self.registry.capabilities(selection)
    }

    /// Runs one turn to completion or failure. Every failure is also reported
    /// to `surface`.
    #[tracing::instrument(level = "info", skip_all, fields(session_id = %session.id()))]
    pub async fn submit(
        &self,
        session: &mut ChatSession,
        text: &str,
        image: Option<ImageData>,
        surface: &dyn ChatSurface,
    ) -> Result<TurnReport, TurnError> {
        let result = self.run_turn(session, text, image, surface).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "turn failed");
            notify(surface.show_error(&e.notice()).await);
        }
        result
    }

    async fn run_turn(
        &self,
        session: &mut ChatSession,
        text: &str,
        image: Option<ImageData>,
        surface: &dyn ChatSurface,
    ) -> Result<TurnReport, TurnError> {
        session.ensure_authenticated()?;
        if session.turn_state() == TurnState::AwaitingReply {
            return Err(SessionError::Busy.into());
        }
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(LlmError::Validation("message is empty".to_string()).into());
        }

        // Read once: later selection changes do not affect this turn.
        let selection = session.selection()?.clone();
        let kind = selection.provider()?;
        let adapter = self.registry.resolve(&selection)?;
        if image.is_some() && !adapter.capabilities().supports_image_input {
            return Err(LlmError::Validation(format!(
                "{} does not accept images; pick an image-capable model",
                selection.label
            ))
            .into());
        }

        let (store, state) = session.turn_parts();
        store.append(Turn::user(text, image));
        let mut in_flight = InFlight::begin(state);

        let turns = store.snapshot();
        let Some(live) = store.last() else {
            return Err(LlmError::Validation("message store is empty".to_string()).into());
        };
        notify(surface.show_turn(Role::User, &display_content(live)).await);
        tracing::info!(
            model = %selection.id,
            provider = kind.as_str(),
            prior_turns = turns.len() - 1,
            has_image = live.content().image().is_some(),
            "turn started"
        );

        let mut history = to_provider_history(turns, kind, true);
        let mut payload = current_turn_payload(live, kind);
        fold_unanswered(&mut history, &mut payload, kind);
        let started = Instant::now();

        match stream_reply(adapter.as_ref(), &selection, history, payload, surface).await {
            Ok((reply, fragments)) => {
                let turn = Turn::assistant(reply.clone());
                let content = display_content(&turn);
                store.append(turn);
                drop(in_flight);
                notify(surface.show_turn(Role::Assistant, &content).await);
                let latency = started.elapsed();
                tracing::info!(
                    model = %selection.id,
                    latency_ms = latency.as_millis() as u64,
                    fragments,
                    reply_chars = reply.chars().count(),
                    "turn completed"
                );
                Ok(TurnReport {
                    reply,
                    fragments,
                    latency,
                })
            }
            Err(e) => {
                in_flight.fail();
                tracing::warn!(
                    model = %selection.id,
                    error_kind = e.kind().as_str(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "turn failed; nothing committed"
                );
                Err(e.into())
            }
        }
    }
}

/// Opens a session on the adapter and drains its fragments in order.
async fn stream_reply(
    adapter: &dyn ProviderAdapter,
    selection: &ModelSelection,
    history: Vec<wa_llm::HistoryEntry>,
    payload: wa_llm::Payload,
    surface: &dyn ChatSurface,
) -> Result<(String, usize), LlmError> {
    let handle = adapter.open_session(selection, history)?;
    let mut stream: FragmentStream = adapter.send(&handle, payload).await?;
    let mut reply = String::new();
    let mut fragments = 0usize;

    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        if fragment.is_empty() {
            continue;
        }
        fragments = fragments.saturating_add(1);
        reply.push_str(&fragment);
        notify(surface.show_partial(&fragment, &reply).await);
    }

    if reply.is_empty() {
        return Err(LlmError::Transport(format!(
            "{} returned an empty reply",
            selection.id
        )));
    }
    Ok((reply, fragments))
}

/// Rendering failures never abort a turn.
fn notify(result: anyhow::Result<()>) {
    if let Err(e) = result {
        tracing::debug!(error = %e, "surface update failed");
    }
}
