//! Single-user session context: the gate, the message store and the active
//! model selection.

use crate::assistant::TurnState;
use crate::config::AppConfig;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use wa_llm::{CredentialSource, ModelSelection, Role, Turn, APP_PASSWORD};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is locked; log in first")]
    Locked,
    #[error("wrong password")]
    WrongPassword,
    #[error(
        "no APP_PASSWORD is configured; set one or enable security.allow_without_password"
    )]
    GateMisconfigured,
    #[error("a reply is still streaming; wait for it to finish")]
    Busy,
}

/// Ordered log of turns for the active session.
///
/// Every assistant turn answers the user turn before it. A failed turn leaves
/// its user turn unanswered, so a resubmission may follow it directly. That
/// is a caller contract, checked only in debug builds.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    turns: Vec<Turn>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        debug_assert!(
            turn.role() == Role::User || self.turns.last().map(Turn::role) == Some(Role::User),
            "an assistant turn must follow a user turn"
        );
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

#[derive(Clone)]
pub enum Gate {
    Password([u8; 32]),
    /// Operator explicitly allowed running without a password.
    Open,
    /// No password and no explicit opt-out: the gate never opens.
    Misconfigured,
}

impl Gate {
    pub fn password(secret: &str) -> Self {
        Self::Password(digest(secret))
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        match cfg.credentials().get(APP_PASSWORD) {
            Some(secret) => Self::password(&secret),
            None if cfg.security.allow_without_password => {
                tracing::warn!("APP_PASSWORD is not set; session gate is open by configuration");
                Self::Open
            }
            None => Self::Misconfigured,
        }
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Gate::Password(..)"),
            Self::Open => f.write_str("Gate::Open"),
            Self::Misconfigured => f.write_str("Gate::Misconfigured"),
        }
    }
}

fn digest(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

#[derive(Debug)]
pub struct ChatSession {
    id: Uuid,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
    gate: Gate,
    authenticated: bool,
    store: MessageStore,
    selection: ModelSelection,
    turn_state: TurnState,
}

impl ChatSession {
    pub fn new(gate: Gate, selection: ModelSelection) -> Self {
        let now = Utc::now();
        let authenticated = matches!(gate, Gate::Open);
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_active: now,
            gate,
            authenticated,
            store: MessageStore::new(),
            selection,
            turn_state: TurnState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.last_active
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The only operation allowed while the session is locked.
    pub fn login(&mut self, password: &str) -> Result<(), SessionError> {
        let ok = match &self.gate {
            Gate::Open => true,
            Gate::Password(expected) => digest(password) == *expected,
            Gate::Misconfigured => return Err(SessionError::GateMisconfigured),
        };
        if !ok {
            tracing::warn!(session_id = %self.id, "login rejected");
            return Err(SessionError::WrongPassword);
        }
        self.authenticated = true;
        self.touch();
        tracing::info!(session_id = %self.id, "session unlocked");
        Ok(())
    }

    /// Closes the gate and discards the conversation.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.authenticated = matches!(self.gate, Gate::Open);
        self.store.clear();
        self.touch();
        tracing::info!(session_id = %self.id, "session locked");
        Ok(())
    }

    pub fn ensure_authenticated(&self) -> Result<(), SessionError> {
        if self.authenticated {
            Ok(())
        } else {
            Err(SessionError::Locked)
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.turn_state == TurnState::AwaitingReply {
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    pub fn store(&self) -> Result<&MessageStore, SessionError> {
        self.ensure_authenticated()?;
        Ok(&self.store)
    }

    /// Replaces the conversation with an empty one.
    pub fn clear(&mut self) -> Result<(), SessionError> {
        self.ensure_authenticated()?;
        self.ensure_idle()?;
        self.store.clear();
        self.touch();
        Ok(())
    }

    pub fn selection(&self) -> Result<&ModelSelection, SessionError> {
        self.ensure_authenticated()?;
        Ok(&self.selection)
    }

    pub fn select_model(&mut self, selection: ModelSelection) -> Result<(), SessionError> {
        self.ensure_authenticated()?;
        self.ensure_idle()?;
        tracing::info!(
            session_id = %self.id,
            from = %self.selection.id,
            to = %selection.id,
            "model selection changed"
        );
        self.selection = selection;
        self.touch();
        Ok(())
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    /// Disjoint borrows for the orchestrator while a turn is in flight.
    pub(crate) fn turn_parts(&mut self) -> (&mut MessageStore, &mut TurnState) {
        self.touch();
        (&mut self.store, &mut self.turn_state)
    }

    fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection() -> ModelSelection {
        ModelSelection::new("gemini-2.5-flash", "Gemini 2.5 Flash")
    }

    #[test]
    fn locked_session_rejects_everything_but_login() {
        let mut session = ChatSession::new(Gate::password("s3cret"), selection());
        assert!(!session.is_authenticated());
        assert_eq!(session.store().err(), Some(SessionError::Locked));
        assert_eq!(session.clear(), Err(SessionError::Locked));
        assert_eq!(
            session.select_model(ModelSelection::new("gpt-4o", "GPT-4o")),
            Err(SessionError::Locked)
        );
        assert_eq!(session.login("nope"), Err(SessionError::WrongPassword));
        session.login("s3cret").expect("login");
        assert!(session.store().expect("store").is_empty());
    }

    #[test]
    fn missing_password_without_opt_in_never_opens() {
        let mut session = ChatSession::new(Gate::Misconfigured, selection());
        assert_eq!(session.login(""), Err(SessionError::GateMisconfigured));
        assert!(!session.is_authenticated());
    }

    #[test]
    fn explicit_open_gate_starts_unlocked() {
        let session = ChatSession::new(Gate::Open, selection());
        assert!(session.is_authenticated());
    }

    #[test]
    fn gate_from_config_follows_password_and_opt_in() {
        let mut cfg = AppConfig::default();
        assert!(matches!(Gate::from_config(&cfg), Gate::Misconfigured));
        cfg.security.allow_without_password = true;
        assert!(matches!(Gate::from_config(&cfg), Gate::Open));
        cfg.keys.app_password = Some("pw".to_string());
        assert!(matches!(Gate::from_config(&cfg), Gate::Password(_)));
    }

    #[test]
    fn logout_closes_gate_and_discards_history() {
        let mut session = ChatSession::new(Gate::password("pw"), selection());
        session.login("pw").expect("login");
        let (store, _) = session.turn_parts();
        store.append(Turn::user("hello", None));
        session.logout().expect("logout");
        assert!(!session.is_authenticated());
        session.login("pw").expect("login again");
        assert!(session.store().expect("store").is_empty());
    }

    #[test]
    fn clear_is_idempotent() {
        let mut session = ChatSession::new(Gate::Open, selection());
        let (store, _) = session.turn_parts();
        store.append(Turn::user("a", None));
        store.append(Turn::assistant("b"));
        session.clear().expect("clear");
        session.clear().expect("clear again");
        assert_eq!(session.store().expect("store").len(), 0);
    }

    #[test]
    fn busy_session_refuses_model_change_and_clear() {
        let mut session = ChatSession::new(Gate::Open, selection());
        let (_, state) = session.turn_parts();
        *state = TurnState::AwaitingReply;
        assert_eq!(session.clear(), Err(SessionError::Busy));
        assert_eq!(
            session.select_model(ModelSelection::new("gpt-4o", "GPT-4o")),
            Err(SessionError::Busy)
        );
    }

    #[test]
    fn user_turn_may_follow_an_unanswered_user_turn() {
        let mut store = MessageStore::new();
        store.append(Turn::user("Hello", None));
        store.append(Turn::user("Hello", None));
        store.append(Turn::assistant("Hi there"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    #[should_panic(expected = "an assistant turn must follow a user turn")]
    #[cfg(debug_assertions)]
    fn assistant_turn_without_question_is_a_caller_bug() {
        let mut store = MessageStore::new();
        store.append(Turn::assistant("unprompted"));
    }

    #[test]
    fn store_snapshot_preserves_insertion_order() {
        let mut store = MessageStore::new();
        store.append(Turn::user("one", None));
        store.append(Turn::assistant("two"));
        store.append(Turn::user("three", None));
        let texts: Vec<&str> = store.snapshot().iter().map(Turn::text).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(store.last().map(Turn::text), Some("three"));
    }
}
