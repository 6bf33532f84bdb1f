use crate::credentials::{CredentialSource, GOOGLE_API_KEY, OPENAI_API_KEY};
use crate::error::{LlmError, Result};
use crate::gemini::GeminiAdapter;
use crate::openai::OpenAiAdapter;
use crate::types::{Capabilities, FragmentStream, HistoryEntry, Payload, ProviderKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Model the next turn is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub id: String,
    pub label: String,
}

impl ModelSelection {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    pub fn provider(&self) -> Result<ProviderKind> {
        detect_provider(&self.id).ok_or_else(|| {
            LlmError::Configuration(format!(
                "model {:?} does not belong to a supported provider",
                self.id
            ))
        })
    }
}

/// Maps a model identifier to its provider by namespace prefix.
pub fn detect_provider(model: &str) -> Option<ProviderKind> {
    let m = model.trim().to_ascii_lowercase();
    if m.starts_with("gemini-") {
        return Some(ProviderKind::Gemini);
    }
    if m.starts_with("gpt-") || m.starts_with("chatgpt-") {
        return Some(ProviderKind::OpenAI);
    }
    let reasoning_series = ["o1", "o3", "o4"];
    if reasoning_series
        .iter()
        .any(|p| m == *p || m.starts_with(&format!("{p}-")))
    {
        return Some(ProviderKind::OpenAI);
    }
    None
}

/// A remote chat session bound to its history.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    model: String,
    system: Option<String>,
    history: Vec<HistoryEntry>,
}

impl ChatHandle {
    pub fn new(model: impl Into<String>, system: Option<String>, history: Vec<HistoryEntry>) -> Self {
        Self {
            model: model.into(),
            system,
            history,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }

    /// Binds a session to `history`. Fails with a configuration error before
    /// any network call when the provider credential is absent.
    fn open_session(
        &self,
        selection: &ModelSelection,
        history: Vec<HistoryEntry>,
    ) -> Result<ChatHandle>;

    /// Submits the live turn and returns its reply as ordered fragments.
    async fn send(&self, handle: &ChatHandle, payload: Payload) -> Result<FragmentStream>;
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub gemini_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    /// Inject a one-line persona system entry for providers that take one.
    pub persona: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            gemini_base_url: None,
            openai_base_url: None,
            persona: true,
        }
    }
}

/// Dispatch table from provider kind to adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds both vendor adapters. Credentials are read once, here.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn from_credentials(credentials: &dyn CredentialSource, options: &ClientOptions) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(options.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });

        let google_key = credentials.get(GOOGLE_API_KEY);
        let openai_key = credentials.get(OPENAI_API_KEY);
        tracing::debug!(
            gemini_key_present = google_key.is_some(),
            openai_key_present = openai_key.is_some(),
            "provider credentials resolved"
        );

        Self::new()
            .with_adapter(Arc::new(GeminiAdapter::new(
                http.clone(),
                google_key,
                options.gemini_base_url.as_deref(),
            )))
            .with_adapter(Arc::new(OpenAiAdapter::new(
                http,
                openai_key,
                options.openai_base_url.as_deref(),
                options.persona,
            )))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn adapter(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn resolve(&self, selection: &ModelSelection) -> Result<Arc<dyn ProviderAdapter>> {
        let kind = selection.provider()?;
        self.adapter(kind).ok_or_else(|| {
            LlmError::Configuration(format!("no adapter registered for provider {}", kind.as_str()))
        })
    }

    pub fn capabilities(&self, selection: &ModelSelection) -> Result<Capabilities> {
        Ok(self.resolve(selection)?.capabilities())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;

    #[test]
    fn prefixes_dispatch_to_one_provider() {
        assert_eq!(detect_provider("gemini-2.5-flash"), Some(ProviderKind::Gemini));
        assert_eq!(detect_provider("Gemini-2.5-Pro"), Some(ProviderKind::Gemini));
        assert_eq!(detect_provider("gpt-4o-mini"), Some(ProviderKind::OpenAI));
        assert_eq!(detect_provider("o3-mini"), Some(ProviderKind::OpenAI));
        assert_eq!(detect_provider("o1"), Some(ProviderKind::OpenAI));
        assert_eq!(detect_provider("o100"), None);
        assert_eq!(detect_provider("claude-sonnet-4"), None);
    }

    #[test]
    fn unknown_namespace_is_configuration_error() {
        let registry = AdapterRegistry::from_credentials(
            &StaticCredentials::new(),
            &ClientOptions::default(),
        );
        let err = registry
            .resolve(&ModelSelection::new("llama-3", "Llama"))
            .err()
            .expect("unknown model rejected");
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn registry_reports_capabilities_per_model() {
        let registry = AdapterRegistry::from_credentials(
            &StaticCredentials::new(),
            &ClientOptions::default(),
        );
        let gemini = ModelSelection::new("gemini-2.5-flash", "Gemini");
        let gpt = ModelSelection::new("gpt-4o", "GPT-4o");
        assert!(registry.capabilities(&gemini).expect("gemini").supports_image_input);
        assert!(!registry.capabilities(&gpt).expect("gpt").supports_image_input);
    }

    #[test]
    fn missing_credentials_fail_open_session() {
        let registry = AdapterRegistry::from_credentials(
            &StaticCredentials::new(),
            &ClientOptions::default(),
        );
        for selection in [
            ModelSelection::new("gemini-2.5-flash", "Gemini"),
            ModelSelection::new("gpt-4o", "GPT-4o"),
        ] {
            let adapter = registry.resolve(&selection).expect("adapter");
            let err = adapter
                .open_session(&selection, Vec::new())
                .expect_err("no key");
            assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        }
    }
}
