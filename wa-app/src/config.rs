//! Work Assistant configuration loader.
//!
//! TOML file first, then environment overrides (after `.env` is loaded).

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wa_llm::{
    APP_PASSWORD, ClientOptions, GOOGLE_API_KEY, ModelSelection, OPENAI_API_KEY,
    StaticCredentials, detect_provider,
};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Inject a one-line persona system message for providers that take one.
    #[serde(default = "default_true")]
    pub persona: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            persona: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct KeysConfig {
    pub app_password: Option<String>,
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        f.debug_struct("KeysConfig")
            .field("app_password", &present(&self.app_password))
            .field("google_api_key", &present(&self.google_api_key))
            .field("openai_api_key", &present(&self.openai_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Open the session gate without a password when `APP_PASSWORD` is unset.
    /// Off unless the operator opts in.
    #[serde(default)]
    pub allow_without_password: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportConfig {
    /// Directory for transcript exports. Default: current directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini_base_url: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelEntry {
    pub label: String,
    pub id: String,
}

impl ModelEntry {
    pub fn selection(&self) -> ModelSelection {
        ModelSelection::new(self.id.clone(), self.label.clone())
    }
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_models() -> Vec<ModelEntry> {
    [
        ("Gemini 2.5 Flash", "gemini-2.5-flash"),
        ("Gemini 2.5 Pro", "gemini-2.5-pro"),
        ("GPT-4o", "gpt-4o"),
        ("GPT-4o mini", "gpt-4o-mini"),
    ]
    .into_iter()
    .map(|(label, id)| ModelEntry {
        label: label.to_string(),
        id: id.to_string(),
    })
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            keys: KeysConfig::default(),
            security: SecurityConfig::default(),
            server: ServerConfig::default(),
            export: ExportConfig::default(),
            providers: ProvidersConfig::default(),
            models: default_models(),
        }
    }
}

impl AppConfig {
    /// Loads the config file, applies environment overrides and validates.
    ///
    /// A missing file at the default location yields built-in defaults; an
    /// explicitly requested file must exist.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("WORK_ASSISTANT_MODEL") {
            self.general.default_model = v;
        }
        if let Some(v) = non_empty(APP_PASSWORD) {
            self.keys.app_password = Some(v);
        }
        if let Some(v) = non_empty(GOOGLE_API_KEY) {
            self.keys.google_api_key = Some(v);
        }
        if let Some(v) = non_empty(OPENAI_API_KEY) {
            self.keys.openai_api_key = Some(v);
        }
        if let Some(v) = non_empty("GEMINI_BASE_URL") {
            self.providers.gemini_base_url = Some(v);
        }
        if let Some(v) = non_empty("OPENAI_BASE_URL") {
            self.providers.openai_base_url = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.models.is_empty() {
            return Err(anyhow::anyhow!("at least one [[models]] entry is required"));
        }
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.label.trim().is_empty() || model.id.trim().is_empty() {
                return Err(anyhow::anyhow!("models entries need a label and an id"));
            }
            if detect_provider(&model.id).is_none() {
                return Err(anyhow::anyhow!(
                    "model {:?} does not map to a supported provider (expected gemini-*, gpt-*, o1/o3/o4)",
                    model.id
                ));
            }
            if !seen.insert(model.id.to_ascii_lowercase()) {
                return Err(anyhow::anyhow!("model id {:?} is listed twice", model.id));
            }
        }
        if self.find_model(&self.general.default_model).is_none() {
            return Err(anyhow::anyhow!(
                "general.default_model {:?} is not in the model catalogue",
                self.general.default_model
            ));
        }
        if self.general.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("general.request_timeout_secs must be > 0"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        Ok(())
    }

    /// Finds a catalogue entry by id or label, case-insensitively.
    pub fn find_model(&self, requested: &str) -> Option<&ModelEntry> {
        let requested = requested.trim();
        self.models
            .iter()
            .find(|m| m.id.eq_ignore_ascii_case(requested))
            .or_else(|| {
                self.models
                    .iter()
                    .find(|m| m.label.eq_ignore_ascii_case(requested))
            })
    }

    pub fn default_selection(&self) -> anyhow::Result<ModelSelection> {
        self.find_model(&self.general.default_model)
            .map(ModelEntry::selection)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "general.default_model {:?} is not in the model catalogue",
                    self.general.default_model
                )
            })
    }

    pub fn credentials(&self) -> StaticCredentials {
        let mut creds = StaticCredentials::new();
        for (key, value) in [
            (APP_PASSWORD, &self.keys.app_password),
            (GOOGLE_API_KEY, &self.keys.google_api_key),
            (OPENAI_API_KEY, &self.keys.openai_api_key),
        ] {
            if let Some(value) = value {
                creds.set(key, value.clone());
            }
        }
        creds
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            request_timeout: Duration::from_secs(self.general.request_timeout_secs),
            gemini_base_url: self.providers.gemini_base_url.clone(),
            openai_base_url: self.providers.openai_base_url.clone(),
            persona: self.general.persona,
        }
    }

    pub fn export_dir(&self) -> PathBuf {
        match &self.export.dir {
            Some(dir) => expand_home(dir),
            None => PathBuf::from("."),
        }
    }
}

pub fn default_home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".work-assistant")
}

pub fn default_config_path() -> PathBuf {
    default_home_dir().join("config.toml")
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var("HOME")) {
        (Ok(rest), Ok(home)) => Path::new(&home).join(rest),
        _ => path.to_path_buf(),
    }
}
