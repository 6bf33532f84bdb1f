use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    RateLimit,
    Transport,
    Validation,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::RateLimit => "rate_limit",
            Self::Transport => "transport",
            Self::Validation => "validation",
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing or invalid credential. Needs operator action.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider reported quota exhaustion or asked the caller to back off.
    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Caller-contract violation, e.g. an image sent to a text-only provider.
    #[error("invalid input: {0}")]
    Validation(String),
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::RateLimit(_) => ErrorKind::RateLimit,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Short guidance shown next to the error text.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Configuration(_) => Some("check the API key configuration and restart"),
            Self::RateLimit(_) => {
                Some("the provider quota is exhausted; switch to another model or provider")
            }
            Self::Transport(_) | Self::Validation(_) => None,
        }
    }

    /// Classifies a non-success HTTP response from a provider.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        let detail = extract_error_message(body).unwrap_or_else(|| body.trim().to_string());
        if status == 429 || is_rate_limit_signal(body) {
            return Self::RateLimit(format!("{provider} status={status}: {detail}"));
        }
        if status == 401 || status == 403 {
            return Self::Configuration(format!(
                "{provider} rejected the credential status={status}: {detail}"
            ));
        }
        Self::Transport(format!("{provider} status={status}: {detail}"))
    }
}

/// Resource-exhausted markers used by the supported providers, both in HTTP
/// error bodies and in mid-stream error events.
pub(crate) fn is_rate_limit_signal(body: &str) -> bool {
    const MARKERS: [&str; 3] = ["RESOURCE_EXHAUSTED", "rate_limit_exceeded", "insufficient_quota"];
    MARKERS.iter().any(|m| body.contains(m))
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    // Gemini wraps errors in a single-element array on some endpoints.
    let value = match value {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(e: serde_json::Error) -> Self {
        Self::Transport(format!("unexpected response format: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_rate_limit() {
        let err = LlmError::from_status("gemini", 429, "");
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.hint().is_some());
    }

    #[test]
    fn resource_exhausted_body_is_rate_limit_even_without_429() {
        let body = r#"{"error":{"code":400,"message":"quota","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = LlmError::from_status("gemini", 400, body);
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.to_string().contains("quota"));
    }

    #[test]
    fn unauthorized_is_configuration() {
        let err = LlmError::from_status("openai", 401, r#"{"error":{"message":"bad key"}}"#);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn other_statuses_are_transport() {
        let err = LlmError::from_status("openai", 500, "upstream exploded");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("upstream exploded"));
        assert!(err.hint().is_none());
    }
}
