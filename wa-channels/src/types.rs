use serde::Serialize;
use wa_llm::{DisplayContent, LlmError, Role};

/// Terminal failure of a turn, as shown in place of the assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorNotice {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<&LlmError> for ErrorNotice {
    fn from(e: &LlmError) -> Self {
        let notice = Self::new(e.kind().as_str(), e.to_string());
        match e.hint() {
            Some(hint) => notice.with_hint(hint),
            None => notice,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageView {
    pub mime_type: String,
    pub bytes: usize,
    pub data_url: String,
}

/// A stored turn in transport-friendly form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnView {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageView>,
}

impl TurnView {
    pub fn new(role: Role, content: &DisplayContent) -> Self {
        match content {
            DisplayContent::Text(text) => Self {
                role,
                text: text.clone(),
                image: None,
            },
            DisplayContent::TextWithImage { text, image } => Self {
                role,
                text: text.clone(),
                image: Some(ImageView {
                    mime_type: image.mime_type().to_string(),
                    bytes: image.len(),
                    data_url: image.to_data_url(),
                }),
            },
        }
    }
}

/// Everything a surface can be told, as a single event type for channel
/// based surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SurfaceEvent {
    Turn(TurnView),
    Partial { delta: String, text: String },
    Error(ErrorNotice),
}

impl SurfaceEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Turn(_) => "turn",
            Self::Partial { .. } => "partial",
            Self::Error(_) => "error",
        }
    }
}
