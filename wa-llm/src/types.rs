use crate::error::{LlmError, Result};
use base64::Engine;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

pub const SUPPORTED_IMAGE_MIME_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Opaque image payload. Pixel data is never inspected.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    mime_type: String,
    bytes: Bytes,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Result<Self> {
        let mime_type = mime_type.into().trim().to_ascii_lowercase();
        if !SUPPORTED_IMAGE_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(LlmError::Validation(format!(
                "unsupported image type {mime_type:?}; expected one of {}",
                SUPPORTED_IMAGE_MIME_TYPES.join(", ")
            )));
        }
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(LlmError::Validation("image is empty".to_string()));
        }
        Ok(Self { mime_type, bytes })
    }

    pub fn from_base64(mime_type: impl Into<String>, data: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| LlmError::Validation(format!("image is not valid base64: {e}")))?;
        Self::new(mime_type, bytes)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    TextWithImage(String, ImageData),
}

impl Content {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::TextWithImage(text, _) => text,
        }
    }

    pub fn image(&self) -> Option<&ImageData> {
        match self {
            Self::Text(_) => None,
            Self::TextWithImage(_, image) => Some(image),
        }
    }
}

/// One user or assistant contribution. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    content: Content,
}

impl Turn {
    pub fn user(text: impl Into<String>, image: Option<ImageData>) -> Self {
        let text = text.into();
        let content = match image {
            Some(image) => Content::TextWithImage(text, image),
            None => Content::Text(text),
        };
        Self {
            role: Role::User,
            content,
        }
    }

    /// Assistant turns only ever carry text.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(text.into()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn text(&self) -> &str {
        self.content.text()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAI => "openai",
        }
    }

    /// Role token the provider expects in its history entries.
    pub fn role_token(self, role: Role) -> &'static str {
        match (self, role) {
            (_, Role::User) => "user",
            (Self::Gemini, Role::Assistant) => "model",
            (Self::OpenAI, Role::Assistant) => "assistant",
        }
    }

    /// Static capability table, shared by the adapters and the normalizer.
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Gemini => Capabilities {
                supports_image_input: true,
            },
            Self::OpenAI => Capabilities {
                supports_image_input: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub supports_image_input: bool,
}

/// One provider-shaped history entry: the provider's role token plus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadPart {
    Text(String),
    Image(ImageData),
}

/// Content of the turn being submitted live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub parts: Vec<PayloadPart>,
}

impl Payload {
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                PayloadPart::Text(text) => Some(text.as_str()),
                PayloadPart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, PayloadPart::Image(_)))
    }
}

/// What the rendering collaborator receives for a stored turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayContent {
    Text(String),
    TextWithImage { text: String, image: ImageData },
}

/// Lazy, finite, non-restartable sequence of non-empty text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_rejects_unknown_mime_and_empty_bytes() {
        assert!(ImageData::new("application/pdf", vec![1u8, 2, 3]).is_err());
        assert!(ImageData::new("image/png", Vec::<u8>::new()).is_err());
        let ok = ImageData::new("IMAGE/PNG", vec![1u8]).expect("png accepted");
        assert_eq!(ok.mime_type(), "image/png");
    }

    #[test]
    fn image_base64_roundtrip_keeps_bytes() {
        let image = ImageData::new("image/jpeg", vec![0xffu8, 0xd8, 0xff]).expect("jpeg");
        let decoded = ImageData::from_base64("image/jpeg", &image.to_base64()).expect("decode");
        assert_eq!(decoded, image);
        assert!(image.to_data_url().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn user_turn_with_image_is_text_with_image() {
        let image = ImageData::new("image/png", vec![1u8]).expect("png");
        let turn = Turn::user("caption", Some(image.clone()));
        assert_eq!(turn.role(), Role::User);
        assert_eq!(turn.text(), "caption");
        assert_eq!(turn.content().image(), Some(&image));
        assert_eq!(Turn::assistant("hi").content(), &Content::Text("hi".to_string()));
    }

    #[test]
    fn role_tokens_follow_provider_scheme() {
        assert_eq!(ProviderKind::Gemini.role_token(Role::Assistant), "model");
        assert_eq!(ProviderKind::OpenAI.role_token(Role::Assistant), "assistant");
        assert_eq!(ProviderKind::Gemini.role_token(Role::User), "user");
        assert!(ProviderKind::Gemini.capabilities().supports_image_input);
        assert!(!ProviderKind::OpenAI.capabilities().supports_image_input);
    }
}
