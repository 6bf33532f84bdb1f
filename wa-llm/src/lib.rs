//! Provider-agnostic conversation types and streaming LLM adapters.
//!
//! Two vendors are supported: Gemini (image-capable) and OpenAI chat
//! completions (text-first). Both stream replies over SSE.

mod client;
mod credentials;
mod error;
mod gemini;
mod normalize;
mod openai;
mod sse;
mod types;

pub use client::{
    AdapterRegistry, ChatHandle, ClientOptions, ModelSelection, ProviderAdapter, detect_provider,
};
pub use credentials::{APP_PASSWORD, CredentialSource, GOOGLE_API_KEY, OPENAI_API_KEY, StaticCredentials};
pub use error::{ErrorKind, LlmError, Result};
pub use gemini::GeminiAdapter;
pub use normalize::{
    current_turn_payload, display_content, export_text, fold_unanswered, to_provider_history,
};
pub use openai::{OpenAiAdapter, persona_line};
pub use types::{
    Capabilities, Content, DisplayContent, FragmentStream, HistoryEntry, ImageData, Payload,
    PayloadPart, ProviderKind, Role, SUPPORTED_IMAGE_MIME_TYPES, Turn,
};
