use crate::types::ErrorNotice;
use anyhow::Result;
use async_trait::async_trait;
use wa_llm::{DisplayContent, Role};

/// Rendering collaborator for one chat session.
#[async_trait]
pub trait ChatSurface: Send + Sync {
    /// A turn was committed to the conversation.
    async fn show_turn(&self, role: Role, content: &DisplayContent) -> Result<()>;

    /// A fragment arrived. `text` is the running concatenation so far; it is
    /// never persisted.
    async fn show_partial(&self, delta: &str, text: &str) -> Result<()>;

    /// The in-flight turn failed. Replaces the would-be assistant reply.
    async fn show_error(&self, notice: &ErrorNotice) -> Result<()>;
}
