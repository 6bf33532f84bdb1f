use crate::traits::ChatSurface;
use crate::types::{ErrorNotice, SurfaceEvent, TurnView};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use wa_llm::{DisplayContent, Role};

/// Forwards surface events over a channel, e.g. to an SSE response.
#[derive(Clone)]
pub struct ChannelSurface {
    tx: mpsc::UnboundedSender<SurfaceEvent>,
}

impl ChannelSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SurfaceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Resolves once the receiving side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    fn emit(&self, event: SurfaceEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|e| anyhow::anyhow!("surface receiver dropped: {}", e.0.name()))
    }
}

#[async_trait]
impl ChatSurface for ChannelSurface {
    async fn show_turn(&self, role: Role, content: &DisplayContent) -> Result<()> {
        self.emit(SurfaceEvent::Turn(TurnView::new(role, content)))
    }

    async fn show_partial(&self, delta: &str, text: &str) -> Result<()> {
        self.emit(SurfaceEvent::Partial {
            delta: delta.to_string(),
            text: text.to_string(),
        })
    }

    async fn show_error(&self, notice: &ErrorNotice) -> Result<()> {
        self.emit(SurfaceEvent::Error(notice.clone()))
    }
}
