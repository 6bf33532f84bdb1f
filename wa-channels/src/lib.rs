//! Rendering surfaces for the conversation engine.

mod channel;
mod terminal;
mod traits;
mod types;

pub use channel::ChannelSurface;
pub use terminal::TerminalSurface;
pub use traits::ChatSurface;
pub use types::{ErrorNotice, ImageView, SurfaceEvent, TurnView};
