use crate::traits::ChatSurface;
use crate::types::ErrorNotice;
use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;
use wa_llm::{DisplayContent, Role};

/// Line-oriented surface for the interactive REPL.
///
/// Fragments are printed as they arrive; the committed assistant turn is not
/// printed a second time.
pub struct TerminalSurface<W: Write + Send = std::io::Stdout> {
    inner: Mutex<TerminalState<W>>,
}

struct TerminalState<W> {
    out: W,
    streaming: bool,
}

impl TerminalSurface<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Mutex::new(TerminalState {
                out,
                streaming: false,
            }),
        }
    }

    pub fn into_inner(self) -> W {
        match self.inner.into_inner() {
            Ok(state) => state.out,
            Err(poisoned) => poisoned.into_inner().out,
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TerminalState<W>) -> Result<T>) -> Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("terminal surface lock poisoned"))?;
        f(&mut guard)
    }
}

fn role_prefix(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl<W: Write + Send> ChatSurface for TerminalSurface<W> {
    async fn show_turn(&self, role: Role, content: &DisplayContent) -> Result<()> {
        self.with_state(|state| {
            if role == Role::Assistant && state.streaming {
                state.streaming = false;
                writeln!(state.out)?;
                writeln!(state.out)?;
                state.out.flush()?;
                return Ok(());
            }
            match content {
                DisplayContent::Text(text) => {
                    writeln!(state.out, "{}> {text}", role_prefix(role))?;
                }
                DisplayContent::TextWithImage { text, image } => {
                    writeln!(state.out, "{}> {text}", role_prefix(role))?;
                    writeln!(
                        state.out,
                        "    [image: {}, {} bytes]",
                        image.mime_type(),
                        image.len()
                    )?;
                }
            }
            if role == Role::Assistant {
                writeln!(state.out)?;
            }
            state.out.flush()?;
            Ok(())
        })
    }

    async fn show_partial(&self, delta: &str, _text: &str) -> Result<()> {
        self.with_state(|state| {
            if !state.streaming {
                state.streaming = true;
                write!(state.out, "{}> ", role_prefix(Role::Assistant))?;
            }
            write!(state.out, "{delta}")?;
            state.out.flush()?;
            Ok(())
        })
    }

    async fn show_error(&self, notice: &ErrorNotice) -> Result<()> {
        self.with_state(|state| {
            if state.streaming {
                state.streaming = false;
                writeln!(state.out)?;
            }
            writeln!(state.out, "error ({}): {}", notice.kind, notice.message)?;
            if let Some(hint) = notice.hint.as_deref() {
                writeln!(state.out, "hint: {hint}")?;
            }
            writeln!(state.out)?;
            state.out.flush()?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(surface: TerminalSurface<Vec<u8>>) -> String {
        String::from_utf8(surface.into_inner()).expect("utf8")
    }

    #[tokio::test]
    async fn streamed_reply_is_not_printed_twice() {
        let surface = TerminalSurface::new(Vec::new());
        surface.show_partial("Hi", "Hi").await.expect("partial");
        surface
            .show_partial(" there", "Hi there")
            .await
            .expect("partial");
        surface
            .show_turn(
                Role::Assistant,
                &DisplayContent::Text("Hi there".to_string()),
            )
            .await
            .expect("turn");
        assert_eq!(output(surface), "assistant> Hi there\n\n");
    }

    #[tokio::test]
    async fn error_breaks_partial_line_and_shows_hint() {
        let surface = TerminalSurface::new(Vec::new());
        surface.show_partial("Hal", "Hal").await.expect("partial");
        surface
            .show_error(&ErrorNotice::new("rate_limit", "quota").with_hint("switch model"))
            .await
            .expect("error");
        let out = output(surface);
        assert!(out.starts_with("assistant> Hal\nerror (rate_limit): quota\nhint: switch model\n"));
    }

    #[tokio::test]
    async fn image_turns_render_a_marker() {
        let surface = TerminalSurface::new(Vec::new());
        let image = wa_llm::ImageData::new("image/jpeg", vec![1u8; 10]).expect("jpeg");
        surface
            .show_turn(
                Role::User,
                &DisplayContent::TextWithImage {
                    text: "look".to_string(),
                    image,
                },
            )
            .await
            .expect("turn");
        assert_eq!(output(surface), "you> look\n    [image: image/jpeg, 10 bytes]\n");
    }
}
