//! Slash command parser for the terminal REPL.

use crate::assistant::Assistant;
use crate::config::AppConfig;
use crate::session::ChatSession;
use crate::{export, image_input};
use std::path::PathBuf;
use std::time::Duration;
use wa_llm::ImageData;

const HELP: &str = "\
/help                  show this help
/new                   start a new conversation
/model                 show the active and available models
/model use <label|id>  switch model for the next turn
/image <path>          attach an image to the next message (/image clear drops it)
/export [dir]          write the conversation to a timestamped text file
/status                show session status
/logout                lock the session and discard the conversation
/quit                  leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Reply(String),
    Quit,
}

pub struct CommandContext<'a> {
    pub cfg: &'a AppConfig,
    pub assistant: &'a Assistant,
    pub session: &'a mut ChatSession,
    pub pending_image: &'a mut Option<ImageData>,
    pub uptime: Duration,
}

/// Returns `None` when `input` is not a slash command.
pub async fn handle_command(mut ctx: CommandContext<'_>, input: &str) -> Option<CommandOutcome> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (name, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (trimmed, ""),
    };

    let reply = match name {
        "/help" => HELP.to_string(),
        "/quit" | "/exit" => return Some(CommandOutcome::Quit),
        "/new" => match ctx.session.clear() {
            Ok(()) => {
                *ctx.pending_image = None;
                "Started a new conversation.".to_string()
            }
            Err(e) => e.to_string(),
        },
        "/model" => match handle_model_command(&ctx, rest) {
            Some(reply) => reply,
            None => model_switch(ctx.cfg, ctx.assistant, ctx.session, ctx.pending_image, rest),
        },
        "/image" => handle_image(ctx.assistant, ctx.session, ctx.pending_image, rest).await,
        "/export" => handle_export(ctx.cfg, ctx.session, rest).await,
        "/status" => status(&ctx),
        "/logout" => match ctx.session.logout() {
            Ok(()) => {
                *ctx.pending_image = None;
                "Logged out; the conversation was discarded.".to_string()
            }
            Err(e) => e.to_string(),
        },
        _ => format!("Unknown command {name}. Type /help for the list."),
    };
    Some(CommandOutcome::Reply(reply))
}

/// Read-only `/model` forms; `None` means the input asks for a switch.
fn handle_model_command(ctx: &CommandContext<'_>, rest: &str) -> Option<String> {
    let active = match ctx.session.selection() {
        Ok(selection) => selection,
        Err(e) => return Some(e.to_string()),
    };
    let parts: Vec<&str> = rest.split_whitespace().collect();
    if parts.is_empty() {
        return Some(format!(
            "active_model={} ({})\n{}",
            active.label,
            active.id,
            catalogue(ctx.cfg, ctx.assistant)
        ));
    }
    if parts[0].eq_ignore_ascii_case("use") && parts.len() >= 2 {
        return None;
    }
    Some("Usage: /model | /model use <label|id>".to_string())
}

fn model_switch(
    cfg: &AppConfig,
    assistant: &Assistant,
    session: &mut ChatSession,
    pending_image: &mut Option<ImageData>,
    rest: &str,
) -> String {
    let requested = rest
        .split_once(char::is_whitespace)
        .map(|(_, r)| r.trim())
        .unwrap_or_default();
    let Some(entry) = cfg.find_model(requested) else {
        return format!(
            "unknown model {requested:?}. available_models={}",
            cfg.models
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
    };
    let selection = entry.selection();
    if let Err(e) = session.select_model(selection.clone()) {
        return e.to_string();
    }
    let mut reply = format!("model set to {} ({})", selection.label, selection.id);
    let accepts_images = assistant
        .capabilities(&selection)
        .map(|c| c.supports_image_input)
        .unwrap_or(false);
    if pending_image.is_some() && !accepts_images {
        *pending_image = None;
        reply.push_str("\npending image dropped; this model is text-only");
    }
    reply
}

fn catalogue(cfg: &AppConfig, assistant: &Assistant) -> String {
    let mut lines = vec!["available_models:".to_string()];
    for model in &cfg.models {
        let selection = model.selection();
        let provider = selection
            .provider()
            .map(|p| p.as_str())
            .unwrap_or("unknown");
        let images = assistant
            .capabilities(&selection)
            .map(|c| c.supports_image_input)
            .unwrap_or(false);
        lines.push(format!(
            "  {} ({}) provider={provider} images={}",
            model.label,
            model.id,
            if images { "yes" } else { "no" }
        ));
    }
    lines.join("\n")
}

async fn handle_image(
    assistant: &Assistant,
    session: &ChatSession,
    pending_image: &mut Option<ImageData>,
    rest: &str,
) -> String {
    let selection = match session.selection() {
        Ok(selection) => selection,
        Err(e) => return e.to_string(),
    };
    if rest.is_empty() {
        return "Usage: /image <path> | /image clear".to_string();
    }
    if rest.eq_ignore_ascii_case("clear") {
        *pending_image = None;
        return "pending image cleared".to_string();
    }
    match assistant.capabilities(selection) {
        Ok(c) if c.supports_image_input => {}
        Ok(_) => {
            return format!(
                "{} is text-only; switch to an image-capable model first",
                selection.label
            );
        }
        Err(e) => return e.to_string(),
    }
    match image_input::load_image(&PathBuf::from(rest)).await {
        Ok(image) => {
            let reply = format!(
                "image attached ({}, {} bytes); it goes with your next message",
                image.mime_type(),
                image.len()
            );
            *pending_image = Some(image);
            reply
        }
        Err(e) => format!("image error: {e}"),
    }
}

async fn handle_export(cfg: &AppConfig, session: &ChatSession, rest: &str) -> String {
    let store = match session.store() {
        Ok(store) => store,
        Err(e) => return e.to_string(),
    };
    let dir = if rest.is_empty() {
        cfg.export_dir()
    } else {
        PathBuf::from(rest)
    };
    match export::write_transcript(&dir, store.snapshot()).await {
        Ok(path) => format!("exported {}", path.display()),
        Err(e) => format!("export error: {e}"),
    }
}

fn status(ctx: &CommandContext<'_>) -> String {
    let session = &*ctx.session;
    let Ok(selection) = session.selection() else {
        return "session is locked; log in first".to_string();
    };
    let turns = session.store().map(|s| s.len()).unwrap_or(0);
    format!(
        "session_id={}\nmodel={} ({})\ndefault_model={}\nturns={turns}\nturn_state={:?}\npending_image={}\nuptime_seconds={}",
        session.id(),
        selection.label,
        selection.id,
        ctx.cfg.general.default_model,
        session.turn_state(),
        ctx.pending_image
            .as_ref()
            .map(|i| format!("{} ({} bytes)", i.mime_type(), i.len()))
            .unwrap_or_else(|| "none".to_string()),
        ctx.uptime.as_secs()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Gate;
    use wa_llm::{AdapterRegistry, ClientOptions, StaticCredentials, Turn};

    struct Fixture {
        cfg: AppConfig,
        assistant: Assistant,
        session: ChatSession,
        pending_image: Option<ImageData>,
    }

    impl Fixture {
        fn new() -> Self {
            let cfg = AppConfig::default();
            let assistant = Assistant::new(AdapterRegistry::from_credentials(
                &StaticCredentials::new(),
                &ClientOptions::default(),
            ));
            let session = ChatSession::new(
                Gate::password("pw"),
                cfg.default_selection().expect("default model"),
            );
            Self {
                cfg,
                assistant,
                session,
                pending_image: None,
            }
        }

        async fn run(&mut self, input: &str) -> Option<CommandOutcome> {
            handle_command(
                CommandContext {
                    cfg: &self.cfg,
                    assistant: &self.assistant,
                    session: &mut self.session,
                    pending_image: &mut self.pending_image,
                    uptime: Duration::from_secs(3),
                },
                input,
            )
            .await
        }

        async fn reply(&mut self, input: &str) -> String {
            match self.run(input).await {
                Some(CommandOutcome::Reply(text)) => text,
                other => panic!("expected a reply for {input}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn plain_text_is_not_a_command() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("hello there").await, None);
    }

    #[tokio::test]
    async fn quit_and_unknown_commands() {
        let mut fx = Fixture::new();
        assert_eq!(fx.run("/quit").await, Some(CommandOutcome::Quit));
        assert!(fx.reply("/bogus").await.contains("Unknown command"));
        assert!(fx.reply("/help").await.contains("/model use"));
    }

    #[tokio::test]
    async fn locked_session_refuses_state_commands() {
        let mut fx = Fixture::new();
        assert!(fx.reply("/new").await.contains("locked"));
        assert!(fx.reply("/model").await.contains("locked"));
        assert!(fx.reply("/status").await.contains("locked"));
    }

    #[tokio::test]
    async fn model_use_accepts_label_or_id() {
        let mut fx = Fixture::new();
        fx.session.login("pw").expect("login");

        let reply = fx.reply("/model use gpt-4o mini").await;
        assert!(reply.contains("gpt-4o-mini"), "{reply}");
        assert_eq!(fx.session.selection().expect("selection").id, "gpt-4o-mini");

        let reply = fx.reply("/model use GEMINI-2.5-PRO").await;
        assert!(reply.contains("Gemini 2.5 Pro"), "{reply}");

        assert!(fx.reply("/model use claude-3").await.contains("unknown model"));
        assert!(fx.reply("/model").await.contains("images=yes"));
    }

    #[tokio::test]
    async fn switching_to_text_only_model_drops_pending_image() {
        let mut fx = Fixture::new();
        fx.session.login("pw").expect("login");
        fx.pending_image = Some(ImageData::new("image/png", vec![1u8]).expect("png"));

        let reply = fx.reply("/model use gpt-4o").await;
        assert!(reply.contains("pending image dropped"));
        assert!(fx.pending_image.is_none());
        assert!(fx.reply("/image pic.png").await.contains("text-only"));
    }

    #[tokio::test]
    async fn image_command_attaches_file_for_next_turn() {
        let mut fx = Fixture::new();
        fx.session.login("pw").expect("login");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shot.jpeg");
        std::fs::write(&path, [1u8, 2, 3]).expect("write");

        let reply = fx.reply(&format!("/image {}", path.display())).await;
        assert!(reply.contains("image/jpeg"), "{reply}");
        assert_eq!(fx.pending_image.as_ref().map(ImageData::len), Some(3));

        fx.reply("/image clear").await;
        assert!(fx.pending_image.is_none());
    }

    #[tokio::test]
    async fn new_clears_conversation() {
        let mut fx = Fixture::new();
        fx.session.login("pw").expect("login");
        let (store, _) = fx.session.turn_parts();
        store.append(Turn::user("hi", None));
        fx.reply("/new").await;
        assert!(fx.session.store().expect("store").is_empty());
    }

    #[tokio::test]
    async fn export_writes_into_requested_dir() {
        let mut fx = Fixture::new();
        fx.session.login("pw").expect("login");
        let dir = tempfile::tempdir().expect("tempdir");

        assert!(
            fx.reply(&format!("/export {}", dir.path().display()))
                .await
                .contains("empty")
        );

        let (store, _) = fx.session.turn_parts();
        store.append(Turn::user("hi", None));
        store.append(Turn::assistant("hello"));
        let reply = fx.reply(&format!("/export {}", dir.path().display())).await;
        assert!(reply.starts_with("exported"), "{reply}");
        assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 1);
    }

    #[tokio::test]
    async fn logout_locks_session() {
        let mut fx = Fixture::new();
        fx.session.login("pw").expect("login");
        assert!(fx.reply("/logout").await.contains("Logged out"));
        assert!(!fx.session.is_authenticated());
    }

    #[tokio::test]
    async fn status_reports_model_and_turns() {
        let mut fx = Fixture::new();
        fx.session.login("pw").expect("login");
        let reply = fx.reply("/status").await;
        assert!(reply.contains("model=Gemini 2.5 Flash (gemini-2.5-flash)"));
        assert!(reply.contains("turns=0"));
        assert!(reply.contains("uptime_seconds=3"));
    }
}
