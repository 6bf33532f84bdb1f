//! Terminal REPL: read a line, run a turn or a slash command, print the reply.

use crate::assistant::Assistant;
use crate::commands::{self, CommandContext, CommandOutcome};
use crate::config::AppConfig;
use crate::session::{ChatSession, Gate, SessionError};
use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use wa_channels::TerminalSurface;
use wa_llm::ImageData;

type InputLines = Lines<BufReader<Stdin>>;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = AppConfig::load(config_path).await?;
    let assistant = Assistant::from_config(&cfg);
    let mut session = ChatSession::new(Gate::from_config(&cfg), cfg.default_selection()?);
    let surface = TerminalSurface::stdout();
    let started_at = Instant::now();
    let mut pending_image: Option<ImageData> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!(
        session_id = %session.id(),
        model = %cfg.general.default_model,
        "chat session started"
    );
    println!("work-assistant. Type /help for commands, /quit to leave.");

    loop {
        if !session.is_authenticated() && !login(&mut session, &mut lines).await? {
            break;
        }

        prompt("> ")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let ctx = CommandContext {
            cfg: &cfg,
            assistant: &assistant,
            session: &mut session,
            pending_image: &mut pending_image,
            uptime: started_at.elapsed(),
        };
        match commands::handle_command(ctx, line).await {
            Some(CommandOutcome::Quit) => break,
            Some(CommandOutcome::Reply(reply)) => {
                println!("{reply}\n");
                continue;
            }
            None => {}
        }

        let image = pending_image.take();
        tokio::select! {
            result = assistant.submit(&mut session, line, image, &surface) => match result {
                Ok(report) => tracing::debug!(
                    fragments = report.fragments,
                    latency_ms = report.latency.as_millis() as u64,
                    reply_chars = report.reply.chars().count(),
                    "reply rendered"
                ),
                // Already rendered by the surface.
                Err(e) => tracing::debug!(error = %e, "turn ended with error"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n(reply cancelled)\n");
                tracing::info!("turn cancelled by user");
            }
        }
    }

    println!("bye");
    Ok(())
}

/// Prompts until the gate opens. Returns `false` on end of input.
async fn login(session: &mut ChatSession, lines: &mut InputLines) -> Result<bool> {
    loop {
        prompt("password: ")?;
        let Some(password) = lines.next_line().await? else {
            return Ok(false);
        };
        match session.login(password.trim_end_matches(['\r', '\n'])) {
            Ok(()) => {
                println!("unlocked.\n");
                return Ok(true);
            }
            Err(SessionError::WrongPassword) => println!("wrong password, try again."),
            Err(e) => return Err(e.into()),
        }
    }
}

fn prompt(text: &str) -> Result<()> {
    let mut out = std::io::stdout();
    write!(out, "{text}")?;
    out.flush()?;
    Ok(())
}
