//! work-assistant: a password-gated chat assistant for Gemini and OpenAI models.

mod assistant;
mod commands;
mod config;
mod export;
mod http_auth;
mod image_input;
mod init;
mod repl;
mod routes;
mod server;
mod session;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(
    name = "work-assistant",
    version,
    about = "Chat with Gemini and OpenAI models from the terminal or over HTTP"
)]
struct Cli {
    /// Config file (default: ~/.work-assistant/config.toml).
    #[arg(long, global = true, env = "WORK_ASSISTANT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive terminal chat (default).
    Chat,
    /// Serve the chat session over HTTP with SSE streaming.
    Serve,
    /// Write ~/.work-assistant/config.toml from the template (idempotent).
    Init,
    /// Validate config and report which credentials are present.
    Doctor,
    /// List the model catalogue.
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    let dotenv = dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Chat);
    init_tracing(default_log_filter(&command))?;
    install_panic_hook();
    if let Some(path) = dotenv {
        tracing::debug!(path = %path.display(), ".env loaded");
    }

    match command {
        Command::Chat => repl::run(cli.config).await,
        Command::Serve => server::serve(cli.config).await,
        Command::Init => {
            let report = init::initialize_default().await?;
            if report.created.is_empty() {
                println!(
                    "work-assistant init: already initialized at {}",
                    report.root.display()
                );
            } else {
                println!("work-assistant init: initialized {}", report.root.display());
                for path in &report.created {
                    println!("created {}", path.display());
                }
            }
            println!(
                "next: set APP_PASSWORD and your API keys, or edit {}",
                report.root.join("config.toml").display()
            );
            Ok(())
        }
        Command::Doctor => server::doctor(cli.config).await,
        Command::Models => server::list_models(cli.config).await,
    }
}

/// Used when `RUST_LOG` is unset. The REPL shares the terminal with its log
/// output, so it stays at `info`.
fn default_log_filter(command: &Command) -> &'static str {
    match command {
        Command::Serve => {
            "info,work_assistant=debug,wa_app=debug,wa_llm=debug,wa_channels=debug,tower_http=info"
        }
        Command::Chat | Command::Init | Command::Doctor | Command::Models => "info",
    }
}

fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(default_filter),
    };
    let log_format = std::env::var("WORK_ASSISTANT_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    // stderr keeps the REPL's stdout readable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported WORK_ASSISTANT_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
