use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use search_chat::{
    config::LogLevel,
    search::parse_context_entries,
    utils::{setup_logging, LogConfig},
    ChatBuilder,
    ChatConfig,
    ChatOrchestrator,
    ChatPresenter,
    ContextOutcome,
    Features,
    LoadProgress,
    Role,
    TurnOutcome,
};

#[derive(Parser, Debug)]
#[command(name = "search-chat", version, about = "Chat with a local model that can search the web")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding `{model_id}/` model folders
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Model identifier
    #[arg(long)]
    model_id: Option<String>,

    /// error, warn, info, debug or trace
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Load the model before the first prompt
    #[arg(long)]
    preload: bool,
}

fn parse_log_level(value: &str) -> std::result::Result<LogLevel, String> {
    serde_json::from_value(serde_json::Value::String(value.to_lowercase()))
        .map_err(|_| format!("unknown log level '{}'", value))
}

/// Streams replies to stdout and status lines to stderr
#[derive(Default)]
struct TerminalPresenter {
    streamed: Mutex<String>,
}

impl TerminalPresenter {
    fn print(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{}", text);
        let _ = stdout.flush();
    }
}

impl ChatPresenter for TerminalPresenter {
    fn show_turn(&self, role: Role, content: &str) {
        if role != Role::User {
            self.print(&format!("{}: {}\n", role, content));
        }
    }

    fn begin_reply(&self) {
        self.streamed.lock().clear();
        self.print("assistant: ");
    }

    fn draft_token(&self, token: &str) {
        self.streamed.lock().push_str(token);
        self.print(token);
    }

    fn finish_reply(&self, content: &str) {
        let streamed = std::mem::take(&mut *self.streamed.lock());
        if streamed.trim() == content {
            self.print("\n");
        } else {
            self.print(&format!("\n\nassistant (updated): {}\n", content));
        }
    }

    fn show_status(&self, status: &str) {
        eprintln!("[{}]", status);
    }

    fn show_progress(&self, progress: &LoadProgress) {
        let Some(percent) = progress.percent() else {
            return;
        };
        let file = progress.file.as_deref().unwrap_or("model");
        match (progress.loaded, progress.total) {
            (Some(loaded), Some(total)) => eprintln!(
                "[Loading {}: {}% ({:.1}MB / {:.1}MB)]",
                file,
                percent,
                loaded as f64 / 1_048_576.0,
                total as f64 / 1_048_576.0
            ),
            _ => eprintln!("[Loading {}: {}%]", file, percent),
        }
    }

    fn show_context(&self, outcome: &ContextOutcome) {
        let entries = parse_context_entries(outcome.context());
        if entries.is_empty() {
            eprintln!("[No additional context available.]");
            return;
        }
        for entry in entries {
            eprintln!("  {}. {} <{}>", entry.number, entry.title, entry.url);
        }
    }

    fn clear(&self) {
        self.streamed.lock().clear();
    }
}

fn load_config(args: &Args) -> Result<ChatConfig> {
    let mut config = match &args.config {
        Some(path) => ChatConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ChatConfig::default(),
    };
    if let Some(dir) = &args.models_dir {
        config.model.models_dir = dir.clone();
    }
    if let Some(model_id) = &args.model_id {
        config.model.model_id = model_id.clone();
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(path) = &args.log_file {
        config.logging.file_path = Some(path.clone());
    }
    Ok(config)
}

const HELP: &str = "commands: /load, /stop, /clear, /visit <url>, /stats, /help, /quit (Ctrl-C stops a reply)";

async fn send(orchestrator: &ChatOrchestrator, line: &str) {
    let turn = orchestrator.send_user_message(line);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.stop();
            }
        }
    };

    match outcome {
        Ok(TurnOutcome::Rejected(reason)) => eprintln!("[Message not sent: {:?}]", reason),
        Ok(TurnOutcome::Stopped) => println!(),
        // Errors were already reported as a status line
        Ok(TurnOutcome::Completed { .. }) | Err(_) => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    setup_logging(LogConfig::from(&config.logging)).map_err(anyhow::Error::msg)?;
    info!(version = search_chat::VERSION, model_id = %config.model.model_id, "Starting search-chat");
    info!("{}", Features::detect());

    let orchestrator = ChatBuilder::new()
        .with_config(config)
        .with_presenter(Arc::new(TerminalPresenter::default()))
        .build()?;

    if args.preload {
        // Failure is shown as a status; /load retries
        let _ = orchestrator.initialize().await;
    }
    eprintln!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => eprintln!("{}", HELP),
            ("/load", _) => {
                let _ = orchestrator.initialize().await;
            }
            ("/clear", _) => orchestrator.clear_conversation(),
            ("/stop", _) => {
                if !orchestrator.stop() {
                    eprintln!("[Nothing to stop]");
                }
            }
            ("/stats", _) => println!("{}", orchestrator.metrics().snapshot().await),
            ("/visit", url) if !url.is_empty() => {
                let text = orchestrator.fetcher().visit_page(url).await;
                if text.is_empty() {
                    eprintln!("[Could not fetch {}]", url);
                } else {
                    println!("{}", text);
                }
            }
            ("", _) => {}
            _ if line.starts_with('/') => eprintln!("[Unknown command] {}", HELP),
            _ => {
                if !orchestrator.session().is_ready() && orchestrator.initialize().await.is_err() {
                    continue;
                }
                send(&orchestrator, line).await;
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
