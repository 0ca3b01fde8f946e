//! KB Shell - Console Surface for kb-chat
//!
//! Reads questions and commands from stdin and prints answers as they
//! stream in. Everything stateful lives in `kb-client-core`; this binary
//! only parses input and renders store updates.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (http://localhost:8000/api, config from $XDG_CONFIG_HOME/kb-chat/client.toml)
//! kb-shell
//!
//! # Another backend, fail answers that go silent for 60s
//! kb-shell --api-url http://kb.internal:8000/api --idle-timeout 60
//!
//! # Verbose logging (to stderr)
//! RUST_LOG=kb_client_core=debug kb-shell
//! ```
//!
//! Type `/help` at the prompt for the command list.

mod commands;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use kb_client_core::{
    default_config_path, load_config_from_path, ConfigOverrides, ConversationStore, HttpBackend,
    RequestOutcome, ScopeMode, StoreUpdate, StreamHooks, Turn, TurnId, UpdateKind,
};

use commands::{Command, HELP};

/// KB Shell - Ask questions about your documents from the terminal
#[derive(Parser, Debug)]
#[command(name = "kb-shell")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// API base URL (overrides config file and KB_CHAT_API_URL)
    #[arg(short = 'u', long, value_name = "URL")]
    api_url: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "KB_CHAT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fail an answer after this many silent seconds (0 = never)
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Maximum prior turns sent as context (0 = all)
    #[arg(long, value_name = "TURNS")]
    history_limit: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "KB_CHAT_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so they never interleave with answer text.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("kb_shell={level},kb_client_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// One thing the main loop reacts to
enum Action {
    Input(Option<String>),
    Update(StoreUpdate),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    ConfigOverrides {
        base_url: args.api_url.clone(),
        idle_timeout_secs: args.idle_timeout,
        history_limit: args.history_limit,
    }
    .apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.base_url,
        source = %config.source(),
        "kb-shell starting"
    );

    let backend = HttpBackend::from_config(&config).context("Failed to build HTTP client")?;
    let mut store = ConversationStore::new(backend, &config);
    store.set_hooks(
        StreamHooks::new()
            .on_done(|turn| {
                info!(turn = %turn.id(), chars = turn.content().len(), "Answer complete");
            })
            .on_error(|message| warn!(message = %message, "Answer failed")),
    );

    println!("kb-shell connected to {} (/help for commands)", config.base_url);
    match store.health().await {
        Ok(health) if health.is_ok() => println!(
            "backend ok: {} documents, {} vectors",
            health.doc_count, health.vector_count
        ),
        Ok(health) => println!("backend reports status '{}'", health.status),
        Err(e) => println!("backend unreachable: {e}"),
    }
    if let Err(e) = store.refresh_documents().await {
        warn!(error = %e, "Initial document refresh failed");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    loop {
        let action = tokio::select! {
            line = lines.next_line() => Action::Input(line.context("Failed to read stdin")?),
            Some(update) = store.next_update(), if store.is_streaming() => Action::Update(update),
        };

        match action {
            Action::Input(None) => break,
            Action::Input(Some(line)) => match commands::parse(&line) {
                Ok(None) => prompt()?,
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => {
                    run_command(&mut store, command).await?;
                    if !store.is_streaming() {
                        prompt()?;
                    }
                }
                Err(e) => {
                    println!("{e}");
                    prompt()?;
                }
            },
            Action::Update(update) => {
                render_update(&store, &update)?;
                if matches!(update.kind, UpdateKind::Finished(_)) {
                    prompt()?;
                }
            }
        }
    }

    store.cancel();
    info!("kb-shell exiting");
    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    std::io::stdout().flush().context("Failed to flush stdout")
}

async fn run_command(store: &mut ConversationStore<HttpBackend>, command: Command) -> Result<()> {
    match command {
        Command::Ask(question) => match store.submit_query(&question) {
            Ok(_) => println!(),
            Err(e) => println!("not sent: {e}"),
        },
        Command::Cancel => {
            if store.cancel() {
                println!("\n[cancelled]");
            } else {
                println!("nothing to cancel");
            }
        }
        Command::Docs => {
            if let Err(e) = store.refresh_documents().await {
                println!("could not list documents: {}", e.detail());
            }
            print_documents(store);
        }
        Command::Upload(path) => upload(store, &path).await?,
        Command::Delete(id) => {
            if store.delete_document(&id).await {
                println!("deleted {id}");
            } else {
                println!("could not delete {id}");
            }
        }
        Command::Select(id) => match store.toggle_document(&id) {
            Some(true) => println!("selected {id}"),
            Some(false) => println!("deselected {id}"),
            None => println!("unknown document {id} (try /docs)"),
        },
        Command::Scope(mode) => {
            store.set_scope(mode);
            match mode {
                ScopeMode::All => println!("answering from all documents"),
                ScopeMode::Selected => println!(
                    "answering from {} selected document(s)",
                    store.library().selected().len()
                ),
            }
        }
        Command::Health => match store.health().await {
            Ok(health) => println!(
                "status {}: {} documents, {} vectors",
                health.status, health.doc_count, health.vector_count
            ),
            Err(e) => println!("health check failed: {}", e.detail()),
        },
        Command::Clear => {
            store.clear_conversation();
            println!("conversation cleared");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn upload(store: &mut ConversationStore<HttpBackend>, path: &Path) -> Result<()> {
    let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
        println!("not a file: {}", path.display());
        return Ok(());
    };
    let contents = match tokio::fs::read(path).await {
        Ok(contents) => contents,
        Err(e) => {
            println!("cannot read {}: {e}", path.display());
            return Ok(());
        }
    };

    match store.upload_document(filename, contents).await {
        Ok(receipt) => println!(
            "uploaded {filename} as {} ({} chunks, selected)",
            receipt.id, receipt.chunk_count
        ),
        Err(e) => println!("upload failed: {}", e.detail()),
    }
    Ok(())
}

fn print_documents(store: &ConversationStore<HttpBackend>) {
    let library = store.library();
    if library.documents().is_empty() {
        println!("no documents");
        return;
    }
    for doc in library.documents() {
        let mark = if library.is_selected(&doc.id) { 'x' } else { ' ' };
        println!(
            "[{mark}] {}  {}  ({} chunks, {})",
            doc.id,
            doc.filename,
            doc.chunk_count,
            doc.uploaded_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("scope: {:?}", library.mode());
}

fn render_update(store: &ConversationStore<HttpBackend>, update: &StoreUpdate) -> Result<()> {
    match &update.kind {
        UpdateKind::Token(text) => {
            print!("{text}");
            std::io::stdout().flush()?;
        }
        UpdateKind::Sources(_) => {}
        UpdateKind::Finished(outcome) => render_finished(store, &update.turn, outcome),
    }
    Ok(())
}

fn render_finished(store: &ConversationStore<HttpBackend>, turn: &TurnId, outcome: &RequestOutcome) {
    if let Some(turn) = store.conversation().get(turn) {
        for line in finished_lines(turn, outcome) {
            println!("{line}");
        }
    }
}

/// Lines printed once an answer settles, after its streamed tokens
fn finished_lines(turn: &Turn, outcome: &RequestOutcome) -> Vec<String> {
    let mut lines = vec![String::new()];
    match outcome {
        RequestOutcome::Completed { usage } => {
            for (i, citation) in turn.sources().unwrap_or_default().iter().enumerate() {
                lines.push(format!(
                    "  [{}] {} (score {:.2})",
                    i + 1,
                    citation.source,
                    citation.score
                ));
            }
            if let Some(usage) = usage {
                lines.push(format!(
                    "  ({} tokens: {} input / {} output)",
                    usage.total(),
                    usage.input_tokens,
                    usage.output_tokens
                ));
            }
        }
        RequestOutcome::Failed(message) => lines.push(failure_line(turn, message)),
        RequestOutcome::Cancelled | RequestOutcome::Superseded => {}
    }
    lines
}

/// The failure annotation of a turn, which was appended rather than streamed
///
/// Keeps the label the core wrote in front of `message` ("**Error:**" or
/// "**Connection Error:**").
fn failure_line(turn: &Turn, message: &str) -> String {
    let label = turn
        .content()
        .strip_suffix(message)
        .and_then(|head| head.rsplit_once("\n\n"))
        .map_or("**Error:** ", |(_, label)| label);
    format!("{label}{message}")
}
