//! `mghost` command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mghost_media::JobEvent;
use mghost_worker::{Runner, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "mghost")]
#[command(version, about = "Blind video watermark embedding and extraction")]
struct Cli {
    /// Stream job events to stderr as JSON lines
    #[arg(long, global = true)]
    events: bool,

    /// Key ledger file (overrides MGHOST_LEDGER)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Embed caller-chosen keys: '{"video_path", "output_path", "keys", "sequence", ...}'
    EmbedKey { args: String },
    /// Recover the key order: '{"video_path", "keys", ...}'
    ExtractKey { args: String },
    /// Issue a new key to a user and embed it: '{"video_path", "output_path", "user_email", "user_name", ...}'
    EmbedUser { args: String },
    /// Find the ledger record a video was issued under: '{"video_path", ...}'
    Identify { args: String },
    /// List ledger records, newest first
    Records,
    /// Show the newest record for a unique key
    Lookup {
        #[arg(long)]
        key: i64,
    },
    /// Delete a ledger record
    DeleteRecord {
        #[arg(long)]
        id: String,
    },
    /// Print the next sequential key
    NextKey,
}

impl Command {
    /// Whether the command runs FFmpeg, as opposed to only touching the ledger.
    fn needs_media(&self) -> bool {
        matches!(
            self,
            Command::EmbedKey { .. }
                | Command::ExtractKey { .. }
                | Command::EmbedUser { .. }
                | Command::Identify { .. }
        )
    }
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mghost=info,warn"));

    // stdout carries the result document, so logs go to stderr.
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(cli: Cli, runner: Runner) -> anyhow::Result<ExitCode> {
    let code = match cli.command {
        Command::EmbedKey { args } => {
            let result = runner.embed_key(&args).await?;
            print_json(&result)?;
            exit_code(result.success)
        }
        Command::ExtractKey { args } => {
            let result = runner.extract_key(&args).await?;
            print_json(&result)?;
            exit_code(result.success)
        }
        Command::EmbedUser { args } => {
            let outcome = runner.embed_for_user(&args).await?;
            print_json(&outcome)?;
            exit_code(outcome.success)
        }
        Command::Identify { args } => {
            let outcome = runner.identify(&args).await?;
            print_json(&outcome)?;
            exit_code(outcome.success)
        }
        Command::Records => {
            print_json(&runner.records().await?)?;
            ExitCode::SUCCESS
        }
        Command::Lookup { key } => {
            print_json(&runner.lookup(key).await?)?;
            ExitCode::SUCCESS
        }
        Command::DeleteRecord { id } => {
            let removed = runner.delete_record(&id).await?;
            print_json(&json!({ "success": true, "deleted": removed }))?;
            ExitCode::SUCCESS
        }
        Command::NextKey => {
            print_json(&json!({ "next_key": runner.next_key().await? }))?;
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = WorkerConfig::from_env();
    if let Some(ledger) = &cli.ledger {
        config = config.with_ledger_path(ledger);
    }
    if cli.command.needs_media() {
        config.engine = match config.engine.resolve_binaries() {
            Ok(engine) => engine,
            Err(e) => {
                error!("FFmpeg tools unavailable: {}", e);
                println!("{}", json!({ "success": false, "error": e.to_string() }));
                return ExitCode::FAILURE;
            }
        };
    }
    info!(
        ffmpeg = %config.engine.ffmpeg_path.display(),
        ledger = %config.ledger_path.display(),
        "Starting mghost"
    );

    let mut runner = Runner::new(config);
    if cli.events {
        runner = runner.with_progress(Arc::new(|event: &JobEvent| {
            if let Ok(line) = serde_json::to_string(event) {
                eprintln!("{}", line);
            }
        }));
    }

    match run(cli, runner).await {
        Ok(code) => code,
        Err(e) => {
            error!("Command failed: {:#}", e);
            println!("{}", json!({ "success": false, "error": format!("{:#}", e) }));
            ExitCode::FAILURE
        }
    }
}
