use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medadmin_cli::cli::{render, run_command, watch, CliCommand, ConsoleToast};
use medadmin_core::session::Collaborators;
use medadmin_core::tracing_setup::init_tracing;
use medadmin_core::{AdminSession, SessionAuth, SyncConfig};
use tracing::warn;

#[derive(Parser)]
#[command(name = "medadmin")]
#[command(about = "Command-line client for the medical admin sync layer")]
struct Cli {
    /// Path to JSON config file (apiBaseUrl, hub URLs, dataDir, ...)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Bearer token for REST and hub calls
    #[arg(long, env = "MEDADMIN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Id of the signed-in user
    #[arg(long, env = "MEDADMIN_USER_ID")]
    user_id: Option<String>,

    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Debug logging on stderr
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show dashboard statistics
    Stats {
        /// Ignore the cached value
        #[arg(long)]
        force: bool,
    },

    /// List conversations
    Conversations,

    /// List one page of a conversation's messages
    Messages {
        conversation_id: i64,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },

    /// Send a text message
    Send {
        conversation_id: i64,
        content: String,
    },

    /// Mark a conversation as read
    MarkRead { conversation_id: i64 },

    /// Stream notification and chat changes until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Warning: {:#}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let auth = Arc::new(SessionAuth::new());
    if let Some(token) = cli.token {
        auth.login(cli.user_id.unwrap_or_default(), token);
    }

    let parts = Collaborators::production(&config, auth).with_toast(Arc::new(ConsoleToast));
    let session = AdminSession::from_parts(&config, parts);
    session.restore();

    let command = match cli.command {
        Commands::Watch => return watch(&session, cli.pretty).await,
        Commands::Stats { force } => CliCommand::Stats { force },
        Commands::Conversations => CliCommand::Conversations,
        Commands::Messages {
            conversation_id,
            page,
        } => CliCommand::Messages {
            conversation_id,
            page,
        },
        Commands::Send {
            conversation_id,
            content,
        } => CliCommand::Send {
            conversation_id,
            content,
        },
        Commands::MarkRead { conversation_id } => CliCommand::MarkRead { conversation_id },
    };

    let result = run_command(&session, command).await;
    if let Err(e) = session.persist() {
        warn!(error = %e, "failed to save session state");
    }
    let value = result?;
    println!(
        "{}",
        render(&value, cli.pretty).context("Failed to render result")?
    );
    Ok(())
}
