#![forbid(unsafe_code)]

//! `agent-dashboard-ctl`: operator CLI for the agent session dashboard.
//!
//! Works directly against the shared session store, so it can run while
//! agents and their hooks are active.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use agent_dashboard::delivery::{Delivery, DeliveryKind, DeliverySink, ResumeSpawner};
use agent_dashboard::models::session::Session;
use agent_dashboard::persistence::inbox_repo::InboxRepo;
use agent_dashboard::persistence::session_repo::SessionRepo;
use agent_dashboard::persistence::DocumentStore;
use agent_dashboard::{AppError, DashboardConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "agent-dashboard-ctl",
    about = "Inspect sessions and queue messages for running agents",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List sessions, most recently active first.
    List {
        /// Include stopped sessions.
        #[arg(long)]
        all: bool,
    },

    /// Print one session as JSON.
    Show {
        /// Session ID.
        id: String,
    },

    /// Queue a message for the session, or send it right away with --now.
    Send {
        /// Session ID.
        id: String,
        /// Message text.
        text: String,
        /// Resume the agent with the message now instead of queueing it.
        #[arg(long)]
        now: bool,
    },

    /// List undelivered messages for a session.
    Pending {
        /// Session ID.
        id: String,
    },

    /// Discard undelivered messages for a session.
    Clear {
        /// Session ID.
        id: String,
    },

    /// Mark a session stopped.
    Stop {
        /// Session ID.
        id: String,
    },

    /// Control the quality loop for a session.
    Loop {
        #[command(subcommand)]
        action: LoopAction,
    },
}

#[derive(Debug, Subcommand)]
enum LoopAction {
    /// Start looping with the named prompt.
    Enable {
        /// Session ID.
        id: String,
        /// Loop prompt name from the config.
        prompt: Option<String>,
    },
    /// Stop looping but keep the iteration count.
    Pause {
        /// Session ID.
        id: String,
    },
    /// Clear the iteration count without changing whether the loop runs.
    Reset {
        /// Session ID.
        id: String,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("Error: {err}");
        return ExitCode::FAILURE;
    }

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|runtime| runtime.block_on(run(args)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = DashboardConfig::resolve(args.config.as_deref())?;
    let store = Arc::new(DocumentStore::from_config(&config));
    let sessions = SessionRepo::new(Arc::clone(&store));
    let inbox = InboxRepo::new(store);

    match args.command {
        Command::List { all } => {
            let listed = if all {
                sessions.list().await?
            } else {
                sessions.list_live().await?
            };
            if listed.is_empty() {
                println!("No sessions.");
            }
            for session in &listed {
                println!("{}", summary_line(session));
            }
        }
        Command::Show { id } => {
            let session = sessions.get(&id).await?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Command::Send { id, text, now: true } => {
            let session = sessions.inject_message(&id, &text).await?;
            ResumeSpawner::new(config.resume_cli.clone()).deliver(&Delivery {
                session_id: session.id.clone(),
                workspace: session.workspace.clone(),
                text: text.trim().to_owned(),
                kind: DeliveryKind::Direct,
            })?;
            println!("Sent message to {id}; the agent is resuming");
        }
        Command::Send { id, text, now: false } => {
            if sessions.get(&id).await.is_err() {
                eprintln!("note: {id} has not started yet; the message waits for its first start");
            }
            let message = inbox.enqueue(&id, &text).await?;
            println!("Queued message {} for {id}", message.id);
        }
        Command::Pending { id } => {
            for message in inbox.list_pending(&id).await? {
                println!(
                    "{}\t{}\t{}",
                    message.id,
                    message.created_at.to_rfc3339(),
                    message.text
                );
            }
        }
        Command::Clear { id } => {
            let cleared = inbox.clear_pending(&id).await?;
            println!("Cleared {cleared} message(s) for {id}");
        }
        Command::Stop { id } => {
            let session = sessions.mark_stopped(&id).await?;
            println!("{} is {}", session.id, session.status.as_str());
        }
        Command::Loop { action } => {
            let session = match action {
                LoopAction::Enable { id, prompt } => sessions.enable_loop(&id, prompt).await?,
                LoopAction::Pause { id } => sessions.pause_loop(&id).await?,
                LoopAction::Reset { id } => sessions.reset_loop(&id).await?,
            };
            let state = &session.loop_state;
            println!(
                "{}: loop {} (iteration {}, prompt {})",
                session.id,
                if state.enabled { "enabled" } else { "disabled" },
                state.count,
                state.prompt_name.as_deref().unwrap_or("default")
            );
        }
    }

    Ok(())
}

fn summary_line(session: &Session) -> String {
    format!(
        "{}\t{}\t{}\t{} turns\t{}",
        session.id,
        session.status.as_str(),
        session.workspace_name,
        session.turn_count(),
        session.last_active_at.to_rfc3339()
    )
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
