#![forbid(unsafe_code)]

//! `agent-dashboard-hook`: lifecycle hook entry point for coding agents.
//!
//! Reads the hook payload from stdin, applies it to the shared session
//! store, and writes the hook reply to stdout. Logs go to
//! `<data_dir>/hook.log` because stdout belongs to the agent host.

use std::fs::OpenOptions;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_dashboard::delivery::{
    BufferedSink, Delivery, DeliverySink, NullSink, ResumeSpawner, RoutingSink,
};
use agent_dashboard::events::{EventProcessor, HookKind, HookPayload};
use agent_dashboard::persistence::DocumentStore;
use agent_dashboard::quality_loop::LoopSettings;
use agent_dashboard::{AppError, DashboardConfig, Result};

/// Exit status reported when the store lock could not be obtained in time.
const EXIT_LOCK_TIMEOUT: u8 = 75;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum HookArg {
    SessionStart,
    Stop,
    PreToolUse,
    PostToolUse,
}

impl From<HookArg> for HookKind {
    fn from(arg: HookArg) -> Self {
        match arg {
            HookArg::SessionStart => Self::SessionStart,
            HookArg::Stop => Self::Stop,
            HookArg::PreToolUse => Self::PreToolUse,
            HookArg::PostToolUse => Self::PostToolUse,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "agent-dashboard-hook",
    about = "Agent lifecycle hook for the session dashboard",
    version,
    long_about = None
)]
struct Cli {
    /// Which hook fired.
    #[arg(value_enum)]
    hook: HookArg,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Do not spawn the agent CLI for loop prompts or released messages.
    #[arg(long)]
    no_deliver: bool,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    match run(args) {
        Ok(reply) => {
            println!("{reply}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "hook failed");
            eprintln!("agent-dashboard-hook: {err}");
            if err.is_lock_timeout() {
                ExitCode::from(EXIT_LOCK_TIMEOUT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(args: Cli) -> Result<String> {
    let config = DashboardConfig::resolve(args.config.as_deref())?;
    init_tracing(&config, args.log_format)?;

    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|err| AppError::Hook(format!("failed to read stdin: {err}")))?;
    let payload = HookPayload::from_json(&raw)?;
    let event = payload.into_event(args.hook.into(), parent_pid())?;
    info!(hook = ?args.hook, session_id = %event.session_id(), "hook invoked");

    let reply = Arc::new(BufferedSink::new());
    let resume: Arc<dyn DeliverySink> = if args.no_deliver {
        Arc::new(NullSink)
    } else {
        Arc::new(ResumeSpawner::new(config.resume_cli.clone()))
    };
    let sink = Arc::new(RoutingSink::new(
        Arc::clone(&reply) as Arc<dyn DeliverySink>,
        resume,
    ));

    let processor = EventProcessor::new(
        Arc::new(DocumentStore::from_config(&config)),
        sink,
        LoopSettings::from_config(&config),
    );

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Hook(format!("failed to build tokio runtime: {err}")))?
        .block_on(processor.handle(event))?;

    Ok(render_reply(&reply.take()))
}

/// Hook reply: drained messages as a markdown block, or an empty JSON object.
fn render_reply(deliveries: &[Delivery]) -> String {
    if deliveries.is_empty() {
        return "{}".into();
    }
    let mut lines = vec!["## Messages from Dashboard".to_owned()];
    lines.extend(deliveries.iter().map(|d| format!("- {}", d.text)));
    lines.join("\n")
}

#[cfg(unix)]
fn parent_pid() -> Option<u32> {
    Some(std::os::unix::process::parent_id())
}

#[cfg(not(unix))]
fn parent_pid() -> Option<u32> {
    None
}

fn init_tracing(config: &DashboardConfig, log_format: LogFormat) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.hook_log_path())
        .map_err(|err| AppError::Config(format!("cannot open hook log: {err}")))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(Mutex::new(log_file));

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
