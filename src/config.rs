//! Dashboard configuration parsing, validation, and path resolution.
//!
//! The configuration document is read by hooks and the ctl companion but is
//! not part of the session store's consistency domain: it is never written
//! under the store lock.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Environment variable that overrides the dashboard data directory.
pub const DATA_DIR_ENV: &str = "AGENT_DASHBOARD_DIR";

/// Environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "AGENT_DASHBOARD_CONFIG";

/// Name of the loop prompt used when a session selects none.
pub const DEFAULT_LOOP_PROMPT_NAME: &str = "default";

/// A named prompt re-sent to the agent after each turn while a quality loop runs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LoopPrompt {
    /// Text delivered to the agent to start the next iteration.
    pub prompt: String,
    /// Marker that, when present in the agent response, ends the loop.
    #[serde(default)]
    pub end_condition: String,
}

impl Default for LoopPrompt {
    fn default() -> Self {
        Self {
            prompt: "Continue working. When done, say 'LOOP_COMPLETE: Task finished.'".into(),
            end_condition: "LOOP_COMPLETE: Task finished.".into(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let home = env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".augment").join("dashboard")
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_stale_lock_seconds() -> u64 {
    60
}

fn default_resume_cli() -> String {
    "auggie".into()
}

fn default_max_loop_iterations() -> u32 {
    50
}

fn default_completion_phrases() -> Vec<String> {
    [
        "goal has been achieved",
        "goal is complete",
        "task is complete",
        "task has been completed",
        "all tasks are complete",
        "all done",
        "work is complete",
        "objective has been met",
        "successfully completed",
        "nothing left to do",
        "no further action needed",
        "no further actions needed",
        "finished all",
        "completed all",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Dashboard configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DashboardConfig {
    /// Directory holding the session document, its lock, and hook logs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Maximum time a caller waits for the store lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Age after which a held lock is considered abandoned.
    #[serde(default = "default_stale_lock_seconds")]
    pub stale_lock_seconds: u64,
    /// Agent CLI used to resume a conversation for message delivery.
    #[serde(default = "default_resume_cli")]
    pub resume_cli: String,
    /// Upper bound on automatic quality-loop iterations per session.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,
    /// Phrases that indicate the agent considers its goal complete.
    #[serde(default = "default_completion_phrases")]
    pub completion_phrases: Vec<String>,
    /// Named loop prompts selectable per session.
    #[serde(default)]
    pub loop_prompts: HashMap<String, LoopPrompt>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_lock_seconds: default_stale_lock_seconds(),
            resume_cli: default_resume_cli(),
            max_loop_iterations: default_max_loop_iterations(),
            completion_phrases: default_completion_phrases(),
            loop_prompts: HashMap::new(),
        }
    }
}

impl DashboardConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve configuration from an explicit path, the environment, or the
    /// data directory, falling back to defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a located file is unreadable or invalid.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
            return Self::load_from_path(PathBuf::from(path));
        }

        let candidate = default_data_dir().join("config.toml");
        if candidate.is_file() {
            debug!(path = %candidate.display(), "loading config from data dir");
            return Self::load_from_path(candidate);
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Path of the persisted session document.
    #[must_use]
    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    /// Path of the append-only hook log.
    #[must_use]
    pub fn hook_log_path(&self) -> PathBuf {
        self.data_dir.join("hook.log")
    }

    /// Lock acquisition budget.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Lock liveness threshold.
    #[must_use]
    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.lock_timeout_ms == 0 {
            return Err(AppError::Config(
                "lock_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.stale_lock_seconds == 0 {
            return Err(AppError::Config(
                "stale_lock_seconds must be greater than zero".into(),
            ));
        }

        if self.max_loop_iterations == 0 {
            return Err(AppError::Config(
                "max_loop_iterations must be greater than zero".into(),
            ));
        }

        if self.resume_cli.trim().is_empty() {
            return Err(AppError::Config("resume_cli must not be empty".into()));
        }

        Ok(())
    }
}
