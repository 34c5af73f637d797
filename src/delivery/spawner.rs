//! Delivery by resuming the agent conversation in a detached process.
//!
//! Runs `<resume_cli> --resume <session_id> --print <text>` in the session's
//! workspace and returns as soon as the process starts. The child is not
//! awaited and outlives the hook that spawned it.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, info_span};

use super::{Delivery, DeliverySink};
use crate::{AppError, Result};

/// Spawns the agent CLI to inject a message into an existing conversation.
#[derive(Debug, Clone)]
pub struct ResumeSpawner {
    program: String,
}

impl ResumeSpawner {
    /// Create a spawner that runs `program` (e.g. `auggie`).
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Program invoked for each delivery.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, delivery: &Delivery) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--resume")
            .arg(&delivery.session_id)
            .arg("--print")
            .arg(&delivery.text)
            .current_dir(&delivery.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // Detach from the hook's process group so the agent host does not
        // reap the delivery when the hook exits.
        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

impl DeliverySink for ResumeSpawner {
    fn deliver(&self, delivery: &Delivery) -> Result<()> {
        let span = info_span!(
            "resume_delivery",
            session_id = %delivery.session_id,
            kind = ?delivery.kind
        );
        let _guard = span.enter();

        if delivery.workspace.is_empty() || !Path::new(&delivery.workspace).is_dir() {
            return Err(AppError::Delivery(format!(
                "workspace {:?} is not a directory",
                delivery.workspace
            )));
        }

        let child = self.command(delivery).spawn().map_err(|err| {
            AppError::Delivery(format!("failed to spawn {}: {err}", self.program))
        })?;

        info!(
            pid = child.id().unwrap_or(0),
            program = %self.program,
            "delivery process spawned"
        );
        Ok(())
    }
}
