//! Session registry backed by the shared state document.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::models::document::StoreDocument;
use crate::models::message::PendingMessage;
use crate::models::session::{workspace_name, Session, SessionStatus, Turn, TurnRole};
use crate::quality_loop::{self, LoopDecision, LoopSettings};
use crate::{AppError, Result};

use super::store::DocumentStore;

/// How many trailing turns are checked for an already-recorded user prompt.
pub const RECENT_USER_TURN_WINDOW: usize = 5;

/// What a finished turn reports, applied whole by [`SessionRepo::record_turn`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    /// Prompt that started the turn.
    pub user_prompt: Option<String>,
    /// Agent's final text response.
    pub agent_response: Option<String>,
    /// Paths the agent reported changing during the turn.
    pub files_changed: Vec<String>,
    /// Keep the session active instead of marking it idle.
    pub more_expected: bool,
}

/// Outcome of [`SessionRepo::record_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTurn {
    /// Session after the turn was applied.
    pub session: Session,
    /// Quality-loop decision for the turn.
    pub loop_decision: LoopDecision,
    /// Oldest queued message, released because no loop is running.
    pub released: Option<PendingMessage>,
}

/// Repository for session records. Each mutation is one store transaction.
#[derive(Debug, Clone)]
pub struct SessionRepo {
    store: Arc<DocumentStore>,
}

fn session_mut<'a>(doc: &'a mut StoreDocument, id: &str) -> Result<&'a mut Session> {
    doc.sessions
        .get_mut(id)
        .ok_or_else(|| AppError::UnknownSession(id.to_owned()))
}

fn apply_transition(session: &mut Session, next: SessionStatus) {
    if session.status != next && session.can_transition_to(next) {
        info!(
            session_id = %session.id,
            from = session.status.as_str(),
            to = next.as_str(),
            "session status changed"
        );
        session.status = next;
        session.last_active_at = Utc::now();
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Register a session start, creating the session or reopening it.
    ///
    /// Re-registration updates the workspace, activity time, and agent PID,
    /// and moves the session to `active` (even from `stopped`). Turns are
    /// never touched.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for an empty id, or a store error.
    pub async fn register(
        &self,
        id: &str,
        workspace: &str,
        agent_pid: Option<u32>,
    ) -> Result<Session> {
        if id.trim().is_empty() {
            return Err(AppError::InvalidInput("session id must not be empty".into()));
        }

        self.store
            .transact(|doc| {
                let session = doc
                    .sessions
                    .entry(id.to_owned())
                    .and_modify(|existing| {
                        let previous = existing.status;
                        existing.workspace = workspace.to_owned();
                        existing.workspace_name = workspace_name(workspace);
                        existing.status = SessionStatus::Active;
                        existing.last_active_at = Utc::now();
                        if agent_pid.is_some() {
                            existing.agent_pid = agent_pid;
                        }
                        info!(
                            session_id = %existing.id,
                            from = previous.as_str(),
                            "session re-registered"
                        );
                    })
                    .or_insert_with(|| {
                        info!(session_id = %id, workspace, "session registered");
                        let mut created = Session::new(id.to_owned(), workspace.to_owned());
                        created.agent_pid = agent_pid;
                        created
                    });
                Ok(session.clone())
            })
            .await
    }

    /// Append a turn to a registered session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn append_turn(&self, id: &str, turn: Turn) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                session.push_turn(turn);
                session.last_active_at = Utc::now();
                Ok(session.clone())
            })
            .await
    }

    /// Append several turns atomically, in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn append_turns(&self, id: &str, turns: Vec<Turn>) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                for turn in turns {
                    session.push_turn(turn);
                }
                session.last_active_at = Utc::now();
                Ok(session.clone())
            })
            .await
    }

    /// Move an active session to `idle`. Idle and stopped sessions are left as is.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn mark_idle(&self, id: &str) -> Result<Session> {
        self.transition(id, SessionStatus::Idle).await
    }

    /// Move a session to the terminal `stopped` status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn mark_stopped(&self, id: &str) -> Result<Session> {
        self.transition(id, SessionStatus::Stopped).await
    }

    async fn transition(&self, id: &str, next: SessionStatus) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                apply_transition(session, next);
                Ok(session.clone())
            })
            .await
    }

    /// Apply a finished turn in one transaction.
    ///
    /// Appends the user prompt unless it is already among the last
    /// [`RECENT_USER_TURN_WINDOW`] turns, then the agent response, merges
    /// changed files, moves the session to `idle` unless more work is
    /// expected, and advances the quality loop. When no loop is running and
    /// the session is settling, the oldest queued message is marked
    /// delivered and recorded as the next user turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered, or a
    /// store error. Nothing is written on error.
    pub async fn record_turn(
        &self,
        id: &str,
        report: &TurnReport,
        settings: &LoopSettings,
    ) -> Result<RecordedTurn> {
        self.store
            .transact(|doc| {
                let now = Utc::now();
                let session = session_mut(doc, id)?;

                if let Some(prompt) = report.user_prompt.as_deref() {
                    if !session.has_recent_user_turn(prompt, RECENT_USER_TURN_WINDOW) {
                        session.push_turn(Turn::new(TurnRole::User, prompt));
                    }
                }
                if let Some(response) = report.agent_response.as_deref() {
                    session.push_turn(Turn::new(TurnRole::Agent, response));
                }
                session.record_files_changed(report.files_changed.iter().cloned());
                session.last_active_at = session.last_active_at.max(now);
                if !report.more_expected {
                    apply_transition(session, SessionStatus::Idle);
                }

                let response = report.agent_response.as_deref().unwrap_or_default();
                let loop_decision =
                    quality_loop::evaluate(&mut session.loop_state, response, settings);

                let releasable = loop_decision == LoopDecision::Inactive
                    && !report.more_expected
                    && session.status != SessionStatus::Stopped;
                let released = if releasable {
                    doc.take_next_pending(id, now)
                } else {
                    None
                };

                let session = session_mut(doc, id)?;
                if let Some(message) = &released {
                    session.push_turn(Turn::new(TurnRole::User, message.text.clone()));
                }
                Ok(RecordedTurn {
                    session: session.clone(),
                    loop_decision,
                    released,
                })
            })
            .await
    }

    /// Record a tool invocation in one transaction: the tool name always,
    /// plus `turn` when given. Status is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn record_tool_use(
        &self,
        id: &str,
        tool_name: &str,
        turn: Option<Turn>,
    ) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                session.record_tool(tool_name);
                if let Some(turn) = turn {
                    session.push_turn(turn);
                }
                session.last_active_at = session.last_active_at.max(Utc::now());
                Ok(session.clone())
            })
            .await
    }

    /// Record an operator message sent straight into the conversation: a
    /// user turn is appended and the session becomes `active`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for blank text, a stopped session,
    /// or a session without a workspace to resume in;
    /// `AppError::UnknownSession` if `id` was never registered.
    pub async fn inject_message(&self, id: &str, text: &str) -> Result<Session> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidInput("message text must not be empty".into()));
        }

        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                if session.status == SessionStatus::Stopped {
                    return Err(AppError::InvalidInput(format!("session {id} is stopped")));
                }
                if session.workspace.is_empty() {
                    return Err(AppError::InvalidInput(format!(
                        "session {id} has no workspace to resume in"
                    )));
                }
                session.push_turn(Turn::new(TurnRole::User, text.trim()));
                apply_transition(session, SessionStatus::Active);
                Ok(session.clone())
            })
            .await
    }

    /// Merge reported file changes into the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn record_files_changed(&self, id: &str, paths: Vec<String>) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                session.record_files_changed(paths);
                Ok(session.clone())
            })
            .await
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn get(&self, id: &str) -> Result<Session> {
        let mut doc = self.store.read().await?;
        doc.sessions
            .remove(id)
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))
    }

    /// List all sessions, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the document cannot be read.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let doc = self.store.read().await?;
        let mut sessions: Vec<Session> = doc.sessions.into_values().collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }

    /// List sessions that are not stopped, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns a store error if the document cannot be read.
    pub async fn list_live(&self) -> Result<Vec<Session>> {
        let mut sessions = self.list().await?;
        sessions.retain(|s| s.status != SessionStatus::Stopped);
        Ok(sessions)
    }

    /// Enable the quality loop with the given prompt, resetting its counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn enable_loop(&self, id: &str, prompt_name: Option<String>) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                session.loop_state.enabled = true;
                session.loop_state.count = 0;
                session.loop_state.prompt_name = prompt_name;
                session.loop_state.started_at = Some(Utc::now());
                Ok(session.clone())
            })
            .await
    }

    /// Pause the quality loop, keeping its counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn pause_loop(&self, id: &str) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                session.loop_state.enabled = false;
                Ok(session.clone())
            })
            .await
    }

    /// Reset the quality-loop iteration counter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn reset_loop(&self, id: &str) -> Result<Session> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                session.loop_state.count = 0;
                Ok(session.clone())
            })
            .await
    }

    /// Evaluate the quality loop for a finished turn in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` was never registered.
    pub async fn advance_loop(
        &self,
        id: &str,
        agent_response: &str,
        settings: &LoopSettings,
    ) -> Result<LoopDecision> {
        self.store
            .transact(|doc| {
                let session = session_mut(doc, id)?;
                Ok(quality_loop::evaluate(
                    &mut session.loop_state,
                    agent_response,
                    settings,
                ))
            })
            .await
    }
}
