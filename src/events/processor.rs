//! Dispatch of lifecycle events onto the session registry and message queue.

use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use super::{EventOutcome, LifecycleEvent, SessionStart, ToolPhase, ToolUse, TurnComplete};
use crate::delivery::{Delivery, DeliveryKind, DeliverySink};
use crate::models::session::{Session, Turn, TurnRole};
use crate::persistence::inbox_repo::InboxRepo;
use crate::persistence::session_repo::{SessionRepo, TurnReport};
use crate::persistence::DocumentStore;
use crate::quality_loop::{LoopDecision, LoopSettings};
use crate::Result;

/// Translates hook events into store transactions and outbound deliveries.
pub struct EventProcessor {
    sessions: SessionRepo,
    inbox: InboxRepo,
    sink: Arc<dyn DeliverySink>,
    loop_settings: LoopSettings,
}

impl EventProcessor {
    /// Build a processor over `store`, delivering through `sink`.
    #[must_use]
    pub fn new(
        store: Arc<DocumentStore>,
        sink: Arc<dyn DeliverySink>,
        loop_settings: LoopSettings,
    ) -> Self {
        Self {
            sessions: SessionRepo::new(Arc::clone(&store)),
            inbox: InboxRepo::new(store),
            sink,
            loop_settings,
        }
    }

    /// Session registry used by this processor.
    #[must_use]
    pub fn sessions(&self) -> &SessionRepo {
        &self.sessions
    }

    /// Message queue used by this processor.
    #[must_use]
    pub fn inbox(&self) -> &InboxRepo {
        &self.inbox
    }

    /// Process one lifecycle event.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the store is contended past its
    /// budget, `AppError::UnknownSession` for turn or tool events on a
    /// session that never started, or another store error.
    pub async fn handle(&self, event: LifecycleEvent) -> Result<EventOutcome> {
        let span = info_span!("lifecycle_event", session_id = %event.session_id());
        async move {
            match event {
                LifecycleEvent::SessionStart(start) => self.on_session_start(start).await,
                LifecycleEvent::TurnComplete(turn) => self.on_turn_complete(turn).await,
                LifecycleEvent::ToolUse(tool) => self.on_tool_use(tool).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Register the session, drain its queue, and hand drained messages to the sink.
    ///
    /// Messages are marked delivered before the sink sees them; a sink
    /// failure is logged and the message is not retried.
    ///
    /// # Errors
    ///
    /// Returns a store error from registration or draining.
    pub async fn on_session_start(&self, start: SessionStart) -> Result<EventOutcome> {
        let session = self
            .sessions
            .register(&start.session_id, &start.workspace, start.agent_pid)
            .await?;
        let drained = self.inbox.drain(&start.session_id).await?;

        for message in &drained {
            self.hand_off(&session, message.text.clone(), DeliveryKind::Queued);
        }

        info!(drained = drained.len(), "session start processed");
        Ok(EventOutcome::Started { session, drained })
    }

    /// Record the turn, settle the session status, and run the quality loop,
    /// all in one store transaction.
    ///
    /// When no loop is running, the oldest queued message is released in
    /// the same transaction and handed to the sink as
    /// [`DeliveryKind::Released`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if the session never started, or
    /// a store error. Nothing is recorded on error.
    pub async fn on_turn_complete(&self, turn: TurnComplete) -> Result<EventOutcome> {
        let report = TurnReport {
            user_prompt: turn.user_prompt,
            agent_response: turn.agent_response,
            files_changed: turn.files_changed,
            more_expected: turn.more_expected,
        };
        let recorded = self
            .sessions
            .record_turn(&turn.session_id, &report, &self.loop_settings)
            .await?;

        self.apply_loop_decision(&recorded.session, &recorded.loop_decision);
        if let Some(message) = &recorded.released {
            info!(message_id = message.id, "queued message released after turn");
            self.hand_off(&recorded.session, message.text.clone(), DeliveryKind::Released);
        }

        Ok(EventOutcome::TurnRecorded {
            session: recorded.session,
            loop_decision: recorded.loop_decision,
            released: recorded.released,
        })
    }

    /// Record a tool invocation. The tool name is always recorded; a
    /// `tool` turn is appended only once the tool has run. Status is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if the session never started, or
    /// a store error.
    pub async fn on_tool_use(&self, tool: ToolUse) -> Result<EventOutcome> {
        let turn = match tool.phase {
            ToolPhase::Before => None,
            ToolPhase::After => {
                let content = match &tool.detail {
                    Some(detail) => format!("{}\n{detail}", tool.tool_name),
                    None => tool.tool_name.clone(),
                };
                Some(Turn::new(TurnRole::Tool, content))
            }
        };
        let session = self
            .sessions
            .record_tool_use(&tool.session_id, &tool.tool_name, turn)
            .await?;
        Ok(EventOutcome::ToolRecorded { session })
    }

    fn apply_loop_decision(&self, session: &Session, decision: &LoopDecision) {
        match decision {
            LoopDecision::Inactive => {}
            LoopDecision::Continue { prompt, iteration } => {
                info!(iteration, "quality loop continuing");
                self.hand_off(session, prompt.clone(), DeliveryKind::LoopPrompt);
            }
            LoopDecision::Stopped { reason, iterations } => {
                info!(?reason, iterations, "quality loop stopped");
            }
        }
    }

    fn hand_off(&self, session: &Session, text: String, kind: DeliveryKind) {
        let delivery = Delivery {
            session_id: session.id.clone(),
            workspace: session.workspace.clone(),
            text,
            kind,
        };
        if let Err(err) = self.sink.deliver(&delivery) {
            warn!(%err, ?kind, "delivery hand-off failed; message will not be retried");
        }
    }
}
