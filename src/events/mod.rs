//! Agent lifecycle events and their translation into store operations.

pub mod payload;
pub mod processor;

use crate::models::message::PendingMessage;
use crate::models::session::Session;
use crate::quality_loop::LoopDecision;

pub use payload::{HookKind, HookPayload};
pub use processor::EventProcessor;

/// An agent session started or resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    /// External conversation id.
    pub session_id: String,
    /// Workspace root the agent runs in; empty when unknown.
    pub workspace: String,
    /// PID of the agent process, when known.
    pub agent_pid: Option<u32>,
}

/// The agent finished a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnComplete {
    /// External conversation id.
    pub session_id: String,
    /// Prompt that started the turn.
    pub user_prompt: Option<String>,
    /// Agent's final text response.
    pub agent_response: Option<String>,
    /// Paths the agent reported changing during the turn.
    pub files_changed: Vec<String>,
    /// Keep the session active instead of marking it idle.
    pub more_expected: bool,
}

/// Whether a tool event fired before or after the tool ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPhase {
    /// The tool is about to run; only its name is recorded.
    Before,
    /// The tool ran; a `tool` turn is appended as well.
    After,
}

/// The agent invoked a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUse {
    /// External conversation id.
    pub session_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Rendered tool input, if any.
    pub detail: Option<String>,
    /// Which side of the invocation this event reports.
    pub phase: ToolPhase,
}

/// Closed set of lifecycle events accepted from hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Session start or resume.
    SessionStart(SessionStart),
    /// Turn completion.
    TurnComplete(TurnComplete),
    /// Tool invocation.
    ToolUse(ToolUse),
}

impl LifecycleEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStart(e) => &e.session_id,
            Self::TurnComplete(e) => &e.session_id,
            Self::ToolUse(e) => &e.session_id,
        }
    }
}

/// Result of processing one lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Session registered; `drained` were taken from the queue and handed to the sink.
    Started {
        /// Session after registration.
        session: Session,
        /// Messages drained for delivery, in enqueue order.
        drained: Vec<PendingMessage>,
    },
    /// Turn recorded and quality loop evaluated.
    TurnRecorded {
        /// Session after the update.
        session: Session,
        /// Loop decision for this turn.
        loop_decision: LoopDecision,
        /// Queued message released to the agent after this turn, if any.
        released: Option<PendingMessage>,
    },
    /// Tool use recorded.
    ToolRecorded {
        /// Session after the update.
        session: Session,
    },
}

impl EventOutcome {
    /// Texts drained for delivery; empty for non-start events.
    #[must_use]
    pub fn drained_texts(&self) -> Vec<String> {
        match self {
            Self::Started { drained, .. } => drained.iter().map(|m| m.text.clone()).collect(),
            Self::TurnRecorded { .. } | Self::ToolRecorded { .. } => Vec::new(),
        }
    }

    /// Session state after the event.
    #[must_use]
    pub fn session(&self) -> &Session {
        match self {
            Self::Started { session, .. }
            | Self::TurnRecorded { session, .. }
            | Self::ToolRecorded { session } => session,
        }
    }
}
