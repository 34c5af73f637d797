//! Session model and lifecycle helpers.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const PREVIEW_CHARS: usize = 100;
const CURRENT_TASK_CHARS: usize = 100;

/// Lifecycle status for an agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Agent is working on a turn.
    Active,
    /// Session exists but the agent is waiting between turns.
    Idle,
    /// Session ended explicitly.
    Stopped,
}

impl SessionStatus {
    /// Lowercase label used in listings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
        }
    }
}

/// Author of a recorded turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Prompt written by the human or the dashboard.
    User,
    /// Response produced by the agent.
    Agent,
    /// Tool invocation performed by the agent.
    Tool,
}

/// One recorded exchange in a session's history. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    /// Who produced this turn.
    pub role: TurnRole,
    /// Text payload, possibly with tool-use metadata.
    pub content: String,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Construct a turn stamped with the current time.
    #[must_use]
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Quality-loop settings toggled by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopState {
    /// Whether a loop prompt is re-sent after each completed turn.
    #[serde(default)]
    pub enabled: bool,
    /// Iterations performed since the loop was enabled or reset.
    #[serde(default)]
    pub count: u32,
    /// Selected loop prompt name; `None` means the built-in prompt.
    #[serde(default)]
    pub prompt_name: Option<String>,
    /// When the loop was last enabled.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// One tracked coding-agent run, keyed by the external conversation id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// External conversation identifier; must round-trip unchanged.
    pub id: String,
    /// Filesystem path the agent operates in.
    pub workspace: String,
    /// Final component of `workspace`, for display.
    pub workspace_name: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// First registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Last observed activity timestamp.
    pub last_active_at: DateTime<Utc>,
    /// Conversation history in append order.
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Truncated text of the most recent user prompt.
    #[serde(default)]
    pub current_task: Option<String>,
    /// PID of the agent process that last started this session.
    #[serde(default)]
    pub agent_pid: Option<u32>,
    /// Distinct tool names used, in first-use order.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Distinct file paths reported as changed, in first-report order.
    #[serde(default)]
    pub files_changed: Vec<String>,
    /// Quality-loop settings.
    #[serde(default)]
    pub loop_state: LoopState,
}

impl Session {
    /// Construct a newly started session.
    #[must_use]
    pub fn new(id: String, workspace: String) -> Self {
        let now = Utc::now();
        Self {
            workspace_name: workspace_name(&workspace),
            id,
            workspace,
            status: SessionStatus::Active,
            created_at: now,
            last_active_at: now,
            turns: Vec::new(),
            current_task: None,
            agent_pid: None,
            tools_used: Vec::new(),
            files_changed: Vec::new(),
            loop_state: LoopState::default(),
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Stopped -> Active` is allowed only through re-registration; callers
    /// performing explicit transitions never request it.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self.status, next),
            (
                SessionStatus::Active,
                SessionStatus::Idle | SessionStatus::Stopped
            ) | (
                SessionStatus::Idle | SessionStatus::Stopped,
                SessionStatus::Active
            ) | (SessionStatus::Idle, SessionStatus::Stopped)
        )
    }

    /// Append a turn and update derived fields.
    ///
    /// Tool turns are display text only; tool names are tracked through
    /// [`Session::record_tool`].
    pub fn push_turn(&mut self, turn: Turn) {
        if turn.role == TurnRole::User {
            self.current_task = Some(truncate_chars(&turn.content, CURRENT_TASK_CHARS));
        }
        self.last_active_at = turn.timestamp.max(self.last_active_at);
        self.turns.push(turn);
    }

    /// Record a tool name if not already present.
    pub fn record_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_owned());
        }
    }

    /// Merge changed file paths, keeping first-report order.
    pub fn record_files_changed<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            let path = path.into();
            if !self.files_changed.contains(&path) {
                self.files_changed.push(path);
            }
        }
    }

    /// Number of recorded turns.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Preview of the most recent turn, truncated for listings.
    #[must_use]
    pub fn last_turn_preview(&self) -> Option<String> {
        let last = self.turns.last()?;
        let mut preview = truncate_chars(&last.content, PREVIEW_CHARS);
        if last.content.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }
        Some(preview)
    }

    /// Whether a user turn with the same text appears among the last `window` turns.
    #[must_use]
    pub fn has_recent_user_turn(&self, text: &str, window: usize) -> bool {
        let needle = text.trim();
        self.turns
            .iter()
            .rev()
            .take(window)
            .any(|t| t.role == TurnRole::User && t.content.trim() == needle)
    }
}

/// Display name for a workspace path: its final component, or `unknown`.
#[must_use]
pub fn workspace_name(workspace: &str) -> String {
    if workspace.is_empty() {
        return "unknown".into();
    }
    Path::new(workspace)
        .file_name()
        .map_or_else(|| workspace.to_owned(), |n| n.to_string_lossy().into_owned())
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
