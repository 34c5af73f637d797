//! Hook input JSON as delivered on stdin by the agent host.

use serde::Deserialize;
use serde_json::Value;

use super::{LifecycleEvent, SessionStart, ToolPhase, ToolUse, TurnComplete};
use crate::models::session::truncate_chars;
use crate::{AppError, Result};

const TOOL_INPUT_PREVIEW_CHARS: usize = 200;

/// Which hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// `SessionStart` hook.
    SessionStart,
    /// `Stop` hook, fired when a turn ends.
    Stop,
    /// `PreToolUse` hook.
    PreToolUse,
    /// `PostToolUse` hook.
    PostToolUse,
}

/// Conversation snapshot attached to the stop hook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationPayload {
    /// Prompt that started the turn.
    #[serde(default, rename = "userPrompt")]
    pub user_prompt: Option<String>,
    /// Agent's text reply.
    #[serde(default, rename = "agentTextResponse")]
    pub agent_text_response: Option<String>,
    /// Code changes; entries carry a `path` field.
    #[serde(default, rename = "agentCodeResponse")]
    pub agent_code_response: Vec<Value>,
}

/// Tool invocation attached to tool hooks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolUsePayload {
    /// Tool name.
    #[serde(default)]
    pub name: Option<String>,
    /// Tool arguments.
    #[serde(default)]
    pub input: Option<Value>,
}

/// Raw hook input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookPayload {
    /// External conversation id.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Workspace roots; the first one is the session's workspace.
    #[serde(default)]
    pub workspace_roots: Vec<String>,
    /// Conversation snapshot (stop hook).
    #[serde(default)]
    pub conversation: Option<ConversationPayload>,
    /// Tool invocation (tool hooks).
    #[serde(default, rename = "toolUse")]
    pub tool_use: Option<ToolUsePayload>,
}

impl HookPayload {
    /// Parse hook input from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Hook` if the text is not a JSON object of the
    /// expected shape.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| AppError::Hook(format!("invalid hook input: {err}")))
    }

    /// Primary workspace root, or empty when none was reported.
    #[must_use]
    pub fn workspace(&self) -> String {
        self.workspace_roots.first().cloned().unwrap_or_default()
    }

    /// Convert the payload into a lifecycle event for `kind`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Hook` if the conversation id is missing.
    pub fn into_event(self, kind: HookKind, agent_pid: Option<u32>) -> Result<LifecycleEvent> {
        let session_id = self
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::Hook("hook input has no conversation_id".into()))?;

        let event = match kind {
            HookKind::SessionStart => LifecycleEvent::SessionStart(SessionStart {
                workspace: self.workspace(),
                session_id,
                agent_pid,
            }),
            HookKind::Stop => {
                let conversation = self.conversation.unwrap_or_default();
                let files_changed = conversation
                    .agent_code_response
                    .iter()
                    .filter_map(|change| change.get("path").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect();
                LifecycleEvent::TurnComplete(TurnComplete {
                    session_id,
                    user_prompt: non_blank(conversation.user_prompt),
                    agent_response: non_blank(conversation.agent_text_response),
                    files_changed,
                    more_expected: false,
                })
            }
            HookKind::PreToolUse | HookKind::PostToolUse => {
                let tool = self.tool_use.unwrap_or_default();
                let phase = if kind == HookKind::PreToolUse {
                    ToolPhase::Before
                } else {
                    ToolPhase::After
                };
                LifecycleEvent::ToolUse(ToolUse {
                    session_id,
                    tool_name: tool
                        .name
                        .filter(|name| !name.trim().is_empty())
                        .unwrap_or_else(|| "unknown".into()),
                    detail: tool.input.as_ref().and_then(preview_tool_input),
                    phase,
                })
            }
        };
        Ok(event)
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}

/// Compact JSON preview of a tool input, or `None` for empty input.
#[must_use]
pub fn preview_tool_input(input: &Value) -> Option<String> {
    let empty = match input {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return None;
    }

    let rendered = input.to_string();
    let mut preview = truncate_chars(&rendered, TOOL_INPUT_PREVIEW_CHARS);
    if rendered.chars().count() > TOOL_INPUT_PREVIEW_CHARS {
        preview.push_str("...");
    }
    Some(preview)
}
