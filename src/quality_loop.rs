//! Quality loop: keep re-prompting an agent after each turn until it reports
//! completion or an iteration cap is reached.
//!
//! The decision is a pure function over the session's [`LoopState`]; the
//! session repository applies it inside a single store transaction so two
//! overlapping stop hooks cannot both advance the same iteration.

use std::collections::HashMap;

use crate::config::{DashboardConfig, LoopPrompt, DEFAULT_LOOP_PROMPT_NAME};
use crate::models::session::LoopState;

/// Loop-related settings lifted from [`DashboardConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    /// Iteration cap per enable/reset.
    pub max_iterations: u32,
    /// Case-insensitive phrases that signal the goal is complete.
    pub completion_phrases: Vec<String>,
    /// Named prompts selectable per session.
    pub prompts: HashMap<String, LoopPrompt>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&DashboardConfig::default())
    }
}

impl LoopSettings {
    /// Extract loop settings from the dashboard configuration.
    #[must_use]
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            max_iterations: config.max_loop_iterations,
            completion_phrases: config.completion_phrases.clone(),
            prompts: config.loop_prompts.clone(),
        }
    }

    /// Resolve a prompt by name, falling back to the built-in prompt.
    #[must_use]
    pub fn prompt(&self, name: Option<&str>) -> LoopPrompt {
        let name = name.unwrap_or(DEFAULT_LOOP_PROMPT_NAME);
        self.prompts.get(name).cloned().unwrap_or_default()
    }
}

/// Why a loop stopped on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The agent emitted the prompt's end condition.
    EndCondition,
    /// The agent used a configured completion phrase.
    GoalComplete,
    /// The iteration cap was reached.
    MaxIterations,
}

/// What the caller should do after a turn completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopDecision {
    /// No loop is running for this session.
    Inactive,
    /// Deliver `prompt` to start iteration `iteration`.
    Continue {
        /// Prompt text to hand to the delivery sink.
        prompt: String,
        /// One-based iteration number just started.
        iteration: u32,
    },
    /// The loop was disabled.
    Stopped {
        /// Why the loop ended.
        reason: LoopStop,
        /// Iterations performed before stopping.
        iterations: u32,
    },
}

/// Whether `text` contains any completion phrase, ignoring case.
#[must_use]
pub fn indicates_completion(text: &str, phrases: &[String]) -> bool {
    if text.is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    phrases
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| lowered.contains(&p.to_lowercase()))
}

/// Advance the loop after a completed turn whose agent output was `response`.
pub fn evaluate(state: &mut LoopState, response: &str, settings: &LoopSettings) -> LoopDecision {
    if !state.enabled {
        return LoopDecision::Inactive;
    }

    let prompt = settings.prompt(state.prompt_name.as_deref());
    let end_condition_met =
        !prompt.end_condition.is_empty() && response.contains(&prompt.end_condition);

    let stop = if end_condition_met {
        Some(LoopStop::EndCondition)
    } else if indicates_completion(response, &settings.completion_phrases) {
        Some(LoopStop::GoalComplete)
    } else if state.count >= settings.max_iterations {
        Some(LoopStop::MaxIterations)
    } else {
        None
    };

    if let Some(reason) = stop {
        state.enabled = false;
        return LoopDecision::Stopped {
            reason,
            iterations: state.count,
        };
    }

    state.count += 1;
    LoopDecision::Continue {
        prompt: prompt.prompt,
        iteration: state.count,
    }
}
