//! The persisted state document: every session and every queued message.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::PendingMessage;
use super::session::Session;

/// Current on-disk format version.
pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

fn default_next_message_id() -> u64 {
    1
}

/// Unit of atomicity for the store: read whole, change once, write whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreDocument {
    /// Format version written by this build.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Sessions keyed by external conversation id.
    #[serde(default)]
    pub sessions: BTreeMap<String, Session>,
    /// Queued messages in enqueue order.
    #[serde(default)]
    pub messages: Vec<PendingMessage>,
    /// Identifier the next enqueued message receives.
    #[serde(default = "default_next_message_id")]
    pub next_message_id: u64,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            sessions: BTreeMap::new(),
            messages: Vec::new(),
            next_message_id: default_next_message_id(),
        }
    }
}

impl StoreDocument {
    /// Reserve the next message identifier.
    ///
    /// Recovers from a counter that lags behind stored ids (e.g. a
    /// hand-edited document) so identifiers stay unique.
    pub fn allocate_message_id(&mut self) -> u64 {
        let floor = self.messages.iter().map(|m| m.id).max().map_or(1, |max| max + 1);
        let id = self.next_message_id.max(floor);
        self.next_message_id = id + 1;
        id
    }

    /// Mark the oldest undelivered message for `session_id` delivered and
    /// return it.
    pub fn take_next_pending(
        &mut self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Option<PendingMessage> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.is_pending_for(session_id))?;
        message.mark_delivered(at);
        Some(message.clone())
    }

    /// Whether the document holds no sessions and no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.messages.is_empty()
    }
}
