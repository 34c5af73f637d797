//! Pending message model for operator-to-agent delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operator-authored text queued for delivery at a session's next start.
///
/// `delivered` flips to `true` exactly once, inside the same transaction
/// that hands the message out. Delivered messages stay in the document for
/// audit but are never drained again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMessage {
    /// Monotonically assigned identifier, unique within the store.
    pub id: u64,
    /// Target session; need not be registered yet.
    pub session_id: String,
    /// Message body.
    pub text: String,
    /// Enqueue timestamp.
    pub created_at: DateTime<Utc>,
    /// Whether the message has been handed out by a drain.
    #[serde(default)]
    pub delivered: bool,
    /// When the message was drained.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl PendingMessage {
    /// Construct an undelivered message with an assigned identifier.
    #[must_use]
    pub fn new(id: u64, session_id: String, text: String) -> Self {
        Self {
            id,
            session_id,
            text,
            created_at: Utc::now(),
            delivered: false,
            delivered_at: None,
        }
    }

    /// Whether this message is still waiting for `session_id`.
    #[must_use]
    pub fn is_pending_for(&self, session_id: &str) -> bool {
        !self.delivered && self.session_id == session_id
    }

    /// Flag the message as delivered. Never reverts.
    pub fn mark_delivered(&mut self, at: DateTime<Utc>) {
        if !self.delivered {
            self.delivered = true;
            self.delivered_at = Some(at);
        }
    }
}
