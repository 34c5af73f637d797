//! Pending-message queue backed by the shared state document.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::models::message::PendingMessage;
use crate::{AppError, Result};

use super::store::DocumentStore;

/// Repository for operator-queued messages.
#[derive(Debug, Clone)]
pub struct InboxRepo {
    store: Arc<DocumentStore>,
}

impl InboxRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Queue a message for `session_id`. The session need not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` if the id or text is blank, or a
    /// store error if the transaction fails.
    pub async fn enqueue(&self, session_id: &str, text: &str) -> Result<PendingMessage> {
        if session_id.trim().is_empty() {
            return Err(AppError::InvalidInput("session id must not be empty".into()));
        }
        if text.trim().is_empty() {
            return Err(AppError::InvalidInput("message text must not be empty".into()));
        }

        let message = self
            .store
            .transact(|doc| {
                let id = doc.allocate_message_id();
                let message = PendingMessage::new(id, session_id.to_owned(), text.to_owned());
                doc.messages.push(message.clone());
                Ok(message)
            })
            .await?;

        info!(session_id, message_id = message.id, "message queued");
        Ok(message)
    }

    /// Take every undelivered message for `session_id`, marking each one
    /// delivered in the same transaction.
    ///
    /// Two concurrent drains serialize on the store lock, so each message is
    /// returned to exactly one caller.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails; nothing is marked in
    /// that case.
    pub async fn drain(&self, session_id: &str) -> Result<Vec<PendingMessage>> {
        let drained = self
            .store
            .transact(|doc| {
                let now = Utc::now();
                let taken: Vec<PendingMessage> = doc
                    .messages
                    .iter_mut()
                    .filter(|m| m.is_pending_for(session_id))
                    .map(|m| {
                        m.mark_delivered(now);
                        m.clone()
                    })
                    .collect();
                Ok(taken)
            })
            .await?;

        if !drained.is_empty() {
            info!(session_id, messages = drained.len(), "pending messages drained");
        }
        Ok(drained)
    }

    /// Take only the oldest undelivered message for `session_id`, marking it
    /// delivered in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails; nothing is marked in
    /// that case.
    pub async fn drain_next(&self, session_id: &str) -> Result<Option<PendingMessage>> {
        let taken = self
            .store
            .transact(|doc| Ok(doc.take_next_pending(session_id, Utc::now())))
            .await?;

        if let Some(message) = &taken {
            info!(session_id, message_id = message.id, "next pending message drained");
        }
        Ok(taken)
    }

    /// Undelivered messages for `session_id`, oldest first. Read-only.
    ///
    /// # Errors
    ///
    /// Returns a store error if the document cannot be read.
    pub async fn list_pending(&self, session_id: &str) -> Result<Vec<PendingMessage>> {
        let doc = self.store.read().await?;
        Ok(doc
            .messages
            .into_iter()
            .filter(|m| m.is_pending_for(session_id))
            .collect())
    }

    /// Every message ever queued for `session_id`, delivered or not.
    ///
    /// # Errors
    ///
    /// Returns a store error if the document cannot be read.
    pub async fn history(&self, session_id: &str) -> Result<Vec<PendingMessage>> {
        let doc = self.store.read().await?;
        Ok(doc
            .messages
            .into_iter()
            .filter(|m| m.session_id == session_id)
            .collect())
    }

    /// Discard undelivered messages for `session_id` without delivering them.
    ///
    /// Discarded messages are flagged delivered so they stay in the audit
    /// trail and are never drained. Returns how many were discarded.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction fails.
    pub async fn clear_pending(&self, session_id: &str) -> Result<usize> {
        let cleared = self
            .store
            .transact(|doc| {
                let now = Utc::now();
                let mut cleared = 0;
                for message in doc.messages.iter_mut().filter(|m| m.is_pending_for(session_id)) {
                    message.mark_delivered(now);
                    cleared += 1;
                }
                Ok(cleared)
            })
            .await?;

        info!(session_id, cleared, "pending messages cleared");
        Ok(cleared)
    }
}
