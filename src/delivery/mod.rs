//! Outbound delivery of drained messages and loop prompts to live agents.
//!
//! Delivery is one-way: the store marks messages delivered before they are
//! handed to a [`DeliverySink`], and nothing the sink does can undo that.
//! Sinks own their own retry policy, if any.

pub mod spawner;

use std::sync::{Arc, Mutex};

use crate::{AppError, Result};

pub use spawner::ResumeSpawner;

/// Why a delivery is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Operator message drained at session start, returned in the hook reply.
    Queued,
    /// Operator message released after a turn while no loop is running.
    Released,
    /// Quality-loop prompt issued after a completed turn.
    LoopPrompt,
    /// Operator message sent straight to the agent, bypassing the queue.
    Direct,
}

impl DeliveryKind {
    /// Whether this delivery reaches the agent through the hook's own reply
    /// rather than by resuming the conversation.
    #[must_use]
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Text to transmit into a running agent conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Conversation to deliver into.
    pub session_id: String,
    /// Workspace the agent runs in.
    pub workspace: String,
    /// Message body.
    pub text: String,
    /// Origin of the message.
    pub kind: DeliveryKind,
}

/// Capability that transmits text to a live agent.
pub trait DeliverySink: Send + Sync {
    /// Hand off one delivery. Must not block on the agent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Delivery`](crate::AppError::Delivery) if the
    /// hand-off itself could not be started.
    fn deliver(&self, delivery: &Delivery) -> Result<()>;
}

/// Sink that drops every delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DeliverySink for NullSink {
    fn deliver(&self, _delivery: &Delivery) -> Result<()> {
        Ok(())
    }
}

/// Sink that buffers deliveries in memory until the caller takes them.
///
/// The session-start hook uses this to print drained messages into the
/// agent's context instead of spawning a second agent process.
#[derive(Debug, Default)]
pub struct BufferedSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl BufferedSink {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of deliveries received so far.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Remove and return everything buffered.
    #[must_use]
    pub fn take(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }
}

impl DeliverySink for BufferedSink {
    fn deliver(&self, delivery: &Delivery) -> Result<()> {
        self.deliveries
            .lock()
            .map_err(|_| AppError::Delivery("buffered sink mutex poisoned".into()))?
            .push(delivery.clone());
        Ok(())
    }
}

/// Sink that splits deliveries between the hook reply and a resume sink.
pub struct RoutingSink {
    reply: Arc<dyn DeliverySink>,
    resume: Arc<dyn DeliverySink>,
}

impl RoutingSink {
    /// Route reply deliveries to `reply` and everything else to `resume`.
    #[must_use]
    pub fn new(reply: Arc<dyn DeliverySink>, resume: Arc<dyn DeliverySink>) -> Self {
        Self { reply, resume }
    }
}

impl DeliverySink for RoutingSink {
    fn deliver(&self, delivery: &Delivery) -> Result<()> {
        if delivery.kind.is_reply() {
            self.reply.deliver(delivery)
        } else {
            self.resume.deliver(delivery)
        }
    }
}
