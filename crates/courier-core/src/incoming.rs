//! Bounded buffer between transport connections and the message handler.
//!
//! Session drivers push events as they arrive; a single [`IncomingReceiver`]
//! drains them in arrival order. A full buffer makes `push` wait, but only
//! for `push_timeout`: after that the event is handed back in a [`PushError`]
//! so the producer can dead-letter it instead of stalling the connection.

use std::time::Duration;

use courier_types::event::MessagingEvent;
use courier_types::inbound::{InboundEnvelope, InboundEvent};
use courier_types::organization::OrganizationId;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use crate::event::bus::EventBus;

/// Log target for events that could not be delivered or stored.
pub const DEAD_LETTER_TARGET: &str = "courier::dead_letter";

/// An inbound event that could not be buffered. The event travels with the
/// error so nothing is dropped silently.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("incoming queue stayed full for {waited:?}")]
    Saturated {
        envelope: Box<InboundEnvelope>,
        waited: Duration,
    },

    #[error("incoming queue consumer has stopped")]
    Closed { envelope: Box<InboundEnvelope> },
}

impl PushError {
    pub fn envelope(&self) -> &InboundEnvelope {
        match self {
            PushError::Saturated { envelope, .. } | PushError::Closed { envelope } => envelope,
        }
    }
}

/// Log an envelope verbatim for manual recovery and announce it on the bus.
pub fn dead_letter(envelope: &InboundEnvelope, reason: &str, events: &EventBus) {
    let raw = serde_json::to_string(envelope).unwrap_or_else(|e| format!("<unserializable: {e}>"));
    tracing::error!(
        target: DEAD_LETTER_TARGET,
        organization_id = %envelope.organization_id,
        external_id = %envelope.event.id,
        reason,
        envelope = %raw,
        "inbound event dead-lettered"
    );
    events.publish(MessagingEvent::InboundDeadLettered {
        organization_id: envelope.organization_id,
        external_id: envelope.event.id.clone(),
        reason: reason.to_string(),
    });
}

// ---------------------------------------------------------------------------
// IncomingQueue
// ---------------------------------------------------------------------------

/// Producer side. Cheap to clone; one clone per session driver.
#[derive(Debug, Clone)]
pub struct IncomingQueue {
    tx: mpsc::Sender<InboundEnvelope>,
    push_timeout: Duration,
}

/// Consumer side. There is exactly one.
#[derive(Debug)]
pub struct IncomingReceiver {
    rx: mpsc::Receiver<InboundEnvelope>,
}

impl IncomingQueue {
    pub fn new(capacity: usize, push_timeout: Duration) -> (Self, IncomingReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, push_timeout }, IncomingReceiver { rx })
    }

    /// Buffer an event, waiting up to `push_timeout` when the buffer is full.
    pub async fn push(&self, organization_id: OrganizationId, event: InboundEvent) -> Result<(), PushError> {
        let envelope = InboundEnvelope::new(organization_id, event);
        let envelope = match self.tx.try_send(envelope) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(envelope)) => {
                return Err(PushError::Closed {
                    envelope: Box::new(envelope),
                });
            }
            Err(TrySendError::Full(envelope)) => envelope,
        };

        tracing::warn!(
            %organization_id,
            capacity = self.capacity(),
            timeout_ms = self.push_timeout.as_millis() as u64,
            "incoming queue full, applying backpressure"
        );
        match self.tx.send_timeout(envelope, self.push_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(envelope)) => Err(PushError::Saturated {
                envelope: Box::new(envelope),
                waited: self.push_timeout,
            }),
            Err(SendTimeoutError::Closed(envelope)) => Err(PushError::Closed {
                envelope: Box::new(envelope),
            }),
        }
    }

    /// Events currently buffered.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl IncomingReceiver {
    /// Next envelope in arrival order; `None` once every producer is gone.
    pub async fn pop(&mut self) -> Option<InboundEnvelope> {
        self.rx.recv().await
    }

    /// Next envelope if one is already buffered.
    pub fn try_pop(&mut self) -> Option<InboundEnvelope> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
