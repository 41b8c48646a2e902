//! Operational events for the messaging event bus.
//!
//! `MessagingEvent` is broadcast on every session state transition, every
//! send job terminal outcome, and every inbound event that had to be set aside
//! for manual recovery. All variants are Clone + Send + Sync for use with tokio
//! broadcast channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::organization::OrganizationId;
use crate::session::ConnectionState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagingEvent {
    /// A session moved between states.
    SessionStateChanged {
        organization_id: OrganizationId,
        from: ConnectionState,
        to: ConnectionState,
        at: DateTime<Utc>,
    },

    /// A new pairing code is waiting for the operator.
    PairingChallengeIssued {
        organization_id: OrganizationId,
        expires_at: DateTime<Utc>,
    },

    /// The session dropped and a reconnect is scheduled.
    ReconnectScheduled {
        organization_id: OrganizationId,
        attempt: u32,
        delay_ms: u64,
    },

    /// Automatic reconnection gave up; the session is FATAL.
    ReconnectExhausted {
        organization_id: OrganizationId,
        attempts: u32,
        last_error: String,
    },

    /// A send job was delivered to the network.
    JobSent {
        organization_id: OrganizationId,
        job_id: JobId,
        attempts: u32,
    },

    /// A send job failed permanently.
    JobFailed {
        organization_id: OrganizationId,
        job_id: JobId,
        attempts: u32,
        error: String,
    },

    /// A pending send job was cancelled before dispatch.
    JobCancelled {
        organization_id: OrganizationId,
        job_id: JobId,
    },

    /// An inbound message was stored.
    InboundPersisted {
        organization_id: OrganizationId,
        external_id: String,
    },

    /// An inbound event could not be stored and was logged for manual recovery.
    InboundDeadLettered {
        organization_id: OrganizationId,
        external_id: String,
        reason: String,
    },
}

impl MessagingEvent {
    /// The organization this event belongs to.
    pub fn organization_id(&self) -> OrganizationId {
        match self {
            MessagingEvent::SessionStateChanged { organization_id, .. }
            | MessagingEvent::PairingChallengeIssued { organization_id, .. }
            | MessagingEvent::ReconnectScheduled { organization_id, .. }
            | MessagingEvent::ReconnectExhausted { organization_id, .. }
            | MessagingEvent::JobSent { organization_id, .. }
            | MessagingEvent::JobFailed { organization_id, .. }
            | MessagingEvent::JobCancelled { organization_id, .. }
            | MessagingEvent::InboundPersisted { organization_id, .. }
            | MessagingEvent::InboundDeadLettered { organization_id, .. } => *organization_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let org = OrganizationId::new();
        let ev = MessagingEvent::SessionStateChanged {
            organization_id: org,
            from: ConnectionState::Ready,
            to: ConnectionState::Disconnected,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "session_state_changed");
        assert_eq!(json["from"], "READY");
        assert_eq!(json["to"], "DISCONNECTED");
        assert_eq!(ev.organization_id(), org);
    }
}
