//! Messaging session state for one organization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;

use crate::organization::OrganizationId;

/// Connection lifecycle of an organization's messaging session.
///
/// ```text
/// DISCONNECTED -> CONNECTING -> PENDING_AUTH -> AUTHENTICATED -> READY
///       ^              |              |               |            |
///       +--------------+--------------+---------------+------------+
///                        (transport failure / timeout)
///
/// DISCONNECTED -- (max reconnect attempts exhausted) --> FATAL
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// A pairing challenge is waiting to be consumed by the operator.
    PendingAuth,
    Authenticated,
    Ready,
    /// Automatic reconnection gave up; only an explicit connect recovers.
    Fatal,
}

impl ConnectionState {
    /// True while a connection attempt is between CONNECTING and READY.
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::PendingAuth
                | ConnectionState::Authenticated
        )
    }

    /// Operator-facing label for status surfaces.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::PendingAuth => "awaiting pairing",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Ready => "ready",
            ConnectionState::Fatal => "failed (reconnect required)",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::PendingAuth => "PENDING_AUTH",
            ConnectionState::Authenticated => "AUTHENTICATED",
            ConnectionState::Ready => "READY",
            ConnectionState::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// A one-time pairing code the operator must scan to link the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingChallenge {
    /// Opaque code as issued by the transport (typically rendered as a QR code).
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Point-in-time view of a session, safe to hand to any observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub organization_id: OrganizationId,
    pub state: ConnectionState,
    pub last_authenticated_at: Option<DateTime<Utc>>,
    /// Consecutive failed connection attempts; reset on authentication.
    pub reconnect_attempts: u32,
    /// Present only while `state == PendingAuth`.
    pub pairing_challenge: Option<PairingChallenge>,
    pub updated_at: DateTime<Utc>,
}

impl SessionSnapshot {
    /// A fresh, disconnected session.
    pub fn new(organization_id: OrganizationId) -> Self {
        Self {
            organization_id,
            state: ConnectionState::Disconnected,
            last_authenticated_at: None,
            reconnect_attempts: 0,
            pairing_challenge: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}
