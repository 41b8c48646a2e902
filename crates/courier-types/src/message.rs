//! Conversation and message records at the persistence boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;

use crate::inbound::InboundKind;
use crate::organization::OrganizationId;

/// Which way a message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Direction::Inbound),
            "outbound" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// A CRM client matched by contact number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub id: Uuid,
    pub name: String,
}

/// A conversation between an organization and one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    /// Contact phone digits.
    pub contact: String,
    pub client_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

/// A persisted message. `(organization_id, external_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub conversation_id: Uuid,
    /// Network-assigned message id, used for idempotent writes.
    pub external_id: String,
    pub direction: Direction,
    pub sender: String,
    pub body: String,
    pub kind: InboundKind,
    pub has_media: bool,
    pub sent_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an idempotent message insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A message with the same `(organization_id, external_id)` already exists.
    Duplicate,
}
