//! Raw inbound events as delivered by the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::organization::OrganizationId;

/// Kind of inbound message, as reported by the messaging network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Chat,
    Image,
    Video,
    Audio,
    /// Push-to-talk voice note.
    Ptt,
    Document,
    Sticker,
    Location,
    Vcard,
    /// A "message deleted" marker.
    Revoked,
    /// Protocol or group notifications that carry no user content.
    Notification,
    #[serde(other)]
    Unknown,
}

impl InboundKind {
    /// Whether this kind represents something a person actually sent.
    pub fn is_user_content(self) -> bool {
        !matches!(self, InboundKind::Revoked | InboundKind::Notification)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InboundKind::Chat => "chat",
            InboundKind::Image => "image",
            InboundKind::Video => "video",
            InboundKind::Audio => "audio",
            InboundKind::Ptt => "ptt",
            InboundKind::Document => "document",
            InboundKind::Sticker => "sticker",
            InboundKind::Location => "location",
            InboundKind::Vcard => "vcard",
            InboundKind::Revoked => "revoked",
            InboundKind::Notification => "notification",
            InboundKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .unwrap_or(InboundKind::Unknown)
    }
}

/// A message received on the transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Network-assigned message id; unique per organization account.
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub body: String,
    /// Unix timestamp (seconds) as reported by the network.
    pub timestamp: i64,
    #[serde(default)]
    pub has_media: bool,
    #[serde(rename = "type")]
    pub kind: InboundKind,
}

/// An inbound event tagged with the organization whose session received it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub organization_id: OrganizationId,
    pub event: InboundEvent,
    pub received_at: DateTime<Utc>,
}

impl InboundEnvelope {
    pub fn new(organization_id: OrganizationId, event: InboundEvent) -> Self {
        Self {
            organization_id,
            event,
            received_at: Utc::now(),
        }
    }
}
