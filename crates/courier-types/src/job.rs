//! Outbound send jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::organization::OrganizationId;
use crate::recipient::Recipient;

/// Unique identifier for a send job (UUID v7, so ids sort by enqueue time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub body: String,
    /// Optional media attachment, referenced by URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl MessagePayload {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            media_url: None,
        }
    }

    /// A payload with neither text nor media carries nothing to send.
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty() && self.media_url.as_deref().is_none_or(str::is_empty)
    }
}

/// Send job lifecycle.
///
/// - Pending: waiting in the organization's queue
/// - InFlight: handed to the transport; cannot be cancelled
/// - Sent / Failed / Cancelled: terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InFlight,
    Sent,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InFlight => "IN_FLIGHT",
            JobStatus::Sent => "SENT",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_FLIGHT" => Ok(JobStatus::InFlight),
            "SENT" => Ok(JobStatus::Sent),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One queued outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendJob {
    pub id: JobId,
    pub organization_id: OrganizationId,
    pub recipient: Recipient,
    pub payload: MessagePayload,
    pub enqueued_at: DateTime<Utc>,
    /// Number of transport attempts made so far.
    pub attempts: u32,
    /// When the latest attempt was handed to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Message id assigned by the remote network once sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
}

impl SendJob {
    /// Build a new pending job.
    pub fn new(organization_id: OrganizationId, recipient: Recipient, payload: MessagePayload) -> Self {
        Self {
            id: JobId::new(),
            organization_id,
            recipient,
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            last_attempt_at: None,
            status: JobStatus::Pending,
            last_error: None,
            completed_at: None,
            external_message_id: None,
        }
    }
}

/// Per-item outcome of a bulk admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BulkItemResult {
    Queued { index: usize, job_id: JobId },
    Rejected { index: usize, reason: String },
}

/// One requested message inside a bulk request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItem {
    pub recipient: String,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

/// Result of `cancel`: cancellation only affects jobs that are still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// The send was already handed to the transport and cannot be interrupted.
    InFlight,
    AlreadyFinished { status: JobStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = SendJob::new(
            OrganizationId::new(),
            Recipient::parse("5511999990000").unwrap(),
            MessagePayload::text("hi"),
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.last_attempt_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InFlight.is_terminal());
        assert!(JobStatus::Sent.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_text_matches_display() {
        for status in [
            JobStatus::Pending,
            JobStatus::InFlight,
            JobStatus::Sent,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert!("DONE".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_empty_payload() {
        assert!(MessagePayload::text("   ").is_empty());
        assert!(!MessagePayload::text("hello").is_empty());
        let media = MessagePayload {
            body: String::new(),
            media_url: Some("https://cdn.example.com/a.jpg".into()),
        };
        assert!(!media.is_empty());
    }

    #[test]
    fn test_bulk_item_flattens_payload() {
        let item: BulkItem =
            serde_json::from_str(r#"{"recipient":"5511999990000","body":"hello"}"#).unwrap();
        assert_eq!(item.payload.body, "hello");
        assert!(item.payload.media_url.is_none());
    }

    #[test]
    fn test_cancel_outcome_serialization() {
        let json = serde_json::to_value(CancelOutcome::AlreadyFinished {
            status: JobStatus::Sent,
        })
        .unwrap();
        assert_eq!(json["outcome"], "already_finished");
        assert_eq!(json["status"], "SENT");
    }
}
