use thiserror::Error;

use crate::recipient::RecipientError;

/// Errors from repository operations (used by trait definitions in courier-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Connection and query failures may clear up on retry; missing rows and
    /// conflicts will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Connection | RepositoryError::Query(_))
    }
}

/// Errors reported by the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    /// The network refused the request; retrying will not help.
    #[error("rejected by network: {0}")]
    Rejected(String),

    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::Rejected(_))
    }
}

/// Errors from issuing a send on an organization's session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The session is not READY; the send never reached the transport.
    #[error("session is not ready")]
    SessionNotReady,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from session lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
}

/// Reasons a send request is refused at admission. No job is created.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("mass sending is disabled for this organization")]
    MassSendingDisabled,

    #[error("batch of {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: u32 },

    #[error("bulk sends require a confirmation token")]
    ConfirmationRequired,

    #[error("confirmation token was rejected")]
    ConfirmationRejected,

    #[error("invalid recipient: {0}")]
    InvalidRecipient(#[from] RecipientError),

    #[error("message payload is empty")]
    EmptyPayload,

    #[error("settings unavailable: {0}")]
    Settings(#[source] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Errors from outbound queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("job {0} not found")]
    JobNotFound(String),

    #[error("queue is shut down")]
    ShutDown,

    /// The job could not be written to the job store; nothing was admitted.
    #[error("job storage failed: {0}")]
    Storage(String),
}
