//! Application error type mapping to HTTP status codes and envelope format.
//!
//! Admission refusals keep stable machine-readable codes so agent tooling
//! can branch on them.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use courier_infra::transport::loopback::LoopbackError;
use courier_types::error::{AdmissionError, QueueError, RepositoryError, SessionError};

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Admission(AdmissionError),
    Session(SessionError),
    Queue(QueueError),
    Repository(RepositoryError),
    Loopback(LoopbackError),
    NotFound(String),
    Validation(String),
}

impl From<AdmissionError> for AppError {
    fn from(e: AdmissionError) -> Self {
        AppError::Admission(e)
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Session(e)
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        AppError::Queue(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl From<LoopbackError> for AppError {
    fn from(e: LoopbackError) -> Self {
        AppError::Loopback(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Admission(e) => match e {
                AdmissionError::MassSendingDisabled => (StatusCode::FORBIDDEN, "MASS_SENDING_DISABLED", None),
                AdmissionError::BatchTooLarge { size, max } => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "BATCH_TOO_LARGE",
                    Some(json!({ "size": size, "max": max })),
                ),
                AdmissionError::ConfirmationRequired => (StatusCode::FORBIDDEN, "CONFIRMATION_REQUIRED", None),
                AdmissionError::ConfirmationRejected => (StatusCode::FORBIDDEN, "CONFIRMATION_REJECTED", None),
                AdmissionError::InvalidRecipient(_) => (StatusCode::BAD_REQUEST, "INVALID_RECIPIENT", None),
                AdmissionError::EmptyPayload => (StatusCode::BAD_REQUEST, "EMPTY_PAYLOAD", None),
                AdmissionError::Settings(_) => (StatusCode::SERVICE_UNAVAILABLE, "SETTINGS_UNAVAILABLE", None),
                AdmissionError::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE", None),
            },
            AppError::Session(SessionError::AlreadyConnecting) => (StatusCode::CONFLICT, "ALREADY_CONNECTING", None),
            AppError::Queue(QueueError::JobNotFound(_)) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND", None),
            AppError::Queue(QueueError::ShutDown) => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE", None),
            AppError::Queue(QueueError::Storage(_)) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE", None),
            AppError::Repository(RepositoryError::NotFound) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            AppError::Repository(RepositoryError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT", None),
            AppError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", None),
            AppError::Loopback(LoopbackError::NotConnected) => (StatusCode::CONFLICT, "NOT_CONNECTED", None),
            AppError::Loopback(LoopbackError::NoPendingPairing) => (StatusCode::CONFLICT, "NO_PENDING_PAIRING", None),
            AppError::Loopback(LoopbackError::WrongCode) => (StatusCode::BAD_REQUEST, "WRONG_PAIRING_CODE", None),
            AppError::Loopback(LoopbackError::ChannelClosed) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SESSION_UNAVAILABLE", None)
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Admission(e) => e.to_string(),
            AppError::Session(e) => e.to_string(),
            AppError::Queue(e) => e.to_string(),
            AppError::Repository(e) => e.to_string(),
            AppError::Loopback(e) => e.to_string(),
            AppError::NotFound(msg) | AppError::Validation(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %self.message(), "request failed");
        }
        ApiResponse::error(status, code, &self.message(), details).into_response()
    }
}
