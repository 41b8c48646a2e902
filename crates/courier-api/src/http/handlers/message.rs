//! Agent-facing send HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/orgs/{org}/messages       - Queue one message
//! - POST /api/v1/orgs/{org}/messages/bulk  - Queue a confirmed batch
//!
//! Both return 202: admission only queues work, delivery happens later.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use courier_types::confirmation::ConfirmationToken;
use courier_types::job::{BulkItem, BulkItemResult, JobId, MessagePayload};

use super::parse_org;
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub recipient: String,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

#[derive(Debug, Deserialize)]
pub struct BulkSendRequest {
    pub items: Vec<BulkItem>,
    #[serde(default)]
    pub confirmation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub queued: usize,
    pub rejected: usize,
    pub results: Vec<BulkItemResult>,
}

/// POST /api/v1/orgs/{org}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Json(body): Json<SendRequest>,
) -> Result<ApiResponse<QueuedResponse>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let job_id = state
        .runtime
        .agent
        .send_message_for_agent(org, &body.recipient, body.payload)
        .await?;
    Ok(timer
        .accepted(QueuedResponse { job_id })
        .with_link("job", &format!("/api/v1/jobs/{job_id}")))
}

/// POST /api/v1/orgs/{org}/messages/bulk
pub async fn send_bulk(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Json(body): Json<BulkSendRequest>,
) -> Result<ApiResponse<BulkResponse>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let confirmation = body.confirmation.map(ConfirmationToken::new);
    let results = state
        .runtime
        .agent
        .send_bulk_messages_for_agent(org, body.items, confirmation)
        .await?;

    let queued = results
        .iter()
        .filter(|r| matches!(r, BulkItemResult::Queued { .. }))
        .count();
    let rejected = results.len() - queued;
    Ok(timer
        .accepted(BulkResponse {
            queued,
            rejected,
            results,
        })
        .with_link("jobs", &format!("/api/v1/orgs/{org}/jobs")))
}
