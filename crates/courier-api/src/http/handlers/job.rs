//! Outbound job HTTP handlers.
//!
//! Endpoints:
//! - GET  /api/v1/orgs/{org}/jobs   - Jobs of an organization, oldest first
//! - GET  /api/v1/orgs/{org}/queue  - Queue counts, limiter usage, inbound depth
//! - GET  /api/v1/jobs/{id}         - One job
//! - POST /api/v1/jobs/{id}/cancel  - Cancel a pending job

use axum::extract::{Path, State};
use serde::Serialize;

use courier_core::outgoing::QueueStats;
use courier_core::rate_limit::RateLimitUsage;
use courier_types::error::QueueError;
use courier_types::job::{CancelOutcome, JobId, SendJob};

use super::{parse_org, parse_uuid};
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOverview {
    pub jobs: QueueStats,
    pub rate_limit: RateLimitUsage,
    pub incoming_depth: usize,
    pub incoming_capacity: usize,
}

/// GET /api/v1/orgs/{org}/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<Vec<SendJob>>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    Ok(timer.ok(state.runtime.outgoing.jobs_for(org)))
}

/// GET /api/v1/orgs/{org}/queue
pub async fn queue_overview(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<QueueOverview>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let runtime = &state.runtime;
    Ok(timer.ok(QueueOverview {
        jobs: runtime.outgoing.stats(org),
        rate_limit: runtime.limiter.usage(org),
        incoming_depth: runtime.incoming.depth(),
        incoming_capacity: runtime.incoming.capacity(),
    }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<ApiResponse<SendJob>, AppError> {
    let timer = RequestTimer::start();
    let id = JobId(parse_uuid(&id)?);
    let job = state
        .runtime
        .outgoing
        .job(id)
        .ok_or_else(|| QueueError::JobNotFound(id.to_string()))?;
    Ok(timer.ok(job))
}

/// POST /api/v1/jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<CancelOutcome>, AppError> {
    let timer = RequestTimer::start();
    let id = JobId(parse_uuid(&id)?);
    let outcome = state.runtime.outgoing.cancel(id).await?;
    Ok(timer.ok(outcome).with_link("job", &format!("/api/v1/jobs/{id}")))
}
