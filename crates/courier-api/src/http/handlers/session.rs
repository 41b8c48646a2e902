//! Session lifecycle HTTP handlers.
//!
//! Endpoints:
//! - GET  /api/v1/sessions                               - List known sessions
//! - GET  /api/v1/orgs/{org}/session                     - Current session snapshot
//! - POST /api/v1/orgs/{org}/session/connect             - Start connecting
//! - POST /api/v1/orgs/{org}/session/disconnect          - Tear the session down
//! - GET  /api/v1/orgs/{org}/session/pairing             - Active pairing challenge
//! - POST /api/v1/orgs/{org}/session/pairing/confirm     - Confirm pairing (loopback)
//! - POST /api/v1/orgs/{org}/session/drop                - Simulate a dropped connection (loopback)
//! - GET  /api/v1/orgs/{org}/session/outbox              - Messages the loopback network accepted

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use courier_core::session::manager::ConnectOutcome;
use courier_infra::transport::loopback::SentMessage;
use courier_types::session::{PairingChallenge, SessionSnapshot};

use super::parse_org;
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConfirmPairingRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct DropRequest {
    #[serde(default = "default_drop_reason")]
    pub reason: String,
}

fn default_drop_reason() -> String {
    "connection dropped".to_string()
}

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<AppState>) -> ApiResponse<Vec<SessionSnapshot>> {
    RequestTimer::start().ok(state.runtime.sessions.list())
}

/// GET /api/v1/orgs/{org}/session
pub async fn get_session(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<SessionSnapshot>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    Ok(timer
        .ok(state.runtime.sessions.snapshot(org))
        .with_link("pairing", &format!("/api/v1/orgs/{org}/session/pairing")))
}

/// POST /api/v1/orgs/{org}/session/connect
///
/// Returns 202 when a new connection attempt started, 200 when the session
/// was already ready.
pub async fn connect(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<ConnectOutcome>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let outcome = state.runtime.sessions.connect(org)?;
    let response = match outcome {
        ConnectOutcome::Started => timer.accepted(outcome),
        ConnectOutcome::AlreadyReady => timer.ok(outcome),
    };
    Ok(response.with_link("self", &format!("/api/v1/orgs/{org}/session")))
}

/// POST /api/v1/orgs/{org}/session/disconnect
pub async fn disconnect(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<SessionSnapshot>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    state.runtime.sessions.disconnect(org).await;
    Ok(timer.ok(state.runtime.sessions.snapshot(org)))
}

/// GET /api/v1/orgs/{org}/session/pairing
pub async fn get_pairing(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<PairingChallenge>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let challenge = state
        .runtime
        .sessions
        .pairing_challenge(org)
        .ok_or_else(|| AppError::NotFound(format!("No pairing challenge is active for {org}")))?;
    Ok(timer.ok(challenge))
}

/// POST /api/v1/orgs/{org}/session/pairing/confirm
pub async fn confirm_pairing(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Json(body): Json<ConfirmPairingRequest>,
) -> Result<ApiResponse<SessionSnapshot>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    state.connector.confirm_pairing(org, body.code.trim()).await?;
    tracing::info!(organization_id = %org, "pairing confirmed");
    Ok(timer.accepted(state.runtime.sessions.snapshot(org)))
}

/// POST /api/v1/orgs/{org}/session/drop
pub async fn drop_connection(
    State(state): State<AppState>,
    Path(org): Path<String>,
    body: Option<Json<DropRequest>>,
) -> Result<ApiResponse<SessionSnapshot>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let reason = body.map(|Json(b)| b.reason).unwrap_or_else(default_drop_reason);
    state.connector.drop_connection(org, &reason).await?;
    Ok(timer.accepted(state.runtime.sessions.snapshot(org)))
}

/// GET /api/v1/orgs/{org}/session/outbox
pub async fn outbox(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<Vec<SentMessage>>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    Ok(timer.ok(state.connector.sent(org)))
}
