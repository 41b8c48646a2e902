//! Inbound simulation HTTP handler.
//!
//! Endpoint:
//! - POST /api/v1/orgs/{org}/inbound - Deliver an event through the loopback connection
//!
//! The event travels the same path a real network event would: the session
//! driver, the incoming queue and the message handler.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use courier_types::inbound::{InboundEvent, InboundKind};

use super::parse_org;
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundRequest {
    /// Network message id. Generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<InboundKind>,
}

#[derive(Debug, Serialize)]
pub struct InboundAccepted {
    pub external_id: String,
}

impl InboundRequest {
    fn into_event(self) -> InboundEvent {
        InboundEvent {
            id: self.id.unwrap_or_else(|| format!("loopback.{}", uuid::Uuid::now_v7().simple())),
            from: self.from,
            to: self.to.unwrap_or_else(|| "loopback@c.us".to_string()),
            body: self.body,
            timestamp: self.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            has_media: self.has_media,
            kind: self.kind.unwrap_or(InboundKind::Chat),
        }
    }
}

/// POST /api/v1/orgs/{org}/inbound
pub async fn inject_inbound(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Json(body): Json<InboundRequest>,
) -> Result<ApiResponse<InboundAccepted>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    if body.from.trim().is_empty() {
        return Err(AppError::Validation("from must not be empty".into()));
    }
    let event = body.into_event();
    let external_id = event.id.clone();
    state.connector.inject_inbound(org, event).await?;
    Ok(timer
        .accepted(InboundAccepted { external_id })
        .with_link("conversations", &format!("/api/v1/orgs/{org}/conversations")))
}
