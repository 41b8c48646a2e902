//! HTTP request handlers for the REST API.

pub mod conversation;
pub mod health;
pub mod inbound;
pub mod job;
pub mod message;
pub mod session;
pub mod settings;
pub mod ws;

use serde::Deserialize;
use uuid::Uuid;

use courier_types::organization::OrganizationId;

use crate::http::error::AppError;

/// Query parameters for list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

impl ListQuery {
    /// The requested limit, kept within 1..=500.
    pub fn bounded(&self) -> i64 {
        self.limit.clamp(1, 500)
    }
}

/// Parse an organization id from a path parameter, returning a 400 on invalid format.
pub(crate) fn parse_org(s: &str) -> Result<OrganizationId, AppError> {
    s.parse::<OrganizationId>()
        .map_err(|_| AppError::Validation(format!("Invalid organization id: {s}")))
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}
