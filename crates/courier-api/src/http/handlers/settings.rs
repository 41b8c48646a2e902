//! Organization messaging settings HTTP handlers.
//!
//! Endpoints:
//! - GET /api/v1/orgs/{org}/settings               - Effective and stored settings
//! - PUT /api/v1/orgs/{org}/settings               - Replace the stored blob
//! - PUT /api/v1/orgs/{org}/settings/confirmation  - Set the bulk confirmation secret

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use courier_core::repository::settings::SettingsProvider;
use courier_types::confirmation::ConfirmationToken;
use courier_types::settings::MessagingSettings;

use super::parse_org;
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    /// Values actually enforced, after clamping.
    pub effective: MessagingSettings,
    /// The blob as the CRM stored it.
    pub stored: Option<Value>,
    pub confirmation_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmationSecretRequest {
    pub secret: String,
}

/// GET /api/v1/orgs/{org}/settings
pub async fn get_settings(
    State(state): State<AppState>,
    Path(org): Path<String>,
) -> Result<ApiResponse<SettingsResponse>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let response = SettingsResponse {
        effective: state.settings.load_settings(org).await?,
        stored: state.settings.raw_settings(org).await?,
        confirmation_configured: state.settings.has_confirmation_secret(org).await?,
    };
    Ok(timer.ok(response))
}

/// PUT /api/v1/orgs/{org}/settings
///
/// The blob is stored as given. The response carries the clamped values,
/// which the rate limiter picks up before this returns.
pub async fn put_settings(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Json(raw): Json<Value>,
) -> Result<ApiResponse<MessagingSettings>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    if !raw.is_object() {
        return Err(AppError::Validation("settings must be a JSON object".into()));
    }
    state.settings.store_settings(org, &raw).await?;
    let effective = state.runtime.agent.reload_settings(org).await?;
    Ok(timer.ok(effective).with_link("self", &format!("/api/v1/orgs/{org}/settings")))
}

/// PUT /api/v1/orgs/{org}/settings/confirmation
pub async fn put_confirmation_secret(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Json(body): Json<ConfirmationSecretRequest>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let secret = ConfirmationToken::new(body.secret);
    if secret.is_blank() {
        return Err(AppError::Validation("confirmation secret must not be blank".into()));
    }
    state.settings.set_confirmation_secret(org, &secret).await?;
    Ok(timer.ok(serde_json::json!({ "confirmationConfigured": true })))
}
