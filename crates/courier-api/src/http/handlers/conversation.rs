//! Conversation HTTP handlers.
//!
//! Endpoints:
//! - GET /api/v1/orgs/{org}/conversations                 - Most recently active first
//! - GET /api/v1/orgs/{org}/conversations/{id}/messages   - Newest first

use axum::extract::{Path, Query, State};

use courier_core::repository::message::MessageStore;
use courier_types::message::{Conversation, MessageRecord};

use super::{ListQuery, parse_org, parse_uuid};
use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// GET /api/v1/orgs/{org}/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Path(org): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<Vec<Conversation>>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let conversations = state.store.list_conversations(org, query.bounded()).await?;
    Ok(timer.ok(conversations))
}

/// GET /api/v1/orgs/{org}/conversations/{id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> Result<ApiResponse<Vec<MessageRecord>>, AppError> {
    let timer = RequestTimer::start();
    let org = parse_org(&org)?;
    let conversation_id = parse_uuid(&id)?;
    let messages = state.store.list_messages(org, conversation_id, query.bounded()).await?;
    Ok(timer.ok(messages))
}
