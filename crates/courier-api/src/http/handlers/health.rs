//! Liveness endpoint.

use axum::extract::State;
use serde::Serialize;

use courier_types::session::ConnectionState;

use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub ready_sessions: usize,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResponse<Health> {
    let sessions = state.runtime.sessions.list();
    let ready_sessions = sessions.iter().filter(|s| s.state == ConnectionState::Ready).count();
    RequestTimer::start().ok(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: sessions.len(),
        ready_sessions,
    })
}
