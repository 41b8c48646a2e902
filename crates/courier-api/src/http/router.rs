//! Axum router configuration with middleware.
//!
//! API routes live under `/api/v1/`; `/health` and `/ws/events` sit at the root.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Sessions
        .route("/sessions", get(handlers::session::list_sessions))
        .route("/orgs/{org}/session", get(handlers::session::get_session))
        .route("/orgs/{org}/session/connect", post(handlers::session::connect))
        .route("/orgs/{org}/session/disconnect", post(handlers::session::disconnect))
        .route("/orgs/{org}/session/pairing", get(handlers::session::get_pairing))
        .route(
            "/orgs/{org}/session/pairing/confirm",
            post(handlers::session::confirm_pairing),
        )
        .route("/orgs/{org}/session/drop", post(handlers::session::drop_connection))
        .route("/orgs/{org}/session/outbox", get(handlers::session::outbox))
        // Outbound
        .route("/orgs/{org}/messages", post(handlers::message::send_message))
        .route("/orgs/{org}/messages/bulk", post(handlers::message::send_bulk))
        .route("/orgs/{org}/jobs", get(handlers::job::list_jobs))
        .route("/orgs/{org}/queue", get(handlers::job::queue_overview))
        .route("/jobs/{id}", get(handlers::job::get_job))
        .route("/jobs/{id}/cancel", post(handlers::job::cancel_job))
        // Settings
        .route(
            "/orgs/{org}/settings",
            get(handlers::settings::get_settings).put(handlers::settings::put_settings),
        )
        .route(
            "/orgs/{org}/settings/confirmation",
            put(handlers::settings::put_confirmation_secret),
        )
        // Inbound
        .route("/orgs/{org}/inbound", post(handlers::inbound::inject_inbound))
        .route(
            "/orgs/{org}/conversations",
            get(handlers::conversation::list_conversations),
        )
        .route(
            "/orgs/{org}/conversations/{id}/messages",
            get(handlers::conversation::list_messages),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health))
        .route("/ws/events", get(handlers::ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
