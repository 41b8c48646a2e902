//! HTTP/REST API layer for Courier.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format, CORS
//! and a WebSocket event stream at `/ws/events`.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
