//! Business logic and port definitions for Courier.
//!
//! This crate defines the "ports" (repository and transport traits) that the
//! infrastructure layer implements, plus the messaging machinery built on top
//! of them: rate limiting, per-organization sessions, the outbound and inbound
//! queues, the inbound message handler and the agent-facing send API.
//!
//! It depends only on `courier-types` -- never on `courier-infra` or any
//! database/IO crate.

pub mod agent;
pub mod event;
pub mod handler;
pub mod incoming;
pub mod outgoing;
pub mod rate_limit;
pub mod repository;
pub mod retry;
pub mod runtime;
pub mod session;
pub mod transport;
