//! Shared domain types for Courier.
//!
//! This crate contains the domain types used across the messaging subsystem:
//! organizations, sessions, send jobs, inbound events, settings, events and
//! their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, secrecy.

pub mod config;
pub mod confirmation;
pub mod error;
pub mod event;
pub mod inbound;
pub mod job;
pub mod message;
pub mod organization;
pub mod recipient;
pub mod session;
pub mod settings;
