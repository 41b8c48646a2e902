//! Repository trait definitions (ports) for Courier.
//!
//! Implementations live in courier-infra. All traits use native async fn in
//! traits (Rust 2024 edition, no async_trait macro).

pub mod job;
pub mod message;
pub mod notifier;
pub mod settings;
