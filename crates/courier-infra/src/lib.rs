//! Infrastructure layer for Courier.
//!
//! Contains implementations of the ports defined in `courier-core`: SQLite
//! storage for conversations, messages and organization settings, the
//! `config.toml` loader, data directory resolution, confirmation-secret
//! hashing and the in-process loopback transport.

pub mod config;
pub mod crypto;
pub mod filesystem;
pub mod sqlite;
pub mod transport;
