//! Per-organization messaging sessions.
//!
//! - `manager` -- `SessionManager`: owns every organization's connection and
//!   its state machine; the only way to send on a connection
//! - `driver` -- the task that connects, handshakes, pumps inbound events and
//!   reconnects with backoff for one organization

mod driver;
pub mod manager;

pub use manager::{ConnectOutcome, SessionManager};
