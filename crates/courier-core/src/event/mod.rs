//! Operational event distribution.
//!
//! - `bus` -- `EventBus` broadcasting `MessagingEvent` to any number of observers

pub mod bus;
