//! Transport adapters.

pub mod loopback;
