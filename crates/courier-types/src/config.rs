//! Global configuration types for Courier.
//!
//! `CourierConfig` represents the top-level `config.toml` that controls
//! session timeouts, retry policies and queue sizing. All fields have
//! sensible defaults, so an empty file (or no file) is a valid configuration.

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Top-level configuration for the messaging subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub outgoing: OutgoingConfig,
    #[serde(default)]
    pub incoming: IncomingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Exponential backoff policy shared by reconnects, sends and persistence.
///
/// Attempt `n` (1-based) waits `min(base_delay * 2^(n-1), max_delay)`, then
/// spreads it by up to `jitter` (a 0.0..=1.0 fraction) in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (for reconnects: consecutive failures
    /// tolerated before the session becomes FATAL).
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_jitter() -> f64 {
    0.2
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Policy for reconnecting a dropped session.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter: default_jitter(),
        }
    }

    /// Policy for retrying a transiently failed send.
    pub fn send() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: default_jitter(),
        }
    }

    /// Policy for retrying storage writes.
    pub fn persistence() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: default_jitter(),
        }
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bound on connecting and completing the handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How long a pairing challenge may stay unconsumed.
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,
    #[serde(default = "RetryPolicy::reconnect")]
    pub reconnect: RetryPolicy,
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}

fn default_pairing_timeout_ms() -> u64 {
    60_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            pairing_timeout_ms: default_pairing_timeout_ms(),
            reconnect: RetryPolicy::reconnect(),
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_millis(self.pairing_timeout_ms)
    }
}

/// Outbound queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingConfig {
    /// Pause when the concurrency cap is the only thing blocking dispatch.
    #[serde(default = "default_throttle_backoff_ms")]
    pub throttle_backoff_ms: u64,
    #[serde(default = "RetryPolicy::send")]
    pub send_retry: RetryPolicy,
    /// Retries for job store writes made after a send attempt.
    #[serde(default = "RetryPolicy::persistence")]
    pub persistence_retry: RetryPolicy,
}

fn default_throttle_backoff_ms() -> u64 {
    250
}

impl Default for OutgoingConfig {
    fn default() -> Self {
        Self {
            throttle_backoff_ms: default_throttle_backoff_ms(),
            send_retry: RetryPolicy::send(),
            persistence_retry: RetryPolicy::persistence(),
        }
    }
}

impl OutgoingConfig {
    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }
}

/// Inbound queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingConfig {
    /// Buffered events before `push` starts applying backpressure.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Longest `push` will wait for space before handing the event back.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    #[serde(default = "RetryPolicy::persistence")]
    pub persistence_retry: RetryPolicy,
}

fn default_capacity() -> usize {
    1024
}

fn default_push_timeout_ms() -> u64 {
    5_000
}

impl Default for IncomingConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            push_timeout_ms: default_push_timeout_ms(),
            persistence_retry: RetryPolicy::persistence(),
        }
    }
}

impl IncomingConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }
}

/// REST API listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
