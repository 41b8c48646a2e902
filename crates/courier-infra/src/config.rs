//! Configuration loader for Courier.
//!
//! Reads `config.toml` from the data directory (`~/.courier/` in production)
//! and deserializes it into [`CourierConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::Path;

use courier_types::config::CourierConfig;

/// File name of the configuration inside the data directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`CourierConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Values that would make a component unusable are raised to their minimum.
pub async fn load_config(data_dir: &Path) -> CourierConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return CourierConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return CourierConfig::default();
        }
    };

    match toml::from_str::<CourierConfig>(&content) {
        Ok(config) => sanitize(config),
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            CourierConfig::default()
        }
    }
}

fn sanitize(mut config: CourierConfig) -> CourierConfig {
    if config.incoming.capacity == 0 {
        tracing::warn!("incoming.capacity must be at least 1, using 1");
        config.incoming.capacity = 1;
    }
    for policy in [
        &mut config.outgoing.send_retry,
        &mut config.outgoing.persistence_retry,
        &mut config.incoming.persistence_retry,
    ] {
        policy.max_attempts = policy.max_attempts.max(1);
        policy.jitter = policy.jitter.clamp(0.0, 1.0);
    }
    config.session.reconnect.jitter = config.session.reconnect.jitter.clamp(0.0, 1.0);
    config
}
