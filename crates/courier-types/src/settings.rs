//! Per-organization messaging settings.
//!
//! Organizations store their settings as a loosely-typed JSON blob (edited by
//! the CRM settings screen, and occasionally by hand in the database). The
//! blob is deserialized into [`StoredSettings`], where every field is optional
//! and untyped, and [`validate_settings`] turns it into the effective
//! [`MessagingSettings`]. Clamping happens here, at load time, and nowhere else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bounds for `messages_per_minute`.
pub const MESSAGES_PER_MINUTE_RANGE: (u32, u32) = (1, 20);
/// Bounds for `messages_per_hour`.
pub const MESSAGES_PER_HOUR_RANGE: (u32, u32) = (1, 200);
/// Bounds for `messages_per_day`.
pub const MESSAGES_PER_DAY_RANGE: (u32, u32) = (1, 1000);
/// Bounds for `concurrency`.
pub const CONCURRENCY_RANGE: (u32, u32) = (1, 5);
/// Bounds for `max_batch_size`.
pub const MAX_BATCH_SIZE_RANGE: (u32, u32) = (1, 100);

/// Effective outbound rate limits for one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub messages_per_minute: u32,
    pub messages_per_hour: u32,
    pub messages_per_day: u32,
    /// Maximum simultaneous in-flight sends.
    pub concurrency: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            messages_per_minute: 10,
            messages_per_hour: 100,
            messages_per_day: 500,
            concurrency: 1,
        }
    }
}

impl RateLimitSettings {
    /// Clamp every field into its allowed range.
    pub fn clamped(self) -> Self {
        Self {
            messages_per_minute: clamp(self.messages_per_minute as i64, MESSAGES_PER_MINUTE_RANGE),
            messages_per_hour: clamp(self.messages_per_hour as i64, MESSAGES_PER_HOUR_RANGE),
            messages_per_day: clamp(self.messages_per_day as i64, MESSAGES_PER_DAY_RANGE),
            concurrency: clamp(self.concurrency as i64, CONCURRENCY_RANGE),
        }
    }
}

/// Safety policy applied to bulk sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetySettings {
    pub enable_mass_sending: bool,
    pub require_confirmation: bool,
    pub max_batch_size: u32,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            enable_mass_sending: false,
            require_confirmation: true,
            max_batch_size: 50,
        }
    }
}

/// The effective, normalized settings for one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagingSettings {
    pub rate_limiting: RateLimitSettings,
    pub safety: SafetySettings,
}

/// Settings exactly as stored: every field optional, any JSON value accepted.
///
/// Numbers may arrive as floats, negative values or numeric strings; booleans
/// may arrive as strings or 0/1. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSettings {
    #[serde(default)]
    pub rate_limiting: StoredRateLimiting,
    #[serde(default)]
    pub safety: StoredSafety,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRateLimiting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_per_minute: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_per_hour: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages_per_day: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSafety {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_mass_sending: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_confirmation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<Value>,
}

impl StoredSettings {
    /// Parse a stored settings blob. Anything that is not a JSON object
    /// (including `null`) yields all-default settings.
    pub fn from_json(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Normalize stored settings into effective settings.
///
/// Missing or unparseable values take the default; numeric values outside
/// their range are clamped to the nearest bound, never rejected.
pub fn validate_settings(stored: &StoredSettings) -> MessagingSettings {
    let rate_defaults = RateLimitSettings::default();
    let safety_defaults = SafetySettings::default();
    let rl = &stored.rate_limiting;
    let safety = &stored.safety;

    MessagingSettings {
        rate_limiting: RateLimitSettings {
            messages_per_minute: number_or(
                &rl.messages_per_minute,
                rate_defaults.messages_per_minute,
                MESSAGES_PER_MINUTE_RANGE,
            ),
            messages_per_hour: number_or(
                &rl.messages_per_hour,
                rate_defaults.messages_per_hour,
                MESSAGES_PER_HOUR_RANGE,
            ),
            messages_per_day: number_or(
                &rl.messages_per_day,
                rate_defaults.messages_per_day,
                MESSAGES_PER_DAY_RANGE,
            ),
            concurrency: number_or(&rl.concurrency, rate_defaults.concurrency, CONCURRENCY_RANGE),
        },
        safety: SafetySettings {
            enable_mass_sending: bool_or(
                &safety.enable_mass_sending,
                safety_defaults.enable_mass_sending,
            ),
            require_confirmation: bool_or(
                &safety.require_confirmation,
                safety_defaults.require_confirmation,
            ),
            max_batch_size: number_or(
                &safety.max_batch_size,
                safety_defaults.max_batch_size,
                MAX_BATCH_SIZE_RANGE,
            ),
        },
    }
}

fn clamp(value: i64, (min, max): (u32, u32)) -> u32 {
    value.clamp(min as i64, max as i64) as u32
}

fn number_or(value: &Option<Value>, default: u32, range: (u32, u32)) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.round() as i64)),
        _ => None,
    };
    clamp(parsed.unwrap_or(default as i64), range)
}

fn bool_or(value: &Option<Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|i| i != 0).unwrap_or(default),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => default,
        },
        _ => default,
    }
}
