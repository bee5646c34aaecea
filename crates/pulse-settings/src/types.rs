//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each type implements
//! [`Default`] with production values; `#[serde(default)]` lets partial JSON
//! fill the rest from defaults.

use std::time::Duration;

use pulse_core::BackoffPolicy;
use pulse_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::endpoint::derive_ws_url;
use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "endpoint": { "origin": "https://chat.example.com" },
///   "backoff": { "baseDelayMs": 500 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Where to connect.
    pub endpoint: EndpointSettings,
    /// Session lifecycle limits.
    pub session: SessionSettings,
    /// Reconnect backoff parameters.
    pub backoff: BackoffPolicy,
    /// Liveness pings.
    pub heartbeat: HeartbeatSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PulseSettings {
    /// Reject combinations the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_ms == 0 {
            return Err(invalid("heartbeat.intervalMs must be greater than 0"));
        }
        if self.heartbeat.max_missed == 0 {
            return Err(invalid("heartbeat.maxMissed must be at least 1"));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(invalid("backoff.baseDelayMs must not exceed backoff.maxDelayMs"));
        }
        if self.session.auth_timeout_ms == 0 {
            return Err(invalid("session.authTimeoutMs must be greater than 0"));
        }
        if self.session.outbound_buffer == 0 {
            return Err(invalid("session.outboundBuffer must be at least 1"));
        }
        let _ = self.endpoint.ws_url()?;
        Ok(())
    }
}

fn invalid(message: &str) -> SettingsError {
    SettingsError::InvalidValue(message.to_string())
}

/// Server location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// Host origin, e.g. `https://chat.example.com` (`ws`/`wss` also accepted).
    pub origin: String,
    /// WebSocket path on that host.
    pub path: String,
}

impl EndpointSettings {
    /// WebSocket URL derived from the origin's host and scheme.
    pub fn ws_url(&self) -> Result<String> {
        derive_ws_url(&self.origin, &self.path)
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            path: "/ws".to_string(),
        }
    }
}

/// Session lifecycle limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Handshake window in milliseconds.
    pub auth_timeout_ms: u64,
    /// How long to wait for a requested close to be confirmed.
    pub close_timeout_ms: u64,
    /// Outbound frames buffered towards the transport writer.
    pub outbound_buffer: usize,
}

impl SessionSettings {
    /// Handshake window.
    #[must_use]
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    /// Close confirmation window.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            auth_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            outbound_buffer: 256,
        }
    }
}

/// Heartbeat ping settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between pings in milliseconds.
    pub interval_ms: u64,
    /// Consecutive unacknowledged pings before the connection is stale.
    pub max_missed: u32,
}

impl HeartbeatSettings {
    /// Interval between pings.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_missed: 2,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let settings = PulseSettings::default();
        assert_eq!(settings.session.max_attempts, 5);
        assert_eq!(settings.session.auth_timeout(), Duration::from_secs(10));
        assert_eq!(settings.heartbeat.interval(), Duration::from_secs(30));
        assert_eq!(settings.heartbeat.max_missed, 2);
        assert_eq!(settings.backoff.base_delay_ms, 1000);
        assert_eq!(settings.backoff.max_delay_ms, 30_000);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn camel_case_json() {
        let json = serde_json::to_value(PulseSettings::default()).unwrap();
        assert_eq!(json["session"]["maxAttempts"], 5);
        assert_eq!(json["heartbeat"]["intervalMs"], 30_000);
        assert_eq!(json["endpoint"]["path"], "/ws");
    }

    #[test]
    fn partial_section_uses_defaults() {
        let settings: PulseSettings =
            serde_json::from_str(r#"{"heartbeat": {"intervalMs": 5000}}"#).unwrap();
        assert_eq!(settings.heartbeat.interval_ms, 5000);
        assert_eq!(settings.heartbeat.max_missed, 2);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut settings = PulseSettings::default();
        settings.heartbeat.interval_ms = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_zero_max_missed() {
        let mut settings = PulseSettings::default();
        settings.heartbeat.max_missed = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_base_above_cap() {
        let mut settings = PulseSettings::default();
        settings.backoff = BackoffPolicy::new(10_000, 1_000);
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn validate_rejects_bad_origin() {
        let mut settings = PulseSettings::default();
        settings.endpoint.origin = "ftp://example.com".into();
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn endpoint_url_from_defaults() {
        assert_eq!(
            EndpointSettings::default().ws_url().unwrap(),
            "ws://localhost:8080/ws"
        );
    }
}
