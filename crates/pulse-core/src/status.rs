//! Session lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a connection session.
///
/// ```text
/// Idle → Connecting → AwaitingAuth → Active
///            ↑                          │
///            └──── Reconnecting ←───────┘
/// any ──stop()──→ Closed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No identity yet, nothing started.
    #[default]
    Idle,
    /// Transport is opening.
    Connecting,
    /// Transport open, handshake sent, waiting for `auth_success`.
    AwaitingAuth,
    /// Authenticated; heartbeat running.
    Active,
    /// Backoff timer pending before the next connect attempt.
    Reconnecting,
    /// Terminal until a fresh `start`.
    Closed,
}

impl SessionStatus {
    /// Whether a connect attempt is in flight or established.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::AwaitingAuth | Self::Active)
    }

    /// Short label for UI connection indicators.
    #[must_use]
    pub const fn indicator(self) -> &'static str {
        match self {
            Self::Idle | Self::Closed => "offline",
            Self::Connecting | Self::AwaitingAuth => "connecting",
            Self::Active => "live",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingAuth => "awaiting_auth",
            Self::Active => "active",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(SessionStatus::default(), SessionStatus::Idle);
    }

    #[test]
    fn busy_states() {
        assert!(SessionStatus::Connecting.is_busy());
        assert!(SessionStatus::AwaitingAuth.is_busy());
        assert!(SessionStatus::Active.is_busy());
        assert!(!SessionStatus::Idle.is_busy());
        assert!(!SessionStatus::Reconnecting.is_busy());
        assert!(!SessionStatus::Closed.is_busy());
    }

    #[test]
    fn indicator_labels() {
        assert_eq!(SessionStatus::Active.indicator(), "live");
        assert_eq!(SessionStatus::Reconnecting.indicator(), "reconnecting");
        assert_eq!(SessionStatus::Closed.indicator(), "offline");
    }

    #[test]
    fn serde_matches_display() {
        let json = serde_json::to_string(&SessionStatus::AwaitingAuth).unwrap();
        assert_eq!(json, "\"awaiting_auth\"");
        assert_eq!(SessionStatus::AwaitingAuth.to_string(), "awaiting_auth");
    }
}
