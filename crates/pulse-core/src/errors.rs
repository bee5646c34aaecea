//! Error taxonomy for the session client.
//!
//! - [`SessionError`]: top-level enum, the value surfaced through the status
//!   observer and returned from `start`
//! - [`ConnectionError`]: transport failed to open or dropped; recovered by
//!   reconnecting while under the attempt ceiling
//! - [`AuthError`]: handshake rejected or timed out; terminal
//! - [`ProtocolError`]: malformed or unrecognised inbound frame; logged and
//!   dropped
//! - [`SendFailure`]: `send` while not active; returned, never queued
//! - [`HandlerError`]: a subscriber handler failed; isolated by the dispatcher
//!
//! All errors are `Clone` so the last one can live in the published session
//! snapshot.

use thiserror::Error;

use crate::status::SessionStatus;

// ─────────────────────────────────────────────────────────────────────────────
// SessionError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for session operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// `start` was called with an empty identity (or none was available).
    #[error("a non-empty user identity is required")]
    InvalidIdentity,

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {status}")]
    InvalidState {
        /// Status at the time of the call.
        status: SessionStatus,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Transport-level failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Handshake failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Attempt ceiling reached.
    #[error("gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    /// Malformed or unrecognised inbound frame.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Outbound frame not accepted.
    #[error(transparent)]
    Send(#[from] SendFailure),
}

impl SessionError {
    /// Whether the session cannot recover without a fresh `start`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::ReconnectExhausted { .. })
    }

    /// Whether the session recovers from this on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Protocol(_))
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentity => "INVALID_IDENTITY",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::ReconnectExhausted { .. } => "RECONNECT_EXHAUSTED",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Send(_) => "SEND_FAILURE",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain errors
// ─────────────────────────────────────────────────────────────────────────────

/// Transport failed to open or dropped unexpectedly.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The transport factory could not open a connection.
    #[error("transport failed to open: {0}")]
    OpenFailed(String),
    /// The server or network closed the connection with a non-clean code.
    #[error("connection dropped (code {code}): {reason}")]
    Dropped {
        /// Close code reported by the transport.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// Consecutive heartbeat pings went unacknowledged.
    #[error("no heartbeat acknowledgement after {missed} pings")]
    HeartbeatTimeout {
        /// Number of unacknowledged pings.
        missed: u32,
    },
}

/// Authentication handshake failed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// The server closed with an application rejection code.
    #[error("authentication rejected (code {code}): {reason}")]
    Rejected {
        /// Rejection close code (4000–4999).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// No `auth_success` arrived within the handshake window.
    #[error("no authentication acknowledgement within {after_ms}ms")]
    Timeout {
        /// Handshake window in milliseconds.
        after_ms: u64,
    },
}

/// Inbound frame could not be decoded or routed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// No string `type` discriminator.
    #[error("frame has no type discriminator")]
    MissingType,
    /// `type` outside the known set.
    #[error("unknown frame type: {0}")]
    UnknownKind(String),
}

/// An outbound frame was not accepted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendFailure {
    /// The session is not authenticated and connected.
    #[error("session is {status}, not active")]
    NotActive {
        /// Status at the time of the call.
        status: SessionStatus,
    },
    /// The outbound buffer is full.
    #[error("outbound buffer full")]
    Backpressure,
    /// The transport writer has already gone away.
    #[error("transport closed")]
    TransportClosed,
}

/// A subscriber handler failed while handling an event.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Failed(String),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Convenience constructor for handler implementations.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
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
    fn auth_errors_are_terminal() {
        let err: SessionError = AuthError::Timeout { after_ms: 10 }.into();
        assert!(err.is_terminal());
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "AUTH_ERROR");
    }

    #[test]
    fn reconnect_exhausted_is_terminal() {
        let err = SessionError::ReconnectExhausted { attempts: 5 };
        assert!(err.is_terminal());
        assert_eq!(err.to_string(), "gave up reconnecting after 5 attempts");
    }

    #[test]
    fn connection_errors_are_retryable() {
        let err: SessionError = ConnectionError::Dropped {
            code: 1006,
            reason: String::new(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn invalid_state_display() {
        let err = SessionError::InvalidState {
            status: SessionStatus::Active,
            operation: "start",
        };
        assert_eq!(err.to_string(), "cannot start while active");
    }

    #[test]
    fn send_failure_display() {
        let err = SendFailure::NotActive {
            status: SessionStatus::Reconnecting,
        };
        assert_eq!(err.to_string(), "session is reconnecting, not active");
    }

    #[test]
    fn from_conversions() {
        let err: SessionError = ProtocolError::MissingType.into();
        assert_matches!(err, SessionError::Protocol(ProtocolError::MissingType));
        let err: SessionError = SendFailure::Backpressure.into();
        assert_matches!(err, SessionError::Send(SendFailure::Backpressure));
    }

    #[test]
    fn transparent_display_forwards() {
        let err: SessionError = AuthError::Rejected {
            code: 4000,
            reason: "bad token".into(),
        }
        .into();
        assert_eq!(err.to_string(), "authentication rejected (code 4000): bad token");
    }
}
