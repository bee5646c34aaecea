//! Close codes and their reconnect disposition.

/// Normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Endpoint going away (page unload, server shutdown).
pub const GOING_AWAY: u16 = 1001;
/// No close frame was received; reported locally.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Server rejected the credentials.
pub const AUTH_FAILED: u16 = 4000;
/// Server requires authentication before anything else.
pub const AUTH_REQUIRED: u16 = 4001;

/// What a close code means for the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Orderly shutdown; do not reconnect.
    Clean,
    /// Application-defined rejection (4000–4999); terminal.
    Rejected,
    /// Anything else; reconnect under backoff.
    Unexpected,
}

/// Classify a close code.
#[must_use]
pub const fn classify(code: u16) -> CloseDisposition {
    match code {
        NORMAL_CLOSURE | GOING_AWAY => CloseDisposition::Clean,
        4000..=4999 => CloseDisposition::Rejected,
        _ => CloseDisposition::Unexpected,
    }
}
