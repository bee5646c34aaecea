//! Reconnect backoff calculation.
//!
//! Pure, stateless, and deterministic so it can be tested without timers:
//!
//! - [`backoff_delay_ms`]: `min(base * 2^attempt, cap)` in milliseconds
//! - [`BackoffPolicy`]: the same formula bound to configured parameters

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Exponential backoff without jitter.
///
/// Formula: `min(base_delay_ms * 2^attempt, max_delay_ms)`. Overflow
/// saturates, so very large attempt numbers land on the cap.
///
/// * `attempt`: zero-based attempt index (0 for the first reconnect)
#[must_use]
pub fn backoff_delay_ms(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(max_delay_ms)
}

/// Backoff parameters. Multiplier is fixed at 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Delay before the first reconnect, in ms.
    pub base_delay_ms: u64,
    /// Upper bound on any delay, in ms.
    pub max_delay_ms: u64,
}

impl BackoffPolicy {
    /// Create a policy from millisecond parameters.
    #[must_use]
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_delay_ms(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }

    /// The first `attempts` delays, in order.
    pub fn schedule(&self, attempts: u32) -> impl Iterator<Item = Duration> + '_ {
        (0..attempts).map(|attempt| self.delay(attempt))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
