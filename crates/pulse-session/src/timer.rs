//! Cancellable one-shot timers tagged with a connect generation.

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

/// Holds at most one armed one-shot timer.
///
/// Arming spawns a task that sleeps for the delay and then runs the fire
/// callback unless cancelled first. The callback receives nothing; callers
/// capture the generation they armed with and let the state machine discard
/// stale fires.
#[derive(Debug, Default)]
pub struct TimerSlot {
    armed: Option<(u64, CancellationToken)>,
    cancellations: u64,
}

impl TimerSlot {
    /// An empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot, replacing (and cancelling) any armed timer.
    pub fn arm<F>(&mut self, generation: u64, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.cancel();
        let token = CancellationToken::new();
        let child = token.clone();
        let _task = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = child.cancelled() => {}
                () = time::sleep(delay) => on_fire(),
            }
        });
        self.armed = Some((generation, token));
    }

    /// Cancel the armed timer. Returns `false` (and counts nothing) when the
    /// slot was empty.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some((_, token)) => {
                token.cancel();
                self.cancellations += 1;
                true
            }
            None => false,
        }
    }

    /// The timer for `generation` fired; clear the slot if it still holds it.
    pub fn fired(&mut self, generation: u64) {
        if self.armed.as_ref().is_some_and(|(armed, _)| *armed == generation) {
            self.armed = None;
        }
    }

    /// Whether a timer is armed.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Generation of the armed timer, if any.
    pub fn armed_generation(&self) -> Option<u64> {
        self.armed.as_ref().map(|(generation, _)| *generation)
    }

    /// How many armed timers were cancelled over the slot's lifetime.
    pub fn cancellations(&self) -> u64 {
        self.cancellations
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some((_, token)) = self.armed.take() {
            token.cancel();
        }
    }
}
