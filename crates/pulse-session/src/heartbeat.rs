//! Heartbeat ping/ack liveness monitoring.
//!
//! Transport-level closes are not always delivered (intermediary proxies
//! can swallow them), so an authenticated session pings on a fixed interval
//! and treats a run of unacknowledged pings as a dead connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// `max_missed` consecutive pings went unacknowledged.
    Stale,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Run heartbeat pings until the connection goes stale or `cancel` fires.
///
/// The first ping goes out immediately, then one per `interval`. Every ping
/// increments `unacked` before it is sent; an ack resets it to zero. When a
/// tick finds `unacked >= max_missed` the loop returns [`HeartbeatResult::Stale`]
/// without pinging again, so with `max_missed = 2` a silent peer is detected
/// two intervals after the first ping.
pub async fn run_heartbeat<F>(
    interval: Duration,
    max_missed: u32,
    unacked: Arc<AtomicU32>,
    mut send_ping: F,
    cancel: CancellationToken,
) -> HeartbeatResult
where
    F: FnMut(),
{
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_missed = max_missed.max(1);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
            _ = ticker.tick() => {
                let missed = unacked.load(Ordering::SeqCst);
                if missed >= max_missed {
                    return HeartbeatResult::Stale;
                }
                // Count before sending so an ack racing the write resets it.
                let _ = unacked.fetch_add(1, Ordering::SeqCst);
                send_ping();
            }
        }
    }
}

struct Running {
    cancel: CancellationToken,
    unacked: Arc<AtomicU32>,
    handle: JoinHandle<()>,
}

/// Owns at most one heartbeat loop at a time.
pub struct HeartbeatMonitor {
    interval: Duration,
    max_missed: u32,
    running: Option<Running>,
}

impl HeartbeatMonitor {
    /// Create a stopped monitor.
    pub fn new(interval: Duration, max_missed: u32) -> Self {
        Self {
            interval,
            max_missed,
            running: None,
        }
    }

    /// Start pinging. Any previous loop is stopped first.
    ///
    /// `on_stale` runs at most once, after which the loop has stopped
    /// itself and will not restart on its own.
    pub fn start<P, S>(&mut self, send_ping: P, on_stale: S)
    where
        P: FnMut() + Send + 'static,
        S: FnOnce() + Send + 'static,
    {
        let _ = self.stop();

        let cancel = CancellationToken::new();
        let unacked = Arc::new(AtomicU32::new(0));
        let interval = self.interval;
        let max_missed = self.max_missed;
        let loop_cancel = cancel.clone();
        let loop_unacked = Arc::clone(&unacked);

        let handle = tokio::spawn(async move {
            let result =
                run_heartbeat(interval, max_missed, loop_unacked, send_ping, loop_cancel).await;
            match result {
                HeartbeatResult::Stale => {
                    warn!(max_missed, "heartbeat stale");
                    on_stale();
                }
                HeartbeatResult::Cancelled => debug!("heartbeat cancelled"),
            }
        });

        self.running = Some(Running {
            cancel,
            unacked,
            handle,
        });
    }

    /// Cancel the loop. Returns `true` if a loop was live; calling it when
    /// not started is a no-op.
    pub fn stop(&mut self) -> bool {
        match self.running.take() {
            Some(running) => {
                let live = !running.handle.is_finished();
                running.cancel.cancel();
                live
            }
            None => false,
        }
    }

    /// An ack arrived: reset the missed counter.
    pub fn record_ack(&self) {
        if let Some(running) = &self.running {
            running.unacked.store(0, Ordering::SeqCst);
        }
    }

    /// Whether a loop has been started and not stopped.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Pings currently awaiting an ack.
    pub fn unacked(&self) -> u32 {
        self.running
            .as_ref()
            .map_or(0, |running| running.unacked.load(Ordering::SeqCst))
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
