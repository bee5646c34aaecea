//! Connection session state machine.
//!
//! [`SessionMachine::handle`] is the single authoritative transition
//! function. It owns no I/O and no timers: every input (a caller request, a
//! transport callback, a timer firing) goes in, and a list of [`Effect`]s
//! comes out for the runtime to execute in order.
//!
//! ```text
//! Idle ──start──▶ Connecting ──open──▶ AwaitingAuth ──auth_success──▶ Active
//!                    ▲   │ open failed        │ close 4xxx / timeout   │
//!                    │   ▼                    ▼                        │ drop / stale
//!                 Reconnecting ◀──────── unexpected close ◀────────────┘
//!                    │ ceiling reached
//!                    ▼
//!                  Closed ◀── stop() from anywhere, clean close
//! ```
//!
//! Every connect attempt gets a fresh generation; transport inputs carry the
//! generation of the link they came from and timer inputs the generation
//! they were armed in. Anything from an older generation is ignored, which
//! is what keeps a late timer or a late open from resurrecting a stopped
//! session. At most one transport link exists at a time: a connect that
//! starts while the previous link is still closing waits for its release.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use pulse_core::close::{self, CloseDisposition, NORMAL_CLOSURE};
use pulse_core::{
    AuthError, BackoffPolicy, ConnectionError, FrameKind, InboundFrame, OutboundFrame,
    SessionError, SessionStatus, UserIdentity,
};

/// Something that happened to the session.
#[derive(Clone, Debug, PartialEq)]
pub enum Input {
    /// Caller asked to start with this identity.
    Start(UserIdentity),
    /// Caller asked to stop.
    Stop,
    /// The transport for `generation` finished opening.
    TransportOpened {
        /// Link generation.
        generation: u64,
    },
    /// The transport for `generation` could not be opened.
    TransportFailed {
        /// Link generation.
        generation: u64,
        /// Factory error text.
        error: String,
    },
    /// The transport for `generation` is fully closed.
    TransportClosed {
        /// Link generation.
        generation: u64,
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A decoded frame arrived on the link for `generation`.
    Frame {
        /// Link generation.
        generation: u64,
        /// The frame.
        frame: InboundFrame,
    },
    /// The handshake window armed in `generation` elapsed.
    AuthTimeout {
        /// Generation the timer was armed in.
        generation: u64,
    },
    /// The backoff timer armed in `generation` elapsed.
    ReconnectDue {
        /// Generation the timer was armed in.
        generation: u64,
    },
    /// The heartbeat started in `generation` wants to ping.
    HeartbeatTick {
        /// Generation the heartbeat was started in.
        generation: u64,
    },
    /// The heartbeat started in `generation` saw too many missed acks.
    HeartbeatStale {
        /// Generation the heartbeat was started in.
        generation: u64,
    },
}

/// Work for the runtime, in execution order.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Open a transport tagged with `generation`.
    OpenTransport {
        /// Link generation.
        generation: u64,
    },
    /// Write a frame to the open link.
    Send(OutboundFrame),
    /// Start the closing handshake on the open link.
    CloseTransport {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// Drop the (closed) link.
    ReleaseTransport,
    /// Arm the handshake timeout.
    ArmAuthTimeout {
        /// Generation to tag the fire with.
        generation: u64,
        /// Window.
        after: Duration,
    },
    /// Cancel the handshake timeout.
    CancelAuthTimeout,
    /// Arm the backoff timer.
    ScheduleReconnect {
        /// Generation to tag the fire with.
        generation: u64,
        /// Backoff delay.
        delay: Duration,
    },
    /// Cancel the backoff timer.
    CancelReconnect,
    /// Start the heartbeat monitor.
    StartHeartbeat {
        /// Generation to tag ticks with.
        generation: u64,
    },
    /// Stop the heartbeat monitor.
    StopHeartbeat,
    /// Reset the heartbeat's missed-ack counter.
    HeartbeatAck,
    /// Hand a frame to the dispatcher.
    Dispatch(InboundFrame),
}

/// Limits the machine enforces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    /// Reconnect delay schedule.
    pub backoff: BackoffPolicy,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Handshake window.
    pub auth_timeout: Duration,
    /// Missed acks reported in a heartbeat timeout.
    pub max_missed: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_attempts: 5,
            auth_timeout: Duration::from_secs(10),
            max_missed: 2,
        }
    }
}

/// Observable state, published after every transition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Reconnect attempts since the last successful authentication.
    pub attempt_count: u32,
    /// Current connect generation.
    pub generation: u64,
    /// When the last heartbeat ping was sent.
    pub last_heartbeat_sent_at: Option<DateTime<Utc>>,
    /// When the last heartbeat ack arrived.
    pub last_heartbeat_ack_at: Option<DateTime<Utc>>,
    /// Most recent error, cleared on successful authentication or `start`.
    pub last_error: Option<SessionError>,
    /// Backoff delay of the pending reconnect.
    pub next_retry_in: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    None,
    Opening(u64),
    Open { generation: u64, closing: bool },
}

/// The session lifecycle.
#[derive(Debug)]
pub struct SessionMachine {
    config: MachineConfig,
    status: SessionStatus,
    attempt_count: u32,
    generation: u64,
    identity: Option<UserIdentity>,
    link: Link,
    connect_pending: bool,
    auth_timer_armed: bool,
    reconnect_armed: bool,
    heartbeat_running: bool,
    last_heartbeat_sent_at: Option<DateTime<Utc>>,
    last_heartbeat_ack_at: Option<DateTime<Utc>>,
    last_error: Option<SessionError>,
    next_retry_in: Option<Duration>,
}

impl SessionMachine {
    /// A machine in [`SessionStatus::Idle`].
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            status: SessionStatus::Idle,
            attempt_count: 0,
            generation: 0,
            identity: None,
            link: Link::None,
            connect_pending: false,
            auth_timer_armed: false,
            reconnect_armed: false,
            heartbeat_running: false,
            last_heartbeat_sent_at: None,
            last_heartbeat_ack_at: None,
            last_error: None,
            next_retry_in: None,
        }
    }

    /// Apply one input. Only [`Input::Start`] can fail; every other input
    /// is either applied or ignored as stale.
    pub fn handle(
        &mut self,
        input: Input,
        now: DateTime<Utc>,
    ) -> Result<Vec<Effect>, SessionError> {
        let mut effects = Vec::new();
        match input {
            Input::Start(identity) => self.on_start(identity, &mut effects)?,
            Input::Stop => self.on_stop(&mut effects),
            Input::TransportOpened { generation } => self.on_opened(generation, &mut effects),
            Input::TransportFailed { generation, error } => {
                self.on_open_failed(generation, error, &mut effects);
            }
            Input::TransportClosed {
                generation,
                code,
                reason,
            } => self.on_closed(generation, code, reason, &mut effects),
            Input::Frame { generation, frame } => {
                self.on_frame(generation, frame, now, &mut effects);
            }
            Input::AuthTimeout { generation } => self.on_auth_timeout(generation, &mut effects),
            Input::ReconnectDue { generation } => self.on_reconnect_due(generation, &mut effects),
            Input::HeartbeatTick { generation } => {
                self.on_heartbeat_tick(generation, now, &mut effects);
            }
            Input::HeartbeatStale { generation } => {
                self.on_heartbeat_stale(generation, &mut effects);
            }
        }
        Ok(effects)
    }

    // ── caller requests ─────────────────────────────────────────────────────

    fn on_start(
        &mut self,
        identity: UserIdentity,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        if self.status.is_busy() {
            return Err(SessionError::InvalidState {
                status: self.status,
                operation: "start",
            });
        }
        if self.reconnect_armed {
            self.reconnect_armed = false;
            effects.push(Effect::CancelReconnect);
        }
        self.identity = Some(identity);
        self.attempt_count = 0;
        self.last_error = None;
        self.next_retry_in = None;
        self.begin_connect(effects);
        Ok(())
    }

    fn on_stop(&mut self, effects: &mut Vec<Effect>) {
        if self.status == SessionStatus::Closed {
            return;
        }
        self.enter_closed(None, "client stop", effects);
    }

    // ── transport ───────────────────────────────────────────────────────────

    fn on_opened(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        if self.link != Link::Opening(generation) {
            warn!(generation, "open completed for an untracked link");
            effects.push(Effect::ReleaseTransport);
            return;
        }
        self.link = Link::Open {
            generation,
            closing: false,
        };

        let current = generation == self.generation && self.status == SessionStatus::Connecting;
        let user_id = self.identity.as_ref().map(|id| id.as_str().to_owned());
        match (current, user_id) {
            (true, Some(user_id)) => {
                self.status = SessionStatus::AwaitingAuth;
                effects.push(Effect::Send(OutboundFrame::Authenticate { user_id }));
                self.auth_timer_armed = true;
                effects.push(Effect::ArmAuthTimeout {
                    generation,
                    after: self.config.auth_timeout,
                });
            }
            _ => {
                debug!(generation, current = self.generation, "closing superseded transport");
                self.begin_close("superseded", effects);
            }
        }
    }

    fn on_open_failed(&mut self, generation: u64, error: String, effects: &mut Vec<Effect>) {
        if self.link == Link::Opening(generation) {
            self.link = Link::None;
        }
        if generation == self.generation && self.status == SessionStatus::Connecting {
            self.handle_unexpected(ConnectionError::OpenFailed(error), effects);
        } else {
            debug!(generation, "ignoring open failure from an old attempt");
        }
        self.after_release(effects);
    }

    fn on_closed(&mut self, generation: u64, code: u16, reason: String, effects: &mut Vec<Effect>) {
        match self.link {
            Link::Open { generation: open, .. } if open == generation => {}
            _ => {
                debug!(generation, code, "ignoring close for an untracked link");
                return;
            }
        }
        self.link = Link::None;
        effects.push(Effect::ReleaseTransport);

        let live = generation == self.generation
            && matches!(
                self.status,
                SessionStatus::AwaitingAuth | SessionStatus::Active
            );
        if live {
            match close::classify(code) {
                CloseDisposition::Clean => self.enter_closed(None, "", effects),
                CloseDisposition::Rejected => {
                    warn!(code, %reason, "server rejected the session");
                    self.enter_closed(
                        Some(AuthError::Rejected { code, reason }.into()),
                        "",
                        effects,
                    );
                }
                CloseDisposition::Unexpected => {
                    self.handle_unexpected(ConnectionError::Dropped { code, reason }, effects);
                }
            }
        }
        self.after_release(effects);
    }

    fn on_frame(
        &mut self,
        generation: u64,
        frame: InboundFrame,
        now: DateTime<Utc>,
        effects: &mut Vec<Effect>,
    ) {
        let on_live_link = matches!(
            self.link,
            Link::Open { generation: open, closing: false } if open == generation
        );
        if !on_live_link || generation != self.generation {
            debug!(generation, kind = %frame.kind, "ignoring frame from an old link");
            return;
        }

        match frame.kind {
            FrameKind::AuthSuccess => {
                if self.status != SessionStatus::AwaitingAuth {
                    debug!(status = %self.status, "ignoring unexpected auth_success");
                    return;
                }
                self.status = SessionStatus::Active;
                self.attempt_count = 0;
                self.last_error = None;
                self.next_retry_in = None;
                if self.auth_timer_armed {
                    self.auth_timer_armed = false;
                    effects.push(Effect::CancelAuthTimeout);
                }
                self.heartbeat_running = true;
                effects.push(Effect::StartHeartbeat { generation });
            }
            FrameKind::Pong => {
                if self.status == SessionStatus::Active {
                    self.last_heartbeat_ack_at = Some(now);
                    effects.push(Effect::HeartbeatAck);
                }
            }
            _ if self.status == SessionStatus::Active => effects.push(Effect::Dispatch(frame)),
            _ => debug!(kind = %frame.kind, "dropping frame received before authentication"),
        }
    }

    // ── timers ──────────────────────────────────────────────────────────────

    fn on_auth_timeout(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        if generation != self.generation || self.status != SessionStatus::AwaitingAuth {
            return;
        }
        self.auth_timer_armed = false;
        let after_ms = u64::try_from(self.config.auth_timeout.as_millis()).unwrap_or(u64::MAX);
        warn!(after_ms, "authentication timed out");
        self.enter_closed(
            Some(AuthError::Timeout { after_ms }.into()),
            "authentication timed out",
            effects,
        );
    }

    fn on_reconnect_due(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        if generation != self.generation
            || self.status != SessionStatus::Reconnecting
            || !self.reconnect_armed
        {
            return;
        }
        self.reconnect_armed = false;
        self.next_retry_in = None;
        self.begin_connect(effects);
    }

    fn on_heartbeat_tick(&mut self, generation: u64, now: DateTime<Utc>, effects: &mut Vec<Effect>) {
        if generation != self.generation
            || self.status != SessionStatus::Active
            || !self.heartbeat_running
        {
            return;
        }
        self.last_heartbeat_sent_at = Some(now);
        effects.push(Effect::Send(OutboundFrame::Ping));
    }

    fn on_heartbeat_stale(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        if generation != self.generation || self.status != SessionStatus::Active {
            return;
        }
        self.heartbeat_running = false;
        effects.push(Effect::StopHeartbeat);
        self.begin_close("heartbeat timeout", effects);
        self.handle_unexpected(
            ConnectionError::HeartbeatTimeout {
                missed: self.config.max_missed,
            },
            effects,
        );
    }

    // ── helpers ─────────────────────────────────────────────────────────────

    fn begin_connect(&mut self, effects: &mut Vec<Effect>) {
        self.generation += 1;
        self.status = SessionStatus::Connecting;
        if self.link == Link::None {
            self.open_now(effects);
        } else {
            debug!(generation = self.generation, "waiting for previous transport to close");
            self.connect_pending = true;
        }
    }

    fn open_now(&mut self, effects: &mut Vec<Effect>) {
        self.connect_pending = false;
        self.link = Link::Opening(self.generation);
        effects.push(Effect::OpenTransport {
            generation: self.generation,
        });
    }

    fn after_release(&mut self, effects: &mut Vec<Effect>) {
        if self.connect_pending && self.link == Link::None {
            self.open_now(effects);
        }
    }

    fn begin_close(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        if let Link::Open {
            generation,
            closing: false,
        } = self.link
        {
            self.link = Link::Open {
                generation,
                closing: true,
            };
            effects.push(Effect::CloseTransport {
                code: NORMAL_CLOSURE,
                reason: reason.to_owned(),
            });
        }
    }

    fn stop_timers(&mut self, effects: &mut Vec<Effect>) {
        if self.heartbeat_running {
            self.heartbeat_running = false;
            effects.push(Effect::StopHeartbeat);
        }
        if self.auth_timer_armed {
            self.auth_timer_armed = false;
            effects.push(Effect::CancelAuthTimeout);
        }
        if self.reconnect_armed {
            self.reconnect_armed = false;
            effects.push(Effect::CancelReconnect);
        }
    }

    fn handle_unexpected(&mut self, error: ConnectionError, effects: &mut Vec<Effect>) {
        self.stop_timers(effects);
        warn!(generation = self.generation, attempt = self.attempt_count, %error, "connection lost");
        self.last_error = Some(error.into());

        if self.attempt_count < self.config.max_attempts {
            let delay = self.config.backoff.delay(self.attempt_count);
            self.attempt_count += 1;
            self.status = SessionStatus::Reconnecting;
            self.reconnect_armed = true;
            self.next_retry_in = Some(delay);
            effects.push(Effect::ScheduleReconnect {
                generation: self.generation,
                delay,
            });
        } else {
            let attempts = self.attempt_count;
            self.enter_closed(
                Some(SessionError::ReconnectExhausted { attempts }),
                "reconnect attempts exhausted",
                effects,
            );
        }
    }

    fn enter_closed(&mut self, error: Option<SessionError>, reason: &str, effects: &mut Vec<Effect>) {
        self.stop_timers(effects);
        self.begin_close(reason, effects);
        self.connect_pending = false;
        self.generation += 1;
        self.status = SessionStatus::Closed;
        self.next_retry_in = None;
        if error.is_some() {
            self.last_error = error;
        }
    }

    // ── accessors ───────────────────────────────────────────────────────────

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Reconnect attempts since the last successful authentication.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Identity of the last `start`.
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    /// Most recent error.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Whether a transport link is opening, open, or closing.
    pub fn has_link(&self) -> bool {
        self.link != Link::None
    }

    /// Whether a connect is waiting for the previous link to be released.
    pub fn connect_pending(&self) -> bool {
        self.connect_pending
    }

    /// Observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            attempt_count: self.attempt_count,
            generation: self.generation,
            last_heartbeat_sent_at: self.last_heartbeat_sent_at,
            last_heartbeat_ack_at: self.last_heartbeat_ack_at,
            last_error: self.last_error.clone(),
            next_retry_in: self.next_retry_in,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
