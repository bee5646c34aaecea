//! Connection session runtime.
//!
//! [`Session`] wraps a [`SessionMachine`] behind one mutex. Caller requests,
//! transport events and timer fires are all serialized through it: the lock
//! is taken, the machine produces effects, and the effects run before the
//! lock is released. Dispatch to subscribers is the exception: frames are
//! collected under the lock and delivered after it is released, in the order
//! the transport produced them, so handlers may call back into the session.
//!
//! Background tasks (the open task, the per-link reader, timers, the
//! heartbeat) hold only a `Weak` reference, so dropping the session tears
//! everything down.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulse_core::close::ABNORMAL_CLOSURE;
use pulse_core::{
    BackoffPolicy, ConnectionId, InboundFrame, OutboundFrame, SendFailure, SessionError,
    SessionStatus, UserIdentity,
};
use pulse_settings::PulseSettings;

use crate::dispatcher::{DispatchStats, EventDispatcher};
use crate::heartbeat::HeartbeatMonitor;
use crate::identity::IdentityProvider;
use crate::machine::{Effect, Input, MachineConfig, SessionMachine, SessionSnapshot};
use crate::registry::{EventHandler, SubscriberRegistry, SubscriptionHandle};
use crate::timer::TimerSlot;
use crate::transport::{TransportCommand, TransportEvent, TransportFactory, TransportLink};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime parameters for one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// WebSocket URL to connect to.
    pub url: String,
    /// Reconnect delay schedule.
    pub backoff: BackoffPolicy,
    /// Reconnect attempts before giving up.
    pub max_attempts: u32,
    /// Handshake window.
    pub auth_timeout: Duration,
    /// How long a requested close may take before it is forced.
    pub close_timeout: Duration,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Consecutive unacknowledged pings before the link is stale.
    pub max_missed: u32,
    /// Outbound frames buffered towards the transport writer.
    pub outbound_buffer: usize,
}

impl SessionConfig {
    /// Production defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = PulseSettings::default();
        Self {
            url: url.into(),
            backoff: defaults.backoff,
            max_attempts: defaults.session.max_attempts,
            auth_timeout: defaults.session.auth_timeout(),
            close_timeout: defaults.session.close_timeout(),
            heartbeat_interval: defaults.heartbeat.interval(),
            max_missed: defaults.heartbeat.max_missed,
            outbound_buffer: defaults.session.outbound_buffer,
        }
    }

    /// Build from loaded settings. The URL is derived from the configured
    /// origin and path.
    pub fn from_settings(settings: &PulseSettings) -> pulse_settings::Result<Self> {
        settings.validate()?;
        Ok(Self {
            url: settings.endpoint.ws_url()?,
            backoff: settings.backoff,
            max_attempts: settings.session.max_attempts,
            auth_timeout: settings.session.auth_timeout(),
            close_timeout: settings.session.close_timeout(),
            heartbeat_interval: settings.heartbeat.interval(),
            max_missed: settings.heartbeat.max_missed,
            outbound_buffer: settings.session.outbound_buffer,
        })
    }

    fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            backoff: self.backoff,
            max_attempts: self.max_attempts,
            auth_timeout: self.auth_timeout,
            max_missed: self.max_missed,
        }
    }
}

/// Which background timers are armed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingTimers {
    /// Heartbeat loop running.
    pub heartbeat: bool,
    /// Backoff timer armed.
    pub reconnect: bool,
    /// Handshake timeout armed.
    pub auth_timeout: bool,
    /// Close watchdog armed.
    pub close_watchdog: bool,
    /// Heartbeat, backoff and handshake timers cancelled so far.
    pub cancellations: u64,
}

impl PendingTimers {
    /// Whether any timer is armed.
    pub fn any(&self) -> bool {
        self.heartbeat || self.reconnect || self.auth_timeout || self.close_watchdog
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles a [`Session`] from its collaborators.
pub struct SessionBuilder {
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    registry: Option<Arc<SubscriberRegistry>>,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl SessionBuilder {
    /// Start from a config and a transport factory.
    pub fn new(config: SessionConfig, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            config,
            factory,
            registry: None,
            identity: None,
        }
    }

    /// Share an existing registry (one is created otherwise).
    #[must_use]
    pub fn registry(mut self, registry: Arc<SubscriberRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Provider consulted by [`Session::resume`].
    #[must_use]
    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    /// Build an idle session.
    pub fn build(self) -> Session {
        let registry = self.registry.unwrap_or_default();
        let machine = SessionMachine::new(self.config.machine_config());
        let (status_tx, _) = watch::channel(machine.snapshot());
        let heartbeat = HeartbeatMonitor::new(self.config.heartbeat_interval, self.config.max_missed);
        Session {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    machine,
                    link: None,
                    heartbeat,
                    heartbeat_cancellations: 0,
                    reconnect_timer: TimerSlot::new(),
                    auth_timer: TimerSlot::new(),
                    close_watchdog: TimerSlot::new(),
                }),
                config: self.config,
                factory: self.factory,
                identity: self.identity,
                dispatcher: EventDispatcher::new(registry),
                status_tx,
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// One logical real-time connection.
///
/// `start` and `send` never wait on I/O; progress is observable through
/// [`Session::watch_status`]. Dropping the session stops it.
pub struct Session {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    config: SessionConfig,
    factory: Arc<dyn TransportFactory>,
    identity: Option<Arc<dyn IdentityProvider>>,
    dispatcher: EventDispatcher,
    status_tx: watch::Sender<SessionSnapshot>,
}

struct State {
    machine: SessionMachine,
    link: Option<AttachedLink>,
    heartbeat: HeartbeatMonitor,
    heartbeat_cancellations: u64,
    reconnect_timer: TimerSlot,
    auth_timer: TimerSlot,
    close_watchdog: TimerSlot,
}

/// Frames collected under the lock, tagged with the generation that produced
/// them.
#[derive(Default)]
struct Delivery {
    generation: u64,
    frames: Vec<InboundFrame>,
}

struct AttachedLink {
    generation: u64,
    connection_id: ConnectionId,
    outbound: mpsc::Sender<TransportCommand>,
    reader: JoinHandle<()>,
}

impl Session {
    /// Shorthand for [`SessionBuilder::new`].
    pub fn builder(config: SessionConfig, factory: Arc<dyn TransportFactory>) -> SessionBuilder {
        SessionBuilder::new(config, factory)
    }

    /// Connect and authenticate as `user_id`.
    ///
    /// Returns once the connect is under way. Fails with
    /// [`SessionError::InvalidIdentity`] for an empty id and
    /// [`SessionError::InvalidState`] while connecting, authenticating or
    /// active. Starting from `Reconnecting` abandons the pending backoff.
    pub fn start(&self, user_id: impl Into<String>) -> Result<(), SessionError> {
        let identity = UserIdentity::new(user_id)?;
        let frames = self.shared.apply(Input::Start(identity))?;
        self.shared.deliver(frames);
        Ok(())
    }

    /// [`start`](Self::start) with the identity provider's current user.
    pub fn resume(&self) -> Result<(), SessionError> {
        let user_id = self
            .shared
            .identity
            .as_ref()
            .and_then(|provider| provider.current_user_id())
            .ok_or(SessionError::InvalidIdentity)?;
        self.start(user_id)
    }

    /// Stop the session. Idempotent; always ends in `Closed`.
    ///
    /// Frames from the stopped link that were read but not yet delivered are
    /// discarded; once `stop` returns, no handler sees another frame from it.
    pub fn stop(&self) {
        match self.shared.apply(Input::Stop) {
            Ok(frames) => self.shared.deliver(frames),
            Err(error) => warn!(%error, "stop failed"),
        }
    }

    /// Write a frame. Only succeeds while `Active`; nothing is queued or
    /// retried on failure.
    pub fn send(&self, frame: &OutboundFrame) -> Result<(), SendFailure> {
        let state = self.shared.state.lock();
        let status = state.machine.status();
        if status != SessionStatus::Active {
            return Err(SendFailure::NotActive { status });
        }
        let link = state.link.as_ref().ok_or(SendFailure::TransportClosed)?;
        link.outbound
            .try_send(TransportCommand::Text(frame.encode()))
            .map_err(|error| match error {
                TrySendError::Full(_) => SendFailure::Backpressure,
                TrySendError::Closed(_) => SendFailure::TransportClosed,
            })
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.shared.state.lock().machine.status()
    }

    /// Current observable state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().machine.snapshot()
    }

    /// Receiver that sees every published snapshot.
    pub fn watch_status(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.status_tx.subscribe()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, mut predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.watch_status();
        match rx.wait_for(|snapshot| predicate(snapshot)).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Wait until the session reaches `status`.
    pub async fn wait_for_status(&self, status: SessionStatus) -> SessionSnapshot {
        self.wait_for(|snapshot| snapshot.status == status).await
    }

    /// The subscriber registry events are routed through.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        self.shared.dispatcher.registry()
    }

    /// Register `handler` for `topic`.
    pub fn subscribe<H>(&self, topic: impl Into<String>, handler: H) -> SubscriptionHandle
    where
        H: EventHandler + 'static,
    {
        self.registry().subscribe(topic, handler)
    }

    /// Remove a subscription. Safe after the session has closed.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.registry().unsubscribe(handle)
    }

    /// Which timers are armed right now.
    pub fn pending_timers(&self) -> PendingTimers {
        let state = self.shared.state.lock();
        PendingTimers {
            heartbeat: state.heartbeat.is_running(),
            reconnect: state.reconnect_timer.is_armed(),
            auth_timeout: state.auth_timer.is_armed(),
            close_watchdog: state.close_watchdog.is_armed(),
            cancellations: state.heartbeat_cancellations
                + state.reconnect_timer.cancellations()
                + state.auth_timer.cancellations(),
        }
    }

    /// Dispatcher counters.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.shared.dispatcher.stats()
    }

    /// Configuration this session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Closing needs a runtime for the close watchdog.
        if tokio::runtime::Handle::try_current().is_ok() {
            self.stop();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Effect execution
// ─────────────────────────────────────────────────────────────────────────────

impl Shared {
    fn apply(self: &Arc<Self>, input: Input) -> Result<Delivery, SessionError> {
        let mut state = self.state.lock();
        self.apply_locked(&mut state, input)
    }

    fn apply_locked(
        self: &Arc<Self>,
        state: &mut State,
        input: Input,
    ) -> Result<Delivery, SessionError> {
        let before = state.machine.status();
        let effects = state.machine.handle(input, Utc::now())?;

        let mut frames = Vec::new();
        for effect in effects {
            self.execute(state, effect, &mut frames);
        }

        let after = state.machine.status();
        if before != after {
            info!(
                from = %before,
                to = %after,
                generation = state.machine.generation(),
                attempt = state.machine.attempt_count(),
                "session status changed"
            );
        }
        let _ = self.status_tx.send_replace(state.machine.snapshot());
        Ok(Delivery {
            generation: state.machine.generation(),
            frames,
        })
    }

    /// Feed a background input (timer, reader, open task) and deliver any
    /// resulting frames after the lock is released.
    fn inject(self: &Arc<Self>, input: Input) {
        let frames = {
            let mut state = self.state.lock();
            match &input {
                Input::ReconnectDue { generation } => state.reconnect_timer.fired(*generation),
                Input::AuthTimeout { generation } => state.auth_timer.fired(*generation),
                _ => {}
            }
            match self.apply_locked(&mut state, input) {
                Ok(frames) => frames,
                Err(error) => {
                    warn!(%error, "background input rejected");
                    Delivery::default()
                }
            }
        };
        self.deliver(frames);
    }

    /// Dispatch collected frames unless the session moved on (a `stop` or a
    /// new connect) since they were collected.
    fn deliver(&self, delivery: Delivery) {
        let Delivery { generation, frames } = delivery;
        for frame in frames {
            let current = self.state.lock().machine.generation();
            if current != generation {
                debug!(generation, current, kind = %frame.kind, "dropping frame from a superseded link");
                continue;
            }
            let _ = self.dispatcher.dispatch(frame);
        }
    }

    fn execute(self: &Arc<Self>, state: &mut State, effect: Effect, frames: &mut Vec<InboundFrame>) {
        match effect {
            Effect::OpenTransport { generation } => self.spawn_open(generation),
            Effect::Send(frame) => match &state.link {
                Some(link) => {
                    if let Err(error) = link.outbound.try_send(TransportCommand::Text(frame.encode())) {
                        warn!(kind = frame.kind(), connection = %link.connection_id, %error, "control frame not written");
                    }
                }
                None => debug!(kind = frame.kind(), "no link for control frame"),
            },
            Effect::CloseTransport { code, reason } => {
                let Some(link) = &state.link else {
                    return;
                };
                let generation = link.generation;
                debug!(generation, code, %reason, connection = %link.connection_id, "closing transport");
                if link
                    .outbound
                    .try_send(TransportCommand::Close { code, reason })
                    .is_err()
                {
                    debug!(generation, "close request not queued, waiting for watchdog");
                }
                let weak = Arc::downgrade(self);
                state
                    .close_watchdog
                    .arm(generation, self.config.close_timeout, move || {
                        fire(&weak, Input::TransportClosed {
                            generation,
                            code: ABNORMAL_CLOSURE,
                            reason: "close not confirmed".into(),
                        });
                    });
            }
            Effect::ReleaseTransport => {
                if let Some(link) = state.link.take() {
                    debug!(generation = link.generation, connection = %link.connection_id, "transport released");
                    link.reader.abort();
                }
                let _ = state.close_watchdog.cancel();
            }
            Effect::ArmAuthTimeout { generation, after } => {
                let weak = Arc::downgrade(self);
                state.auth_timer.arm(generation, after, move || {
                    fire(&weak, Input::AuthTimeout { generation });
                });
            }
            Effect::CancelAuthTimeout => {
                let _ = state.auth_timer.cancel();
            }
            Effect::ScheduleReconnect { generation, delay } => {
                info!(
                    generation,
                    attempt = state.machine.attempt_count(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnect scheduled"
                );
                let weak = Arc::downgrade(self);
                state.reconnect_timer.arm(generation, delay, move || {
                    fire(&weak, Input::ReconnectDue { generation });
                });
            }
            Effect::CancelReconnect => {
                let _ = state.reconnect_timer.cancel();
            }
            Effect::StartHeartbeat { generation } => {
                let ping = Arc::downgrade(self);
                let stale = Arc::downgrade(self);
                state.heartbeat.start(
                    move || fire(&ping, Input::HeartbeatTick { generation }),
                    move || fire(&stale, Input::HeartbeatStale { generation }),
                );
            }
            Effect::StopHeartbeat => {
                if state.heartbeat.stop() {
                    state.heartbeat_cancellations += 1;
                }
            }
            Effect::HeartbeatAck => state.heartbeat.record_ack(),
            Effect::Dispatch(frame) => frames.push(frame),
        }
    }

    fn spawn_open(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let factory = Arc::clone(&self.factory);
        let url = self.config.url.clone();
        let buffer = self.config.outbound_buffer;
        let connection_id = ConnectionId::new();
        info!(generation, connection = %connection_id, %url, "opening transport");

        let _task = tokio::spawn(async move {
            let result = factory.open(&url, buffer).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(link) => shared.attach(generation, connection_id, link),
                Err(error) => {
                    warn!(generation, connection = %connection_id, %error, "transport failed to open");
                    shared.inject(Input::TransportFailed {
                        generation,
                        error: error.to_string(),
                    });
                }
            }
        });
    }

    fn attach(self: &Arc<Self>, generation: u64, connection_id: ConnectionId, link: TransportLink) {
        let TransportLink { outbound, inbound } = link;
        let frames = {
            let mut state = self.state.lock();
            let reader = self.spawn_reader(generation, inbound);
            let attached = AttachedLink {
                generation,
                connection_id,
                outbound,
                reader,
            };
            if let Some(previous) = state.link.replace(attached) {
                warn!(previous = previous.generation, generation, "replacing an attached link");
                previous.reader.abort();
            }
            match self.apply_locked(&mut state, Input::TransportOpened { generation }) {
                Ok(frames) => frames,
                Err(error) => {
                    warn!(%error, "open completion rejected");
                    Delivery::default()
                }
            }
        };
        self.deliver(frames);
    }

    fn spawn_reader(
        self: &Arc<Self>,
        generation: u64,
        mut inbound: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = inbound.recv().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                match event {
                    Some(TransportEvent::Text(text)) => {
                        if let Some(frame) = shared.dispatcher.decode(&text) {
                            shared.inject(Input::Frame { generation, frame });
                        }
                    }
                    Some(TransportEvent::Closed { code, reason }) => {
                        info!(generation, code, %reason, "transport closed");
                        shared.inject(Input::TransportClosed {
                            generation,
                            code,
                            reason,
                        });
                        break;
                    }
                    None => {
                        shared.inject(Input::TransportClosed {
                            generation,
                            code: ABNORMAL_CLOSURE,
                            reason: "transport ended".into(),
                        });
                        break;
                    }
                }
            }
        })
    }
}

fn fire(weak: &Weak<Shared>, input: Input) {
    if let Some(shared) = weak.upgrade() {
        shared.inject(input);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
