//! # pulse-session
//!
//! The real-time session client: one persistent duplex connection that is
//! opened, authenticated, kept alive, recovered after failure, and whose
//! inbound events are fanned out to topic subscribers.
//!
//! - [`machine`]: the pure lifecycle state machine and its effects
//! - [`session`]: the runtime that executes effects against a transport
//! - [`heartbeat`]: ping/ack liveness detection
//! - [`dispatcher`] / [`registry`]: topic routing to subscribers
//! - [`transport`]: the factory seam, a WebSocket client and an in-process
//!   loopback
//!
//! ```ignore
//! let factory = Arc::new(WsTransportFactory::new());
//! let session = Session::builder(SessionConfig::from_settings(&settings)?, factory).build();
//! let _feed = session.subscribe("*", |event: &EventPayload| -> Result<(), HandlerError> {
//!     println!("{} {:?}", event.kind, event.topic);
//!     Ok(())
//! });
//! session.start("u1")?;
//! ```

#![deny(unsafe_code)]

pub mod dispatcher;
pub mod heartbeat;
pub mod identity;
pub mod machine;
pub mod registry;
pub mod session;
pub mod timer;
pub mod transport;

pub use dispatcher::{DispatchReport, DispatchStats, EventDispatcher};
pub use heartbeat::{HeartbeatMonitor, HeartbeatResult};
pub use identity::{IdentityProvider, StaticIdentity};
pub use machine::{Effect, Input, MachineConfig, SessionMachine, SessionSnapshot};
pub use registry::{EventHandler, SubscriberRegistry, SubscriptionHandle};
pub use session::{PendingTimers, Session, SessionBuilder, SessionConfig};
pub use transport::{
    LoopbackAcceptor, LoopbackFactory, LoopbackServer, TransportCommand, TransportError,
    TransportEvent, TransportFactory, TransportLink, WsTransportFactory,
};
