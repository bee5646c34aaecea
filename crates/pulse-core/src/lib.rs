//! # pulse-core
//!
//! Foundation types for the Pulse real-time session client.
//!
//! This crate provides the shared vocabulary the session runtime and its
//! collaborators depend on:
//!
//! - **Wire frames**: [`frames::InboundFrame`] / [`frames::OutboundFrame`] and
//!   the closed set of [`frames::FrameKind`]s
//! - **Close codes**: clean / rejected / unexpected classification
//! - **Status**: [`status::SessionStatus`] lifecycle states
//! - **Errors**: the `thiserror` taxonomy rooted at [`errors::SessionError`]
//! - **Backoff**: the pure reconnect delay schedule
//! - **IDs**: branded subscription / connection IDs and the user identity

#![deny(unsafe_code)]

pub mod backoff;
pub mod close;
pub mod errors;
pub mod frames;
pub mod ids;
pub mod logging;
pub mod status;

pub use backoff::BackoffPolicy;
pub use close::CloseDisposition;
pub use errors::{
    AuthError, ConnectionError, HandlerError, ProtocolError, SendFailure, SessionError,
};
pub use frames::{EventPayload, FrameKind, InboundFrame, OutboundFrame};
pub use ids::{ConnectionId, SubscriptionId, UserIdentity};
pub use status::SessionStatus;
