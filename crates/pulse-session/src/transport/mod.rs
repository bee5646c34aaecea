//! Transport seam.
//!
//! A [`TransportFactory`] opens one duplex connection and hands back a
//! [`TransportLink`]: a command sender (text frames, close requests) and an
//! event receiver (text frames, the final close). The session owns the link
//! exclusively; nothing else writes to it.
//!
//! - [`websocket::WsTransportFactory`]: `tokio-tungstenite` client
//! - [`loopback::LoopbackFactory`]: in-process pair for tests and embedding

pub mod loopback;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use loopback::{LoopbackAcceptor, LoopbackFactory, LoopbackServer};
pub use websocket::WsTransportFactory;

/// Command from the session to the transport writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCommand {
    /// Write a text frame.
    Text(String),
    /// Start the closing handshake.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Event from the transport reader to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Text(String),
    /// The connection is fully closed. Always the last event.
    Closed {
        /// Close code (1006 when none was received).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// An open connection, as seen by its owner.
#[derive(Debug)]
pub struct TransportLink {
    /// Writer side.
    pub outbound: mpsc::Sender<TransportCommand>,
    /// Reader side.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Failure to open a connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The URL could not be used.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Connecting failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Connecting took too long.
    #[error("connect timed out")]
    Timeout,
}

/// Opens duplex connections.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a connection to `url`. `buffer` sizes the command channel.
    async fn open(&self, url: &str, buffer: usize) -> Result<TransportLink, TransportError>;
}
