//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each open spawns one pump task that owns both halves of the socket:
//! commands from the session are written, frames from the server are
//! forwarded, and exactly one [`TransportEvent::Closed`] is emitted last.
//! Text and UTF-8 binary frames are accepted; protocol-level ping/pong is
//! answered by the library and never surfaces here.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use pulse_core::close::ABNORMAL_CLOSURE;

use super::{TransportCommand, TransportError, TransportEvent, TransportFactory, TransportLink};

/// Default timeout for the TCP + upgrade handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the pump waits for the peer to finish a close we started.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Capacity of the reader → session event channel.
const EVENT_BUFFER: usize = 1024;

/// Opens WebSocket connections.
#[derive(Clone, Debug)]
pub struct WsTransportFactory {
    connect_timeout: Duration,
}

impl WsTransportFactory {
    /// Create a factory with the default connect timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for WsTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportFactory for WsTransportFactory {
    async fn open(&self, url: &str, buffer: usize) -> Result<TransportLink, TransportError> {
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let (stream, response) = time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url, status = %response.status(), "websocket connected");

        let (commands_tx, commands_rx) = mpsc::channel(buffer.max(1));
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let _pump = tokio::spawn(run_pump(stream, commands_rx, events_tx));

        Ok(TransportLink {
            outbound: commands_tx,
            inbound: events_rx,
        })
    }
}

/// Drive one socket until it is closed.
async fn run_pump<S>(
    stream: S,
    mut commands: mpsc::Receiver<TransportCommand>,
    events: mpsc::Sender<TransportEvent>,
) where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let mut received_close: Option<(u16, String)> = None;
    let mut requested_close: Option<(u16, String)> = None;
    let mut close_deadline: Option<Instant> = None;

    loop {
        let deadline = close_deadline;
        tokio::select! {
            command = commands.recv(), if close_deadline.is_none() => match command {
                Some(TransportCommand::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %e, "websocket write failed");
                        break;
                    }
                }
                Some(TransportCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    requested_close = Some((code, reason));
                    close_deadline = Some(Instant::now() + CLOSE_GRACE);
                }
                None => {
                    // Owner released the link without asking to close.
                    let _ = sink.send(Message::Close(None)).await;
                    close_deadline = Some(Instant::now() + CLOSE_GRACE);
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Text(text.as_str().to_owned())).await.is_err() {
                        debug!("event receiver dropped, stopping pump");
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if events.send(TransportEvent::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!(len = data.len(), "dropping non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    received_close = Some(frame.map_or((ABNORMAL_CLOSURE, String::new()), |f| {
                        (u16::from(f.code), f.reason.as_str().to_owned())
                    }));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read ended");
                    break;
                }
                None => break,
            },
            () = sleep_until_or_pending(deadline) => {
                debug!("peer did not finish the close handshake");
                break;
            }
        }
    }

    let (code, reason) = received_close
        .or(requested_close)
        .unwrap_or((ABNORMAL_CLOSURE, String::new()));
    let _ = events.send(TransportEvent::Closed { code, reason }).await;
}

async fn sleep_until_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
