//! In-process transport.
//!
//! Every `open` produces a client [`TransportLink`] and a matching
//! [`LoopbackServer`] delivered through a [`LoopbackAcceptor`]. A close
//! requested by the client completes immediately (the handshake is echoed),
//! which mirrors a cooperative server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use pulse_core::close::ABNORMAL_CLOSURE;

use super::{TransportCommand, TransportError, TransportEvent, TransportFactory, TransportLink};

/// Capacity of the server → client event channel.
const EVENT_BUFFER: usize = 1024;

/// Factory side of the loopback pair.
pub struct LoopbackFactory {
    accept_tx: mpsc::UnboundedSender<LoopbackServer>,
    refuse_next: AtomicU32,
    opened: AtomicUsize,
    open_delay: Mutex<Duration>,
}

/// Receives the server half of each opened connection.
pub struct LoopbackAcceptor {
    rx: mpsc::UnboundedReceiver<LoopbackServer>,
}

/// Server half of one loopback connection.
pub struct LoopbackServer {
    /// URL the client asked for.
    pub url: String,
    from_client: mpsc::UnboundedReceiver<TransportCommand>,
    to_client: mpsc::Sender<TransportEvent>,
}

impl LoopbackFactory {
    /// Create a factory and the acceptor for its connections.
    pub fn pair() -> (Arc<Self>, LoopbackAcceptor) {
        let (accept_tx, rx) = mpsc::unbounded_channel();
        let factory = Arc::new(Self {
            accept_tx,
            refuse_next: AtomicU32::new(0),
            opened: AtomicUsize::new(0),
            open_delay: Mutex::new(Duration::ZERO),
        });
        (factory, LoopbackAcceptor { rx })
    }

    /// Make the next `count` opens fail.
    pub fn refuse_next(&self, count: u32) {
        self.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Delay every subsequent open by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock() = delay;
    }

    /// Number of open attempts so far (including refused ones).
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn open(&self, url: &str, buffer: usize) -> Result<TransportLink, TransportError> {
        let _ = self.opened.fetch_add(1, Ordering::SeqCst);
        let delay = *self.open_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let refused = self
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (outbound, mut client_out) = mpsc::channel::<TransportCommand>(buffer.max(1));
        let (to_client, inbound) = mpsc::channel::<TransportEvent>(EVENT_BUFFER);
        let (server_tx, from_client) = mpsc::unbounded_channel();

        let echo = to_client.clone();
        let _pump = tokio::spawn(async move {
            while let Some(command) = client_out.recv().await {
                if let TransportCommand::Close { code, reason } = &command {
                    let _ = echo
                        .send(TransportEvent::Closed {
                            code: *code,
                            reason: reason.clone(),
                        })
                        .await;
                    let _ = server_tx.send(command);
                    break;
                }
                let _ = server_tx.send(command);
            }
        });

        let server = LoopbackServer {
            url: url.to_string(),
            from_client,
            to_client,
        };
        self.accept_tx
            .send(server)
            .map_err(|_| TransportError::Connect("acceptor dropped".into()))?;
        Ok(TransportLink { outbound, inbound })
    }
}

impl LoopbackAcceptor {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<LoopbackServer> {
        self.rx.recv().await
    }

    /// Take a connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<LoopbackServer> {
        self.rx.try_recv().ok()
    }
}

impl LoopbackServer {
    /// Next command written by the client.
    pub async fn recv(&mut self) -> Option<TransportCommand> {
        self.from_client.recv().await
    }

    /// Next text frame written by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        match self.recv().await? {
            TransportCommand::Text(text) => serde_json::from_str(&text).ok(),
            TransportCommand::Close { .. } => None,
        }
    }

    /// Command already written by the client, if any.
    pub fn try_recv(&mut self) -> Option<TransportCommand> {
        self.from_client.try_recv().ok()
    }

    /// Deliver a text frame to the client.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client
            .send(TransportEvent::Text(text.into()))
            .await
            .is_ok()
    }

    /// Deliver a JSON frame to the client.
    pub async fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string()).await
    }

    /// Close the connection from the server side.
    pub async fn close(self, code: u16, reason: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    /// Drop the connection without a close frame.
    pub async fn drop_connection(self) {
        self.close(ABNORMAL_CLOSURE, "").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn text_flows_both_ways() {
        let (factory, mut acceptor) = LoopbackFactory::pair();
        let mut link = factory.open("loop://a", 8).await.unwrap();
        let mut server = acceptor.accept().await.unwrap();
        assert_eq!(server.url, "loop://a");

        link.outbound
            .send(TransportCommand::Text(r#"{"type":"ping"}"#.into()))
            .await
            .unwrap();
        assert_eq!(server.recv_json().await.unwrap(), json!({"type": "ping"}));

        assert!(server.send_json(&json!({"type": "pong"})).await);
        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Text(r#"{"type":"pong"}"#.into()))
        );
    }

    #[tokio::test]
    async fn client_close_is_echoed() {
        let (factory, mut acceptor) = LoopbackFactory::pair();
        let mut link = factory.open("loop://a", 8).await.unwrap();
        let mut server = acceptor.accept().await.unwrap();

        link.outbound
            .send(TransportCommand::Close {
                code: 1000,
                reason: "bye".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Closed {
                code: 1000,
                reason: "bye".into()
            })
        );
        assert!(matches!(
            server.recv().await,
            Some(TransportCommand::Close { code: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn server_close_reaches_client() {
        let (factory, mut acceptor) = LoopbackFactory::pair();
        let mut link = factory.open("loop://a", 8).await.unwrap();
        let server = acceptor.accept().await.unwrap();
        server.close(4000, "auth failed").await;
        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Closed {
                code: 4000,
                reason: "auth failed".into()
            })
        );
    }

    #[tokio::test]
    async fn refused_opens_are_counted() {
        let (factory, mut acceptor) = LoopbackFactory::pair();
        factory.refuse_next(2);
        assert!(factory.open("loop://a", 8).await.is_err());
        assert!(factory.open("loop://a", 8).await.is_err());
        assert!(factory.open("loop://a", 8).await.is_ok());
        assert_eq!(factory.open_count(), 3);
        assert!(acceptor.try_accept().is_some());
        assert!(acceptor.try_accept().is_none());
    }
}
