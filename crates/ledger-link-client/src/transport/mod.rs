/*
[INPUT]:  Endpoint URIs, trust material, outbound JSON documents
[OUTPUT]: Lifecycle signals and inbound JSON documents handed to the worker
[POS]:    Transport layer - boundary between the engine and the socket
[UPDATE]: When the engine needs a new transport signal
*/

pub mod tls;
pub mod websocket;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

pub use tls::TrustMaterial;
pub use websocket::WebSocketTransport;

/// Signals a transport reports about its current connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connecting { attempt: u32 },
    Connected,
    Message(Value),
    /// `remote` is true when the peer or the network ended the connection
    Disconnected { remote: bool },
    Error(String),
}

/// Cloneable sink a transport reports into.
///
/// Reporting never blocks; events are queued for the worker and dropped
/// once the worker is gone.
#[derive(Debug, Clone)]
pub struct TransportHandler {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportHandler {
    /// A handler plus the receiving end of its queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn on_connecting(&self, attempt: u32) {
        self.report(TransportEvent::Connecting { attempt });
    }

    pub fn on_connected(&self) {
        self.report(TransportEvent::Connected);
    }

    pub fn on_message(&self, message: Value) {
        self.report(TransportEvent::Message(message));
    }

    pub fn on_disconnected(&self, remote: bool) {
        self.report(TransportEvent::Disconnected { remote });
    }

    pub fn on_error(&self, cause: impl Into<String>) {
        self.report(TransportEvent::Error(cause.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn report(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }
}

/// Message-oriented connection used by the client worker.
///
/// Methods are called from the worker and must not block it; implementations
/// spawn their own I/O tasks. `close` is silent: the worker applies the
/// disconnected transition itself, and a closed connection must not report
/// further events.
pub trait Transport: Send + 'static {
    /// Install the sink for lifecycle signals and inbound documents
    fn set_handler(&mut self, handler: TransportHandler);

    /// Open a connection, replacing any existing one
    fn connect(&mut self, uri: &str) -> Result<()>;

    /// Open a TLS connection trusting the given certificate authorities
    fn connect_secure(&mut self, uri: &str, trust: &TrustMaterial) -> Result<()>;

    /// Queue one outbound document
    fn send(&mut self, document: &Value) -> Result<()>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_handler_queues_events_in_order() {
        let (handler, mut rx) = TransportHandler::channel();
        handler.on_connecting(1);
        handler.on_connected();
        handler.on_message(json!({ "type": "ledgerClosed" }));
        handler.on_disconnected(true);

        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connecting { attempt: 1 });
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connected);
        assert!(matches!(rx.try_recv().unwrap(), TransportEvent::Message(_)));
        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Disconnected { remote: true }
        );
    }

    #[test]
    fn test_handler_outlives_receiver() {
        let (handler, rx) = TransportHandler::channel();
        drop(rx);
        assert!(handler.is_closed());
        handler.on_error("ignored");
    }
}
