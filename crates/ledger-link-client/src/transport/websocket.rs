/*
[INPUT]:  ws:// or wss:// endpoint, optional private CA, outbound JSON documents
[OUTPUT]: Transport signals and parsed inbound JSON frames via TransportHandler
[POS]:    Transport layer - tokio-tungstenite connection task
[UPDATE]: When changing socket handling, frame parsing or TLS options
*/

use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{Connector, connect_async_tls_with_config};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{Transport, TransportHandler, TrustMaterial};
use crate::error::{ClientError, Result};

const MESSAGE_SAMPLE_LIMIT: usize = 3;
const SEND_SAMPLE_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static MESSAGE_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static SEND_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

struct Connection {
    outbound: mpsc::UnboundedSender<WsMessage>,
    cancel: CancellationToken,
}

/// WebSocket transport carrying one JSON document per frame.
///
/// Each `connect` replaces the previous connection; the replaced socket task
/// is cancelled and reports nothing further.
#[derive(Default)]
pub struct WebSocketTransport {
    handler: Option<TransportHandler>,
    connection: Option<Connection>,
    attempts: u32,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        // a second install attempt fails harmlessly
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|connection| !connection.outbound.is_closed())
    }

    fn open(&mut self, uri: &str, connector: Option<Connector>) -> Result<()> {
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| ClientError::InvalidRequest("transport has no handler".into()))?;

        let url = Url::parse(uri)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::Transport(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        self.close();
        self.attempts = self.attempts.saturating_add(1);
        handler.on_connecting(self.attempts);
        info!(endpoint = %url, attempt = self.attempts, "ws connecting");

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_connection(
            url.to_string(),
            connector,
            handler,
            outbound_rx,
            cancel.clone(),
        ));
        self.connection = Some(Connection { outbound, cancel });
        Ok(())
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("open", &self.is_open())
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl Transport for WebSocketTransport {
    fn set_handler(&mut self, handler: TransportHandler) {
        self.handler = Some(handler);
    }

    fn connect(&mut self, uri: &str) -> Result<()> {
        self.open(uri, None)
    }

    fn connect_secure(&mut self, uri: &str, trust: &TrustMaterial) -> Result<()> {
        let config = trust.client_config()?;
        self.open(uri, Some(Connector::Rustls(config)))
    }

    fn send(&mut self, document: &Value) -> Result<()> {
        let connection = self.connection.as_ref().ok_or(ClientError::NotConnected)?;
        let text = document.to_string();
        log_send_sample_once(&text);
        connection
            .outbound
            .send(WsMessage::Text(text.into()))
            .map_err(|_| ClientError::Transport("WebSocket send channel closed".into()))
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.cancel.cancel();
            debug!("ws connection closed locally");
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    uri: String,
    connector: Option<Connector>,
    handler: TransportHandler,
    mut outbound_rx: mpsc::UnboundedReceiver<WsMessage>,
    cancel: CancellationToken,
) {
    let connecting = connect_async_tls_with_config(uri.as_str(), None, false, connector);
    let ws_stream = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connecting => match result {
            Ok((stream, _response)) => stream,
            Err(err) => {
                if !cancel.is_cancelled() {
                    warn!(endpoint = %uri, error = %err, "ws connect failed");
                    handler.on_error(err.to_string());
                    handler.on_disconnected(true);
                }
                return;
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    info!(endpoint = %uri, "ws connected");
    handler.on_connected();

    let (mut write, mut read) = ws_stream.split();
    let failure = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return;
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if let Err(err) = write.send(message).await {
                            break Some(err.to_string());
                        }
                    }
                    None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return;
                    }
                }
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break None;
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(message)) => {
                        if let Some(document) = parse_message(message) {
                            handler.on_message(document);
                        }
                    }
                    Some(Err(err)) => break Some(err.to_string()),
                    None => break None,
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    if let Some(cause) = failure {
        warn!(endpoint = %uri, error = %cause, "ws connection failed");
        handler.on_error(cause);
    }
    info!(endpoint = %uri, "ws disconnected by remote");
    handler.on_disconnected(true);
}

fn parse_message(message: WsMessage) -> Option<Value> {
    let parsed = match &message {
        WsMessage::Text(text) => serde_json::from_str::<Value>(text.as_str()),
        WsMessage::Binary(bytes) => serde_json::from_slice::<Value>(bytes),
        _ => return None,
    };

    match parsed {
        Ok(document) => {
            log_message_sample_once(&document);
            Some(document)
        }
        Err(err) => {
            let raw = match &message {
                WsMessage::Text(text) => text.as_str().to_string(),
                WsMessage::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                _ => String::new(),
            };
            log_parse_fail_once(&err, &raw);
            None
        }
    }
}

fn log_message_sample_once(document: &Value) {
    let count = MESSAGE_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= MESSAGE_SAMPLE_LIMIT {
        return;
    }
    let message_type = document
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("none");
    debug!(
        sample_index = count + 1,
        sample_limit = MESSAGE_SAMPLE_LIMIT,
        message_type,
        message = %truncate_for_log(&document.to_string(), RAW_LOG_MAX_BYTES),
        "ws message sample"
    );
}

fn log_send_sample_once(raw: &str) {
    let count = SEND_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < SEND_SAMPLE_LIMIT {
        debug!(
            sample_index = count + 1,
            sample_limit = SEND_SAMPLE_LIMIT,
            bytes = raw.len(),
            message = %truncate_for_log(raw, RAW_LOG_MAX_BYTES),
            "ws send sample"
        );
    }
}

fn log_parse_fail_once(err: &serde_json::Error, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        warn!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        debug!(
            sample_index = count + 1,
            message = %truncate_for_log(raw, RAW_LOG_MAX_BYTES),
            "ws message parse failed"
        );
    }
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
