/*
[INPUT]:  Test scenarios driving a fake ledger node
[OUTPUT]: Scripted in-memory transport plus client fixtures
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for ledger-link-client tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ledger_link_client::{
    Client, ClientConfig, ClientEventKind, Result, Transport, TransportHandler, TrustMaterial,
};
use serde_json::{Value, json};

pub const ENDPOINT: &str = "ws://node.test:6006";

#[derive(Default)]
struct NodeState {
    handler: Option<TransportHandler>,
    connects: Vec<String>,
    sent: Vec<Value>,
    closes: usize,
}

/// Test-side view of the fake node: inspect traffic, inject signals
#[derive(Clone, Default)]
pub struct MockNode {
    state: Arc<Mutex<NodeState>>,
}

impl MockNode {
    pub fn transport(&self) -> MockTransport {
        MockTransport { node: self.clone() }
    }

    fn handler(&self) -> TransportHandler {
        self.state
            .lock()
            .unwrap()
            .handler
            .clone()
            .expect("client installed a transport handler")
    }

    /// Complete the pending dial
    pub fn accept(&self) {
        self.handler().on_connected();
    }

    pub fn push(&self, message: Value) {
        self.handler().on_message(message);
    }

    pub fn drop_connection(&self) {
        self.handler().on_disconnected(true);
    }

    pub fn fail(&self, cause: &str) {
        self.handler().on_error(cause);
    }

    pub fn reply_success(&self, id: u64, result: Value) {
        self.push(json!({
            "id": id,
            "type": "response",
            "status": "success",
            "result": result,
        }));
    }

    pub fn reply_error(&self, id: u64, error: &str) {
        self.push(json!({
            "id": id,
            "type": "response",
            "status": "error",
            "error": error,
        }));
    }

    pub fn connects(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects.len()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_with_command(&self, command: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|document| document["command"] == command)
            .collect()
    }

    pub fn last_id(&self, command: &str) -> u64 {
        self.sent_with_command(command)
            .last()
            .and_then(|document| document["id"].as_u64())
            .expect("a request with this command was sent")
    }
}

pub struct MockTransport {
    node: MockNode,
}

impl Transport for MockTransport {
    fn set_handler(&mut self, handler: TransportHandler) {
        self.node.state.lock().unwrap().handler = Some(handler);
    }

    fn connect(&mut self, uri: &str) -> Result<()> {
        let mut state = self.node.state.lock().unwrap();
        state.connects.push(uri.to_string());
        if let Some(handler) = &state.handler {
            handler.on_connecting(state.connects.len() as u32);
        }
        Ok(())
    }

    fn connect_secure(&mut self, uri: &str, _trust: &TrustMaterial) -> Result<()> {
        self.connect(&format!("secure+{uri}"))
    }

    fn send(&mut self, document: &Value) -> Result<()> {
        self.node.state.lock().unwrap().sent.push(document.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.node.state.lock().unwrap().closes += 1;
    }
}

/// Engine config with the stock timers
pub fn config() -> ClientConfig {
    ClientConfig::default()
}

/// Let the worker drain its queues; advances paused time by 1ms
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Client connected to a fresh node with its initial subscription acknowledged
pub async fn connected_client(config: ClientConfig) -> (Client, MockNode) {
    let node = MockNode::default();
    let client = Client::new(node.transport(), config.clone());
    client.connect(ENDPOINT).unwrap();
    advance(config.connect_delay + Duration::from_millis(1)).await;
    node.accept();
    settle().await;

    if !node.sent_with_command("subscribe").is_empty() {
        let id = node.last_id("subscribe");
        node.reply_success(id, json!({ "ledger_index": 100, "fee_base": 10 }));
        settle().await;
    }
    (client, node)
}

/// Counts emissions of one event kind
pub fn count(client: &Client, kind: ClientEventKind) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let sink = counter.clone();
    client.on(kind, move |_| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

pub fn load(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}
