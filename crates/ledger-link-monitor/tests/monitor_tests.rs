/*
[INPUT]:  Monitor driven over a recording transport
[OUTPUT]: Subscription, statistics and shutdown verification
[POS]:    Integration tests - monitor runner
[UPDATE]: When changing what the monitor subscribes or counts
*/

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ledger_link_client::{Client, Result, Transport, TransportHandler, TrustMaterial};
use ledger_link_monitor::{Monitor, MonitorConfig, MonitorStats};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Wire {
    handler: Option<TransportHandler>,
    dials: Vec<String>,
    sent: Vec<Value>,
}

#[derive(Clone, Default)]
struct RecordingTransport {
    wire: Arc<Mutex<Wire>>,
}

impl RecordingTransport {
    fn handler(&self) -> TransportHandler {
        self.wire.lock().unwrap().handler.clone().unwrap()
    }

    fn dials(&self) -> Vec<String> {
        self.wire.lock().unwrap().dials.clone()
    }

    fn subscribes(&self) -> Vec<Value> {
        self.wire
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|document| document["command"] == "subscribe")
            .cloned()
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn set_handler(&mut self, handler: TransportHandler) {
        self.wire.lock().unwrap().handler = Some(handler);
    }

    fn connect(&mut self, uri: &str) -> Result<()> {
        self.wire.lock().unwrap().dials.push(uri.to_string());
        Ok(())
    }

    fn connect_secure(&mut self, uri: &str, _trust: &TrustMaterial) -> Result<()> {
        self.connect(&format!("secure+{uri}"))
    }

    fn send(&mut self, document: &Value) -> Result<()> {
        self.wire.lock().unwrap().sent.push(document.clone());
        Ok(())
    }

    fn close(&mut self) {}
}

fn monitor_config(yaml: &str) -> MonitorConfig {
    MonitorConfig::from_yaml(yaml).unwrap()
}

async fn settle(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[tokio::test(start_paused = true)]
async fn test_first_subscribe_carries_configured_set() {
    let config = monitor_config(
        r#"
endpoint: ws://node.test:6006
accounts: [rMonitoredAccount]
books:
  - taker_gets: { currency: XRP }
    taker_pays: { currency: USD, issuer: rIssuer }
streams: [transactions]
"#,
    );
    let transport = RecordingTransport::default();
    let client = Client::new(transport.clone(), config.client_config());
    let mut monitor = Monitor::new(client, config);

    monitor.start().unwrap();
    settle(Duration::from_millis(60)).await;
    assert_eq!(transport.dials(), vec!["ws://node.test:6006".to_string()]);
    assert!(transport.subscribes().is_empty(), "nothing sent before connect");

    transport.handler().on_connected();
    settle(Duration::from_millis(1)).await;

    let subscribes = transport.subscribes();
    assert_eq!(subscribes.len(), 1);
    let document = &subscribes[0];
    assert_eq!(document["streams"], json!(["ledger", "server", "transactions"]));
    assert_eq!(document["accounts"], json!(["rMonitoredAccount"]));
    assert_eq!(document["books"][0]["taker_pays"]["issuer"], "rIssuer");
}

#[tokio::test(start_paused = true)]
async fn test_counts_ledgers_transactions_and_errors() {
    let config = monitor_config("endpoint: ws://node.test:6006\n");
    let transport = RecordingTransport::default();
    let client = Client::new(transport.clone(), config.client_config());
    let mut monitor = Monitor::new(client, config);
    monitor.start().unwrap();
    settle(Duration::from_millis(60)).await;

    let handler = transport.handler();
    handler.on_connected();
    for index in [101, 102] {
        handler.on_message(json!({ "type": "ledgerClosed", "ledger_index": index }));
    }
    handler.on_message(json!({
        "type": "transaction",
        "validated": true,
        "ledger_index": 102,
        "engine_result": "tesSUCCESS",
        "transaction": { "hash": "ABC", "Account": "rSender" },
    }));
    handler.on_message(json!({
        "type": "transaction",
        "validated": false,
        "transaction": { "hash": "DEF", "Account": "rSender" },
    }));
    handler.on_error("connection reset");
    settle(Duration::from_millis(1)).await;

    assert_eq!(
        monitor.stats(),
        MonitorStats {
            ledgers: 2,
            validated_transactions: 1,
            reconnects: 0,
            errors: 1,
        }
    );
    let status = monitor.client().status().await.unwrap();
    assert_eq!(status.server_info.ledger_index, Some(102));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_client_on_shutdown() {
    let config = monitor_config("endpoint: ws://node.test:6006\nreport_interval_secs: 5\n");
    let transport = RecordingTransport::default();
    let client = Client::new(transport.clone(), config.client_config());
    let handle = client.clone();
    let shutdown = CancellationToken::new();

    let running = tokio::spawn(Monitor::new(client, config).run(shutdown.clone()));
    settle(Duration::from_secs(12)).await;
    assert!(!handle.is_shut_down());

    shutdown.cancel();
    let stats = running.await.unwrap().unwrap();
    assert_eq!(stats, MonitorStats::default());
    assert!(handle.is_shut_down());
    assert!(handle.status().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_trust_certificate_selects_secure_dial() {
    let pem_path = std::env::temp_dir().join(format!("ledger-link-ca-{}.pem", std::process::id()));
    std::fs::write(&pem_path, "-----BEGIN CERTIFICATE-----\n").unwrap();

    let config = monitor_config(&format!(
        "endpoint: wss://node.test:51233\ntrust_certificate: {}\n",
        pem_path.display()
    ));
    let transport = RecordingTransport::default();
    let client = Client::new(transport.clone(), config.client_config());
    let mut monitor = Monitor::new(client, config);

    let started = monitor.start();
    std::fs::remove_file(&pem_path).unwrap();
    started.unwrap();

    settle(Duration::from_millis(60)).await;
    assert_eq!(transport.dials(), vec!["secure+wss://node.test:51233".to_string()]);
}
