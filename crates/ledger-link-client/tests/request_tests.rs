/*
[INPUT]:  Request, routing and subscription scenarios against a scripted node
[OUTPUT]: Verification of correlation, timeouts, deferral and event routing
[POS]:    Integration tests - request path
[UPDATE]: When changing dispatch, sweep or inbound routing
*/

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{
    ENDPOINT, MockNode, advance, config, connected_client, count, load, settle,
};
use ledger_link_client::{
    AccountId, Client, ClientError, ClientEventKind, Command, Request, Stream,
};
use serde_json::json;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

#[tokio::test(start_paused = true)]
async fn test_connect_subscribes_full_set_once() {
    let node = MockNode::default();
    let client = Client::new(node.transport(), config());
    let connected = count(&client, ClientEventKind::Connected);

    client.subscribe_accounts([AccountId::new("zAlice")]).unwrap();
    client.connect(ENDPOINT).unwrap();
    settle().await;
    assert_eq!(node.connect_count(), 0, "dial is scheduled, not immediate");

    advance(Duration::from_millis(60)).await;
    assert_eq!(node.connects(), vec![ENDPOINT.to_string()]);
    assert!(node.sent().is_empty(), "offline subscription changes are not sent");

    node.accept();
    settle().await;

    assert_eq!(load(&connected), 1);
    let subscribes = node.sent_with_command("subscribe");
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0]["streams"], json!(["ledger", "server"]));
    assert_eq!(subscribes[0]["accounts"], json!(["zAlice"]));
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_reply_updates_server_info() {
    let (client, node) = connected_client(config()).await;

    let status = client.status().await.unwrap();
    assert!(status.connected);
    assert_eq!(status.server_info.ledger_index, Some(100));
    assert_eq!(status.pending_requests, 0);

    let subscribed = Arc::new(Mutex::new(Vec::new()));
    let sink = subscribed.clone();
    client.on_subscribed(move |info| sink.lock().unwrap().push(info.fee_base));

    client.subscribe_streams([Stream::Transactions]).unwrap();
    settle().await;
    let document = node.sent_with_command("subscribe").last().cloned().unwrap();
    assert_eq!(document["streams"], json!(["ledger", "server", "transactions"]));

    node.reply_success(node.last_id("subscribe"), json!({ "fee_base": 12 }));
    settle().await;
    assert_eq!(*subscribed.lock().unwrap(), vec![Some(12)]);
    assert_eq!(
        client.subscription_set().await.unwrap()["streams"],
        json!(["ledger", "server", "transactions"])
    );
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_responses_resolve_independently() {
    let (client, node) = connected_client(config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    for label in ["first", "second"] {
        let mut request = client.new_request(Command::Ping);
        let log = seen.clone();
        request.on_response(move |_| log.lock().unwrap().push(label));
        client.send_request(request).unwrap();
    }
    settle().await;

    let pings = node.sent_with_command("ping");
    assert_eq!(pings.len(), 2);
    let first = pings[0]["id"].as_u64().unwrap();
    let second = pings[1]["id"].as_u64().unwrap();
    assert!(second > first);

    node.reply_success(second, json!({}));
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec!["second"]);
    assert_eq!(client.status().await.unwrap().pending_requests, 1);

    node.reply_success(first, json!({}));
    settle().await;
    assert_eq!(*seen.lock().unwrap(), vec!["second", "first"]);
    assert_eq!(client.status().await.unwrap().pending_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_request_future_returns_result_or_rpc_error() {
    let (client, node) = connected_client(config()).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.ledger_version().await }
    });
    settle().await;
    node.reply_success(
        node.last_id("ledger_current"),
        json!({ "ledger_current_index": 4242 }),
    );
    assert_eq!(assert_ok!(pending.await.unwrap()), 4242);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.account_info(&AccountId::new("zNobody")).await }
    });
    settle().await;
    node.reply_error(node.last_id("account_info"), "actNotFound");
    let err = assert_err!(pending.await.unwrap());
    assert!(err.is_rpc_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fires_within_sweep_bounds() {
    let cfg = config().with_dormant_threshold(Duration::from_secs(3_600));
    let (client, node) = connected_client(cfg).await;
    let timeout = client.config().request_timeout;
    let interval = client.config().maintenance_interval;

    let started = Instant::now();
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request(Request::new(Command::Ping)).await }
    });

    let err = pending.await.unwrap().unwrap_err();
    let waited = started.elapsed();
    assert!(matches!(err, ClientError::Timeout { .. }), "got {err:?}");
    assert!(waited >= timeout, "evicted early after {waited:?}");
    assert!(waited <= timeout + interval, "evicted late after {waited:?}");

    // a late reply is unsolicited and harmless
    node.reply_success(node.last_id("ping"), json!({}));
    settle().await;
    assert!(client.status().await.unwrap().connected);
}

#[tokio::test(start_paused = true)]
async fn test_request_is_retrievable_just_before_timeout() {
    let (client, node) = connected_client(config()).await;
    let timeout = client.config().request_timeout;

    let outcome = Arc::new(Mutex::new(None));
    let mut request = Request::new(Command::Ping);
    let sink = outcome.clone();
    request.on_success(move |_| *sink.lock().unwrap() = Some("success"));
    let sink = outcome.clone();
    request.on_timeout(move || *sink.lock().unwrap() = Some("timeout"));
    client.send_request(request).unwrap();
    settle().await;

    advance(timeout - Duration::from_millis(5)).await;
    assert_eq!(client.status().await.unwrap().pending_requests, 1);

    node.reply_success(node.last_id("ping"), json!({}));
    settle().await;
    assert_eq!(*outcome.lock().unwrap(), Some("success"));

    advance(timeout).await;
    assert_eq!(*outcome.lock().unwrap(), Some("success"), "no second terminal event");
}

#[tokio::test(start_paused = true)]
async fn test_requests_wait_for_connection() {
    let node = MockNode::default();
    let client = Client::new(node.transport(), config());

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.ping().await }
    });
    settle().await;
    assert_eq!(client.status().await.unwrap().deferred_requests, 1);
    assert!(node.sent().is_empty());

    client.connect(ENDPOINT).unwrap();
    advance(Duration::from_millis(60)).await;
    node.accept();
    settle().await;

    let commands: Vec<String> = node
        .sent()
        .iter()
        .map(|document| document["command"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(commands, vec!["ping", "subscribe"]);

    node.reply_success(node.last_id("ping"), json!({}));
    assert_ok!(pending.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_deferred_request_expires_without_connection() {
    let node = MockNode::default();
    let client = Client::new(node.transport(), config());

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }));
    assert_eq!(client.status().await.unwrap().deferred_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_are_routed_by_type() {
    let (client, node) = connected_client(config()).await;
    let closed = Arc::new(Mutex::new(Vec::new()));
    let validated = Arc::new(Mutex::new(Vec::new()));
    let state_changes = count(&client, ClientEventKind::StateChange);
    let tables = count(&client, ClientEventKind::TableMessage);
    let messages = count(&client, ClientEventKind::Message);

    let sink = closed.clone();
    client.on_ledger_closed(move |info| sink.lock().unwrap().push(info.ledger_index));
    let sink = validated.clone();
    client.on_validated_transaction(move |tx| sink.lock().unwrap().push(tx.hash.clone()));
    settle().await;

    node.push(json!({ "type": "ledgerClosed", "ledger_index": 101, "ledger_hash": "AB" }));
    node.push(json!({
        "type": "transaction",
        "validated": false,
        "transaction": { "hash": "PROPOSED" }
    }));
    node.push(json!({
        "type": "transaction",
        "validated": true,
        "transaction": { "hash": "FINAL", "Account": "zAlice" }
    }));
    node.push(json!({ "type": "table", "rows": [] }));
    node.push(json!({ "type": "somethingNew" }));
    node.push(json!({ "type": "serverStatus", "load_factor": 512 }));
    settle().await;

    assert_eq!(*closed.lock().unwrap(), vec![Some(101)]);
    assert_eq!(*validated.lock().unwrap(), vec![Some("FINAL".to_string())]);
    assert_eq!(load(&tables), 1);
    assert_eq!(load(&messages), 6);
    assert_eq!(load(&state_changes), 6);

    let info = client.status().await.unwrap().server_info;
    assert_eq!(info.ledger_index, Some(101));
    assert_eq!(info.load_factor, Some(512));
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_response_is_not_fatal() {
    let (client, node) = connected_client(config()).await;
    node.reply_success(9_999, json!({}));
    node.push(json!({ "type": "response", "status": "success" }));
    settle().await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.server_info().await }
    });
    settle().await;
    node.reply_success(node.last_id("server_info"), json!({ "info": { "build_version": "1.0" } }));
    let result = assert_ok!(pending.await.unwrap());
    assert_eq!(result["info"]["build_version"], "1.0");
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_does_not_stop_the_sweep() {
    let cfg = config().with_dormant_threshold(Duration::from_secs(3_600));
    let (client, node) = connected_client(cfg).await;
    client.on_message(|_| panic!("handler bug"));
    settle().await;

    node.push(json!({ "type": "ledgerClosed", "ledger_index": 7 }));
    settle().await;

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.ping().await }
    });
    settle().await;
    node.reply_success(node.last_id("ping"), json!({}));
    assert_ok!(pending.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_listener_removal_and_when_connected() {
    let (client, node) = connected_client(config()).await;
    let hits = Arc::new(Mutex::new(0));

    let sink = hits.clone();
    let id = client.on_message(move |_| *sink.lock().unwrap() += 1);
    node.push(json!({ "type": "serverStatus" }));
    settle().await;
    client.remove_listener(ClientEventKind::Message, id);
    node.push(json!({ "type": "serverStatus" }));
    settle().await;
    assert_eq!(*hits.lock().unwrap(), 1);

    let sink = hits.clone();
    client.when_connected(move || *sink.lock().unwrap() += 10);
    settle().await;
    assert_eq!(*hits.lock().unwrap(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_waiters() {
    let (client, _node) = connected_client(config()).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.ping().await }
    });
    settle().await;

    client.shutdown();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::WorkerStopped));
    assert!(matches!(client.ping().await, Err(ClientError::WorkerStopped)));
    assert!(client.is_shut_down());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_blocking_from_blocking_thread() {
    let cfg = config()
        .with_connect_delay(Duration::from_millis(1))
        .with_blocking_wait_timeout(Duration::from_secs(5));
    let node = MockNode::default();
    let client = Client::new(node.transport(), cfg);
    client.connect(ENDPOINT).unwrap();

    while node.connect_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    node.accept();

    let blocking = tokio::task::spawn_blocking({
        let client = client.clone();
        move || client.request_blocking(Request::new(Command::Ping))
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while node.sent_with_command("ping").is_empty() {
        assert!(std::time::Instant::now() < deadline, "ping never sent");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    node.reply_success(node.last_id("ping"), json!({ "pong": true }));

    let response = assert_ok!(blocking.await.unwrap());
    assert_eq!(response.result["pong"], true);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_blocking_gives_up_after_wait_bound() {
    let cfg = config().with_blocking_wait_timeout(Duration::from_millis(50));
    let node = MockNode::default();
    let client = Client::new(node.transport(), cfg);

    let outcome = tokio::task::spawn_blocking(move || {
        client.request_blocking(Request::new(Command::Ping))
    })
    .await
    .unwrap();
    assert!(matches!(outcome, Err(ClientError::WaitTimedOut { waited_ms: 50 })));
}
