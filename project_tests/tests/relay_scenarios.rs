//! End-to-end scenarios for the relay pipeline: scripted upstream, in-memory
//! analytics, real router, and (where noted) a real WebSocket client.

use futures_util::StreamExt;
use project_tests::{frame, RelayHarness, TEST_DATABASE};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite};

use lib_common::sinks::DatabaseAdmin;
use lib_common::ingestors::FeedState;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_credit_event_is_stored_and_fanned_out() {
    let relay = RelayHarness::start();
    let mut first = relay.router.subscribe("client-1");
    let mut second = relay.router.subscribe("client-2");

    let upstream = relay.upstream.new_session();
    upstream
        .send(frame(json!({"_EVENT": "credit", "_BLOCKTIME": 1_700_000_000, "asset": "XYZ", "amount": 5})))
        .unwrap();

    for sub in [&mut first, &mut second] {
        let record = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(record.event_type, "credit");
        assert_eq!(record.block_time_iso, "2023-11-14T22:13:20.000000Z");
        assert!(sub.try_recv().is_none());
    }

    let writes = relay.store.writes();
    assert_eq!(writes.len(), 1);
    let (event_type, data) = &writes[0];
    assert_eq!(event_type, "credit");
    assert_eq!(data["time"], "2023-11-14T22:13:20.000000Z");
    assert_eq!(data["msg"], json!({"asset": "XYZ", "amount": 5}));

    relay.stop().await;
}

#[tokio::test]
async fn test_balance_event_is_delivered_but_not_stored() {
    let relay = RelayHarness::start();
    let mut client = relay.router.subscribe("client");

    let upstream = relay.upstream.new_session();
    upstream.send(frame(json!({"_EVENT": "balance", "address": "abc", "value": 10}))).unwrap();

    let record = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(record.event_type, "balance");
    assert_eq!(record.block_time, None);
    assert_eq!(record.block_time_iso, "");
    assert!(relay.store.writes().is_empty());
    assert_eq!(relay.stats.snapshot().analytics_skipped, 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_reset_signal_drops_database_before_delivery() {
    let relay = RelayHarness::start();
    let mut client = relay.router.subscribe("client");

    let upstream = relay.upstream.new_session();
    upstream.send(frame(json!({"_EVENT": "credit", "_BLOCKTIME": 1_700_000_000}))).unwrap();
    upstream.send(frame(json!({"_EVENT": "new_db_init"}))).unwrap();

    let credit = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(credit.event_type, "credit");

    let reset = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert!(reset.is_reset_signal());
    // Delivery happens after the purge, so the database is already gone.
    assert!(!relay.store.database_exists(TEST_DATABASE).await.unwrap());
    assert!(relay.store.writes().is_empty());
    assert_eq!(relay.store.drop_count(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let relay = RelayHarness::start();
    let mut client = relay.router.subscribe("client");

    let upstream = relay.upstream.new_session();
    upstream.send(b"not json".to_vec()).unwrap();
    upstream.send(frame(json!(["an", "array"]))).unwrap();
    upstream.send(frame(json!({"asset": "no event key"}))).unwrap();
    upstream.send(frame(json!({"_EVENT": "debit", "_BLOCKTIME": 1}))).unwrap();

    let record = timeout(WAIT, client.recv()).await.unwrap().unwrap();
    assert_eq!(record.event_type, "debit");
    assert_eq!(relay.stats.snapshot().malformed, 3);

    relay.stop().await;
}

#[tokio::test]
async fn test_upstream_disconnect_reconnects_and_slow_client_keeps_order() {
    let relay = RelayHarness::start();
    let mut slow = relay.router.subscribe("slow");
    let mut fast = relay.router.subscribe("fast");

    let first_session = relay.upstream.new_session();
    for n in 1..=3 {
        first_session
            .send(frame(json!({"_EVENT": "credit", "_BLOCKTIME": n, "seq": n})))
            .unwrap();
    }
    for _ in 1..=3 {
        timeout(WAIT, fast.recv()).await.unwrap().unwrap();
    }

    // Remote goes away; the next attempts are refused until a new session exists.
    drop(first_session);
    tokio::time::sleep(Duration::from_millis(60)).await;

    let second_session = relay.upstream.new_session();
    second_session
        .send(frame(json!({"_EVENT": "credit", "_BLOCKTIME": 4, "seq": 4})))
        .unwrap();

    let after = timeout(WAIT, fast.recv()).await.unwrap().unwrap();
    assert_eq!(after.payload["seq"], 4);
    assert_eq!(relay.upstream.connects(), 2);

    let mut seen = Vec::new();
    for _ in 1..=4 {
        let record = timeout(WAIT, slow.recv()).await.unwrap().unwrap();
        seen.push(record.payload["seq"].as_i64().unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert!(relay.stats.snapshot().reconnects >= 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_late_subscriber_gets_no_replay() {
    let relay = RelayHarness::start();
    let mut early = relay.router.subscribe("early");

    let upstream = relay.upstream.new_session();
    upstream.send(frame(json!({"_EVENT": "balance", "seq": 1}))).unwrap();
    timeout(WAIT, early.recv()).await.unwrap().unwrap();

    let mut late = relay.router.subscribe("late");
    upstream.send(frame(json!({"_EVENT": "balance", "seq": 2}))).unwrap();

    let record = timeout(WAIT, late.recv()).await.unwrap().unwrap();
    assert_eq!(record.payload["seq"], 2);
    assert!(late.try_recv().is_none());

    relay.stop().await;
}

#[tokio::test]
async fn test_websocket_client_receives_event_packets() {
    let mut relay = RelayHarness::start();
    let addr = relay.start_fanout("/socket.io").await.unwrap();

    let url = format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr);
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert!(relay.wait_for_subscribers(1, WAIT).await);

    let upstream = relay.upstream.new_session();
    upstream
        .send(frame(json!({"_EVENT": "credit", "_BLOCKTIME": 1_700_000_000, "asset": "XYZ"})))
        .unwrap();

    let message = loop {
        match timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap() {
            tungstenite::Message::Text(text) => break text,
            _ => continue,
        }
    };
    let packet: Value = serde_json::from_str(message.as_str()).unwrap();
    assert_eq!(packet["type"], "event");
    assert_eq!(packet["name"], "credit");
    assert_eq!(packet["args"]["event"], "credit");
    assert_eq!(packet["args"]["block_time"], 1_700_000_000);
    assert_eq!(packet["args"]["block_time_str"], "2023-11-14T22:13:20.000000Z");
    assert_eq!(packet["args"]["msg"], json!({"asset": "XYZ"}));

    drop(ws);
    assert!(relay.wait_for_subscribers(0, WAIT).await);
    relay.stop().await;
}

#[tokio::test]
async fn test_request_outside_prefix_is_rejected() {
    let mut relay = RelayHarness::start();
    let addr = relay.start_fanout("/socket.io").await.unwrap();

    let response = reqwest::get(format!("http://{}/admin", addr)).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    let err = connect_async(format!("ws://{}/socket.iox/", addr)).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("unexpected error: {}", other),
    }

    assert_eq!(relay.router.subscriber_count(), 0);
    relay.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients_and_stops_feed() {
    let mut relay = RelayHarness::start();
    let addr = relay.start_fanout("/socket.io").await.unwrap();

    let (mut ws, _) = connect_async(format!("ws://{}/socket.io", addr)).await.unwrap();
    assert!(relay.wait_for_subscribers(1, WAIT).await);

    relay.shutdown.cancel();

    let closed = loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(tungstenite::Message::Close(_))) | None | Some(Err(_)) => break true,
            Some(Ok(_)) => continue,
        }
    };
    assert!(closed);

    let feed = relay.feed.clone();
    relay.stop().await;
    assert_eq!(feed.state(), FeedState::Disconnected);
}
