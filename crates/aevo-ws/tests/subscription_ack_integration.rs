//! Integration tests for subscription acknowledgements and replay.
//!
//! Drives `ConnectionManager` and `MessageDispatcher` together over the mock
//! transport, the way the bot wires them.

use aevo_ws::{
    AckStatus, BoxFuture, ConnectionConfig, ConnectionManager, FrameHandler, MessageDispatcher,
    MockConnector,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

struct NoopHandler;

impl FrameHandler for NoopHandler {
    fn on_ticker(&self, _asset: String, _data: Value) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn on_orders(&self, _data: Value) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn on_fills(&self, _data: Value) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

fn setup() -> (Arc<ConnectionManager>, MockConnector, MessageDispatcher) {
    let connector = MockConnector::new();
    let config = ConnectionConfig {
        url: "ws://mock".into(),
        open_retry_cooldown_ms: 1,
        reconnect_delay_ms: 1,
        recv_timeout_ms: 50,
        ..ConnectionConfig::default()
    };
    let conn = Arc::new(ConnectionManager::new(config, Arc::new(connector.clone())));
    let dispatcher = MessageDispatcher::new(conn.clone(), Arc::new(NoopHandler));
    (conn, connector, dispatcher)
}

fn subscribe_id(frame: &str) -> u64 {
    let value: Value = serde_json::from_str(frame).expect("subscribe frame is JSON");
    value["id"].as_u64().expect("subscribe frame carries an id")
}

/// Acks are matched by id even when they arrive in reverse order.
#[tokio::test]
async fn test_out_of_order_acks_resolve_by_id() {
    let (conn, connector, dispatcher) = setup();
    assert_ok!(conn.connect().await);

    let ticker = assert_ok!(conn.subscribe("ticker:ETH-PERP").await);
    let fills = assert_ok!(conn.subscribe("fills").await);

    let sent = connector.sent(0);
    let (ticker_id, fills_id) = (subscribe_id(&sent[0]), subscribe_id(&sent[1]));

    dispatcher
        .dispatch_text(&format!(r#"{{"id":{fills_id},"data":{{"success":true}}}}"#))
        .await;
    dispatcher
        .dispatch_text(&format!(r#"{{"id":{ticker_id},"error":"INVALID_CHANNEL"}}"#))
        .await;

    assert_eq!(fills.wait(Duration::from_millis(50)).await, AckStatus::Confirmed);
    assert_eq!(ticker.wait(Duration::from_millis(50)).await, AckStatus::Rejected);
    assert!(conn.acks().is_empty());
}

/// N subscribes produce exactly N replayed frames, in order, on each reconnect.
#[tokio::test]
async fn test_resubscribe_completeness_across_reconnects() {
    let (conn, connector, _dispatcher) = setup();
    assert_ok!(conn.connect().await);

    let channels = ["ticker:ETH-PERP", "orders", "fills", "orders"];
    for channel in channels {
        assert_ok!(conn.subscribe(channel).await);
    }

    for round in 1..=2 {
        assert_ok!(conn.reconnect().await);
        let replayed: Vec<String> = connector
            .sent(round)
            .iter()
            .map(|frame| {
                let value: Value = serde_json::from_str(frame).unwrap();
                assert_eq!(value["op"], "subscribe");
                value["data"][0].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(replayed, channels);
    }
    assert_eq!(conn.registry().len(), channels.len());
}
