//! RestClient against a local mock HTTP server.

use aevo_core::InstrumentId;
use aevo_registry::{find_perp, ApiKeys, RegistryError, RestClient};
use aevo_testkit::MockHttpServer;
use serde_json::json;

fn keys() -> Option<ApiKeys> {
    Some(ApiKeys {
        key: "key-1".into(),
        secret: "secret-1".into(),
    })
}

#[tokio::test]
async fn test_get_markets_parses_perp() {
    let body = json!([
        {"instrument_id": "1", "instrument_name": "ETH-PERP", "mark_price": "3200.5",
         "price_step": "0.01", "amount_step": "0.001"}
    ]);
    let server = MockHttpServer::fixed(200, body.to_string()).await;
    let client = RestClient::new(server.url(), keys()).unwrap();

    let markets = client.get_markets("ETH").await.unwrap();
    let perp = find_perp(&markets, "ETH").unwrap();
    assert_eq!(perp.instrument_id, InstrumentId(1));

    let requests = server.requests_to("GET", "/markets");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/markets?asset=ETH");
    // Public endpoint: no credentials attached.
    assert_eq!(requests[0].header("aevo-key"), None);
}

#[tokio::test]
async fn test_private_call_sends_key_headers() {
    let body = json!({"account": "0xabc", "positions": []});
    let server = MockHttpServer::fixed(200, body.to_string()).await;
    let client = RestClient::new(server.url(), keys()).unwrap();

    let account = client.get_account().await.unwrap();
    assert!(account.positions.is_empty());

    let requests = server.requests_to("GET", "/account");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("aevo-key"), Some("key-1"));
    assert_eq!(requests[0].header("aevo-secret"), Some("secret-1"));
}

#[tokio::test]
async fn test_create_order_posts_body() {
    let server = MockHttpServer::fixed(200, json!({"order_id": "0x01"}).to_string()).await;
    let client = RestClient::new(server.url(), keys()).unwrap();

    let order = json!({"instrument": "1", "is_buy": true, "post_only": false});
    let response = client.create_order(&order).await.unwrap();
    assert_eq!(response["order_id"], "0x01");

    let requests = server.requests_to("POST", "/orders");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].json(), order);
}

#[tokio::test]
async fn test_cancel_all_sends_filter() {
    let server = MockHttpServer::fixed(200, json!({"success": true}).to_string()).await;
    let client = RestClient::new(server.url(), keys()).unwrap();

    client
        .cancel_all_orders(Some("PERPETUAL"), Some("ETH"))
        .await
        .unwrap();

    let requests = server.requests_to("DELETE", "/orders-all");
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].json(),
        json!({"instrument_type": "PERPETUAL", "asset": "ETH"})
    );
}

#[tokio::test]
async fn test_empty_body_is_null() {
    let server = MockHttpServer::fixed(200, "").await;
    let client = RestClient::new(server.url(), keys()).unwrap();

    let response = client.get_open_orders().await.unwrap();
    assert!(response.is_null());
}

#[tokio::test]
async fn test_http_error_status_surfaces() {
    let server = MockHttpServer::fixed(401, json!({"error": "UNAUTHORIZED"}).to_string()).await;
    let client = RestClient::new(server.url(), None).unwrap();

    let err = client.cancel_order("0xdead").await.unwrap_err();
    match err {
        RegistryError::HttpStatus { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("UNAUTHORIZED"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(server.requests_to("DELETE", "/orders/0xdead").len(), 1);
}
