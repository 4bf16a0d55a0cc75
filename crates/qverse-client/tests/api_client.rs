//! ApiClient against a wiremock backend

use qverse_client::api::{ApiClient, HttpMethod, RequestOptions};
use qverse_client::{ClientConfig, ClientError, PriceQuote};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    let config = ClientConfig::default()
        .with_api_base_url(format!("{}/api", server.uri()))
        .with_retries(3, Duration::from_millis(1));
    ApiClient::from_config(&config).unwrap()
}

#[tokio::test]
async fn success_envelope_returns_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/network/status"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": {"tps": 1200}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let data = assert_ok!(client_for(&server).network_status().await);
    assert_eq!(data, json!({"tps": 1200}));
}

#[tokio::test]
async fn success_envelope_wins_over_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/metrics"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"success": true, "data": {"ok": 1}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let data = assert_ok!(client_for(&server).get_metrics().await);
    assert_eq!(data, json!({"ok": 1}));
}

#[tokio::test]
async fn failure_envelope_exhausts_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/oracle/price/XYZ"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"success": false, "error": "Price not found"})),
        )
        .expect(4)
        .mount(&server)
        .await;

    let err = assert_err!(client_for(&server).get_price("XYZ").await);
    assert!(matches!(err, ClientError::Api(ref m) if m == "Price not found"), "got {:?}", err);
}

#[tokio::test]
async fn per_request_retries_override() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/exchange/pools"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let options = RequestOptions::new(HttpMethod::Get).retries(0);
    let err = assert_err!(client_for(&server).request::<Value>("/exchange/pools", options).await);
    assert_eq!(err.to_string(), "HTTP 500: Internal Server Error");
}

#[tokio::test]
async fn recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/yield/pools"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/yield/pools"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": [{"id": "p1"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let data = assert_ok!(client_for(&server).get_yield_pools().await);
    assert_eq!(data, json!([{"id": "p1"}]));
}

#[tokio::test]
async fn malformed_success_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .expect(4)
        .mount(&server)
        .await;

    let err = assert_err!(client_for(&server).health_check().await);
    assert!(matches!(err, ClientError::Parse(_)), "got {:?}", err);
}

#[tokio::test]
async fn typed_price_quote() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/oracle/price/QVR"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"token": "QVR", "price": 0.45, "sources": 3}
        })))
        .mount(&server)
        .await;

    let quote = assert_ok!(client_for(&server).get_price("QVR").await);
    assert_eq!(quote, PriceQuote { token: "QVR".to_string(), price: 0.45, sources: 3 });
}

#[tokio::test]
async fn data_shape_mismatch_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/oracle/price/QVR"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": {"token": "QVR"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = assert_err!(client_for(&server).get_price("QVR").await);
    assert!(matches!(err, ClientError::Parse(_)), "got {:?}", err);
}

#[tokio::test]
async fn post_sends_json_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/users"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"username": "alice"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"success": true, "data": {"id": "u1"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let data = assert_ok!(client_for(&server).create_user("alice").await);
    assert_eq!(data["id"], "u1");
}

#[tokio::test]
async fn custom_headers_and_put() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/governance/proposal"))
        .and(header("x-request-id", "abc"))
        .and(body_json(json!({"title": "Lower fees"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let options = RequestOptions::new(HttpMethod::Put)
        .json(&json!({"title": "Lower fees"}))
        .unwrap()
        .header("X-Request-Id", "abc");
    let data: Option<Value> =
        assert_ok!(client_for(&server).request("/governance/proposal", options).await);
    assert_eq!(data, None);
}

#[tokio::test]
async fn bare_error_body_on_failure_status() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/exchange/orders/o1"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "rate limited"})))
        .expect(4)
        .mount(&server)
        .await;

    let err = assert_err!(client_for(&server).delete::<Value>("/exchange/orders/o1").await);
    assert!(matches!(err, ClientError::Api(ref m) if m == "rate limited"), "got {:?}", err);
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::default()
        .with_api_base_url(format!("http://{}/api", addr))
        .with_retries(1, Duration::from_millis(1));
    let client = ApiClient::from_config(&config).unwrap();

    let err = assert_err!(client.get_pools().await);
    assert!(matches!(err, ClientError::Network(_)), "got {:?}", err);
}

#[tokio::test]
async fn bare_error_on_success_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/exchange/swap"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"error": "Insufficient balance"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let options = RequestOptions::new(HttpMethod::Post)
        .json(&json!({"from": "QVR", "to": "POPEO", "amount": 1000}))
        .unwrap()
        .retries(0);
    let err = assert_err!(client_for(&server).request::<Value>("/exchange/swap", options).await);
    assert!(matches!(err, ClientError::Api(ref m) if m == "Insufficient balance"), "got {:?}", err);
}

#[tokio::test]
async fn caller_content_type_replaces_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/batch/transfer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let options = RequestOptions::new(HttpMethod::Post)
        .json(&json!({"transfers": []}))
        .unwrap()
        .header("Content-Type", "application/vnd.qverse+json");
    let _: Option<Value> =
        assert_ok!(client_for(&server).request("/batch/transfer", options).await);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let content_types: Vec<_> = requests[0]
        .headers
        .get_all("content-type")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(content_types, vec!["application/vnd.qverse+json".to_string()]);
}

#[tokio::test]
async fn invalid_header_fails_without_sending() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(0)
        .mount(&server)
        .await;

    let options = RequestOptions::new(HttpMethod::Get).header("bad header", "x");
    let err = assert_err!(client_for(&server).request::<Value>("/health", options).await);
    assert!(matches!(err, ClientError::InvalidRequest(_)), "got {:?}", err);
}
