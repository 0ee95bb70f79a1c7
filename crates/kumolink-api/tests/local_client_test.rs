#![allow(clippy::unwrap_used)]
// Integration tests for `LocalClient` using wiremock.

use serde_json::json;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kumolink_api::{AuthParams, DeviceKey, Error, LocalClient, QueryPath, TokenComputer};

// ── Helpers ─────────────────────────────────────────────────────────

const STATUS_QUERY: &str = r#"{"c":{"indoorUnit":{"status":{}}}}"#;
const REBOOT: &str = r#"{"c":{"adapter":{"status":{"runState":"reboot"}}}}"#;

fn key() -> DeviceKey {
    DeviceKey::from_encoded("c2VjcmV0LXBhc3N3b3Jk", "0123456789abcdef42").unwrap()
}

async fn setup() -> (MockServer, LocalClient) {
    let server = MockServer::start().await;
    let client = LocalClient::with_client(
        reqwest::Client::new(),
        server.address().to_string(),
        key(),
        AuthParams::default(),
    );
    (server, client)
}

// ── Request signing ─────────────────────────────────────────────────

#[tokio::test]
async fn test_query_is_signed_over_exact_body() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api"))
        .and(query_param(
            "m",
            "69e9856aaf80eb4186e46c06bb6806afa676c6273ca1f46b8dcd15fa97e3f6dc",
        ))
        .and(body_string(STATUS_QUERY))
        .and(header("content-type", "application/json"))
        .and(header("accept", "application/json, text/plain, */*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "r": { "indoorUnit": { "status": { "mode": "heat", "roomTemp": 21.5 } } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let path = QueryPath::new(["indoorUnit", "status"]);
    let response = client.query(&path.to_query()).await.unwrap();

    assert_eq!(
        path.extract(&response),
        Some(&json!({ "mode": "heat", "roomTemp": 21.5 }))
    );
}

#[tokio::test]
async fn test_reboot_sends_run_state_command() {
    let (server, client) = setup().await;
    let token = TokenComputer::default().token(&key(), REBOOT.as_bytes());

    Mock::given(method("PUT"))
        .and(path("/api"))
        .and(query_param("m", token.as_str()))
        .and(body_string(REBOOT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "r": {} })))
        .expect(1)
        .mount(&server)
        .await;

    client.reboot().await.unwrap();
}

// ── Response handling ───────────────────────────────────────────────

#[tokio::test]
async fn test_api_error_is_returned_in_band() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "_api_error": "device_authentication_error" })),
        )
        .mount(&server)
        .await;

    let response = client.request(STATUS_QUERY.as_bytes()).await.unwrap();
    assert_eq!(response["_api_error"], "device_authentication_error");
}

#[tokio::test]
async fn test_non_json_body_is_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
        .mount(&server)
        .await;

    let result = client.request(STATUS_QUERY.as_bytes()).await;
    assert!(
        matches!(result, Err(Error::Deserialization { ref body, .. }) if body.contains("busy")),
        "expected Deserialization error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_http_error_status() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let result = client.request(STATUS_QUERY.as_bytes()).await;
    assert!(
        matches!(result, Err(Error::DeviceApi { .. })),
        "expected DeviceApi error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_unreachable_address_is_transport_error() {
    // Bind then drop a server so the port is closed.
    let address = {
        let server = MockServer::start().await;
        server.address().to_string()
    };
    let client = LocalClient::with_client(
        reqwest::Client::new(),
        address,
        key(),
        AuthParams::default(),
    );

    let result = client.request(STATUS_QUERY.as_bytes()).await;
    assert!(
        matches!(result, Err(Error::Transport(_))),
        "expected Transport error, got: {result:?}"
    );
}
