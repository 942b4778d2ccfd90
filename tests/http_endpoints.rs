// In-process tests of the two HTTP endpoints, driven through the router
// without opening a socket.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use storefront_mcp::{
    catalog::{CapabilityCatalog, STOREFRONT_WIDGETS, Widget},
    config::ServerConfig,
    server::{HttpGlobalAppState, McpHttpServer, McpServer},
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

fn test_state() -> Arc<HttpGlobalAppState> {
    let widgets = STOREFRONT_WIDGETS
        .iter()
        .map(|definition| Widget::from_definition(definition, format!("<div id=\"{}-root\"></div>", definition.identifier)))
        .collect();
    let server = Arc::new(McpServer::new("storefront-test", "0.1.0", None, Arc::new(CapabilityCatalog::new(widgets))));
    Arc::new(HttpGlobalAppState::new(server, ServerConfig::default(), CancellationToken::new()))
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

/// Opens a stream and returns its body plus the announced endpoint URL.
async fn open_stream(state: &Arc<HttpGlobalAppState>) -> (Body, String) {
    let response = McpHttpServer::router(state.clone())
        .oneshot(Request::builder().uri("/mcp").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/event-stream"),
        "stream endpoint must answer with an event stream"
    );

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("no endpoint event")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.starts_with("event: endpoint\n"), "first event was {:?}", text);
    let endpoint = text
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("endpoint event without data")
        .to_string();
    (body, endpoint)
}

#[tokio::test]
async fn post_without_session_id_is_bad_request() {
    let response = McpHttpServer::router(test_state())
        .oneshot(post("/mcp/messages", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "missing session identifier");
}

#[tokio::test]
async fn post_with_empty_session_id_is_bad_request() {
    let response = McpHttpServer::router(test_state())
        .oneshot(post("/mcp/messages?sessionId=", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn post_for_unknown_session_is_not_found() {
    let uri = format!("/mcp/messages?sessionId={}", Uuid::new_v4());
    let response = McpHttpServer::router(test_state())
        .oneshot(post(&uri, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(response).await, "unknown session");
}

#[tokio::test]
async fn malformed_session_id_is_not_found() {
    let response = McpHttpServer::router(test_state())
        .oneshot(post("/mcp/messages?sessionId=not-a-session", r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cors_preflight_allows_any_origin() {
    let response = McpHttpServer::router(test_state())
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/mcp/messages")
                .header(header::ORIGIN, "https://chat.example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
    assert!(methods.contains("POST") && methods.contains("GET"));
}

#[tokio::test]
async fn stream_registers_session_until_dropped() {
    let state = test_state();
    let (body, endpoint) = open_stream(&state).await;

    let session_id: Uuid = endpoint
        .strip_prefix("/mcp/messages?sessionId=")
        .expect("endpoint must point at the message path")
        .parse()
        .unwrap();
    assert!(state.sessions.contains(&session_id));

    drop(body);
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.sessions.contains(&session_id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session still registered after its stream was dropped");

    let response = McpHttpServer::router(state)
        .oneshot(post(&endpoint, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn request_is_answered_in_the_http_body() {
    let state = test_state();
    let (_body, endpoint) = open_stream(&state).await;

    let response = McpHttpServer::router(state)
        .oneshot(post(&endpoint, json!({ "jsonrpc": "2.0", "id": 7, "method": "tools/list" }).to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["id"], 7);
    assert_eq!(json["result"]["tools"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn notification_is_accepted_without_body() {
    let state = test_state();
    let (_body, endpoint) = open_stream(&state).await;

    let response = McpHttpServer::router(state)
        .oneshot(post(&endpoint, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn malformed_body_is_bad_request_and_session_survives() {
    let state = test_state();
    let (_body, endpoint) = open_stream(&state).await;

    for bad in ["{not json", r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#, "[]"] {
        let response = McpHttpServer::router(state.clone()).oneshot(post(&endpoint, bad)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", bad);
    }

    let response = McpHttpServer::router(state)
        .oneshot(post(&endpoint, r#"{"jsonrpc":"2.0","id":"after","method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], "after");
}

#[tokio::test]
async fn shutdown_closes_open_streams() {
    let state = test_state();
    let (mut body, _endpoint) = open_stream(&state).await;
    assert_eq!(state.sessions.size(), 1);

    state.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), async {
        // drain until the body ends
        while let Some(frame) = body.frame().await {
            frame.unwrap();
        }
    })
    .await
    .expect("stream did not end on shutdown");
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn negative_request_id_is_echoed() {
    let state = test_state();
    let (_body, endpoint) = open_stream(&state).await;

    let response = McpHttpServer::router(state)
        .oneshot(post(&endpoint, r#"{"jsonrpc":"2.0","id":-1,"method":"ping"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], -1);
}
