// End-to-end tests over a real socket: an event-stream client opens sessions
// and posts JSON-RPC messages to the endpoint each stream announces.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use reqwest_eventsource::{Event, EventSource};
use serde_json::{Value, json};
use storefront_mcp::{
    catalog::{CapabilityCatalog, STOREFRONT_WIDGETS, Widget},
    config::ServerConfig,
    server::{HttpGlobalAppState, McpHttpServer, McpServer},
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

struct TestServer {
    addr: SocketAddr,
    state: Arc<HttpGlobalAppState>,
}

impl TestServer {
    async fn start() -> Self {
        let widgets = STOREFRONT_WIDGETS
            .iter()
            .map(|definition| Widget::from_definition(definition, format!("<div id=\"{}-root\"></div>", definition.identifier)))
            .collect();
        let server = Arc::new(McpServer::new("storefront-e2e", "0.1.0", None, Arc::new(CapabilityCatalog::new(widgets))));
        let config = ServerConfig { keep_alive: Duration::from_millis(200), ..ServerConfig::default() };
        let shutdown = CancellationToken::new();
        let state = Arc::new(HttpGlobalAppState::new(server, config, shutdown.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = McpHttpServer::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .unwrap();
        });

        TestServer { addr, state }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Connects a stream and returns it with the absolute message URL it announced.
    async fn connect(&self) -> (EventSource, String) {
        let mut events = EventSource::get(self.url("/mcp"));
        let (kind, data) = next_message(&mut events).await;
        assert_eq!(kind, "endpoint");
        assert!(data.starts_with("/mcp/messages?sessionId="), "endpoint was {}", data);
        (events, self.url(&data))
    }
}

async fn next_message(events: &mut EventSource) -> (String, String) {
    loop {
        match timeout(Duration::from_secs(5), events.next()).await.expect("timed out waiting for an event") {
            Some(Ok(Event::Open)) => continue,
            Some(Ok(Event::Message(message))) => return (message.event, message.data),
            other => panic!("event stream failed: {:?}", other),
        }
    }
}

async fn next_json(events: &mut EventSource) -> Value {
    let (kind, data) = next_message(events).await;
    assert_eq!(kind, "message");
    serde_json::from_str(&data).unwrap()
}

async fn rpc(client: &Client, endpoint: &str, body: Value) -> Value {
    let response = client.post(endpoint).json(&body).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

#[tokio::test]
async fn lists_tools_over_a_live_session() {
    let server = TestServer::start().await;
    let client = Client::new();
    let (mut events, endpoint) = server.connect().await;

    let init = rpc(
        &client,
        &endpoint,
        json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": { "protocolVersion": "2025-06-18", "capabilities": {}, "clientInfo": { "name": "e2e" } }
        }),
    )
    .await;
    assert_eq!(init["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(next_json(&mut events).await["id"], 0);

    let accepted = client
        .post(&endpoint)
        .json(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    let listed = rpc(&client, &endpoint, json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })).await;
    let names: Vec<&str> =
        listed["result"]["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["product-search", "product-carousel", "order-history"]);

    // the same reply is mirrored onto the stream
    let mirrored = next_json(&mut events).await;
    assert_eq!(mirrored, listed);
    events.close();
}

#[tokio::test]
async fn calls_product_search_with_defaults() {
    let server = TestServer::start().await;
    let client = Client::new();
    let (mut events, endpoint) = server.connect().await;

    let reply = rpc(
        &client,
        &endpoint,
        json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "tools/call",
            "params": { "name": "product-search", "arguments": { "query": "phone" } }
        }),
    )
    .await;

    let result = &reply["result"];
    assert_eq!(reply["id"], "call-1");
    assert_eq!(result["isError"], false);
    assert_eq!(result["structuredContent"], json!({ "query": "phone", "skip": 0 }));
    assert_eq!(result["_meta"]["openai/outputTemplate"], "ui://widget/product-search.html");
    assert_eq!(result["_meta"]["openai.com/widget"]["resource"]["mimeType"], "text/html+skybridge");

    assert_eq!(next_json(&mut events).await["id"], "call-1");
    events.close();
}

#[tokio::test]
async fn reads_widget_resource() {
    let server = TestServer::start().await;
    let client = Client::new();
    let (mut events, endpoint) = server.connect().await;

    let reply = rpc(
        &client,
        &endpoint,
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "resources/read",
            "params": { "uri": "ui://widget/product-carousel.html" }
        }),
    )
    .await;
    assert_eq!(reply["result"]["contents"][0]["text"], "<div id=\"product-carousel-root\"></div>");

    let missing = rpc(
        &client,
        &endpoint,
        json!({ "jsonrpc": "2.0", "id": 5, "method": "resources/read", "params": { "uri": "ui://widget/gone.html" } }),
    )
    .await;
    assert_eq!(missing["error"]["code"], -32002);
    assert_eq!(missing["error"]["data"]["uri"], "ui://widget/gone.html");
    events.close();
}

#[tokio::test]
async fn closed_stream_invalidates_session() {
    let server = TestServer::start().await;
    let client = Client::new();
    let (mut events, endpoint) = server.connect().await;
    assert_eq!(server.state.sessions.size(), 1);

    events.close();
    drop(events);

    // removal is observed once the server notices the dropped connection
    let status = timeout(Duration::from_secs(5), async {
        loop {
            let status = client
                .post(&endpoint)
                .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
                .send()
                .await
                .unwrap()
                .status();
            if status == StatusCode::NOT_FOUND {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("session was never invalidated");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(server.state.sessions.is_empty());
}

#[tokio::test]
async fn concurrent_sessions_are_isolated() {
    let server = TestServer::start().await;
    let client = Client::new();
    let (mut first, first_endpoint) = server.connect().await;
    let (mut second, second_endpoint) = server.connect().await;
    assert_ne!(first_endpoint, second_endpoint);
    assert_eq!(server.state.sessions.size(), 2);

    rpc(
        &client,
        &first_endpoint,
        json!({ "jsonrpc": "2.0", "id": 10, "method": "initialize", "params": { "protocolVersion": "2025-03-26" } }),
    )
    .await;
    rpc(
        &client,
        &second_endpoint,
        json!({ "jsonrpc": "2.0", "id": 20, "method": "initialize", "params": { "protocolVersion": "2024-11-05" } }),
    )
    .await;

    // each stream only carries its own session's replies
    let on_first = next_json(&mut first).await;
    let on_second = next_json(&mut second).await;
    assert_eq!((on_first["id"].clone(), on_first["result"]["protocolVersion"].clone()), (json!(10), json!("2025-03-26")));
    assert_eq!((on_second["id"].clone(), on_second["result"]["protocolVersion"].clone()), (json!(20), json!("2024-11-05")));

    first.close();
    let pong = rpc(&client, &second_endpoint, json!({ "jsonrpc": "2.0", "id": 21, "method": "ping" })).await;
    assert_eq!(pong["result"], json!({}));
    second.close();
}
