use std::{collections::HashMap, future::Future, panic::AssertUnwindSafe, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response as AxumResponse, Sse, sse::KeepAlive},
    routing::{get, post},
};
use futures::{FutureExt, future::BoxFuture};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    INTERNAL_ERROR, McpError, McpMessage, Notification, Request, RequestId, Response,
    ServerCapabilities, ServerInfo, ServerResourcesCapability, ServerToolsCapability,
    catalog::CapabilityCatalog,
    config::ServerConfig,
    handlers,
    registry::SessionRegistry,
    session::{McpSessionHandler, SessionContext},
    transport::SseTransport,
};

pub type RequestHandler = Arc<
    dyn Fn(Request, Arc<SessionContext>, Arc<McpServer>) -> BoxFuture<'static, Result<Response, McpError>>
        + Send
        + Sync,
>;

pub type NotificationHandler = Arc<
    dyn Fn(Notification, Arc<SessionContext>, Arc<McpServer>) -> BoxFuture<'static, Result<(), McpError>>
        + Send
        + Sync,
>;

fn request_handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(Request, Arc<SessionContext>, Arc<McpServer>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, McpError>> + Send + 'static,
{
    Arc::new(move |request, session, server| Box::pin(f(request, session, server)))
}

fn notification_handler<F, Fut>(f: F) -> NotificationHandler
where
    F: Fn(Notification, Arc<SessionContext>, Arc<McpServer>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), McpError>> + Send + 'static,
{
    Arc::new(move |notification, session, server| Box::pin(f(notification, session, server)))
}

/// Application-wide protocol configuration: server identity, the capability
/// catalog and the method tables. Built once and shared by every session.
pub struct McpServer {
    pub server_info: ServerInfo,
    pub server_capabilities: ServerCapabilities,
    pub instructions: Option<String>,
    pub catalog: Arc<CapabilityCatalog>,
    request_handlers: HashMap<&'static str, RequestHandler>,
    notification_handlers: HashMap<&'static str, NotificationHandler>,
}

impl McpServer {
    pub const LATEST_SUPPORTED_PROTOCOL_VERSION: &'static str = "2025-06-18";
    pub const SUPPORTED_PROTOCOL_VERSIONS: &'static [&'static str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

    pub fn new(
        server_name: impl Into<String>,
        server_version: impl Into<String>,
        instructions: Option<String>,
        catalog: Arc<CapabilityCatalog>,
    ) -> Self {
        let request_handlers: HashMap<&'static str, RequestHandler> = HashMap::from([
            ("initialize", request_handler(handlers::handle_initialize)),
            ("ping", request_handler(handlers::handle_ping)),
            ("tools/list", request_handler(handlers::handle_tools_list)),
            ("tools/call", request_handler(handlers::handle_tools_call)),
            ("resources/list", request_handler(handlers::handle_resources_list)),
            ("resources/read", request_handler(handlers::handle_resources_read)),
            ("resources/templates/list", request_handler(handlers::handle_resource_templates_list)),
        ]);
        let notification_handlers: HashMap<&'static str, NotificationHandler> = HashMap::from([(
            "notifications/initialized",
            notification_handler(handlers::handle_initialized_notification),
        )]);

        McpServer {
            server_info: ServerInfo { name: server_name.into(), title: None, version: Some(server_version.into()) },
            server_capabilities: ServerCapabilities {
                resources: Some(ServerResourcesCapability { subscribe: Some(false), list_changed: Some(false) }),
                tools: Some(ServerToolsCapability { list_changed: Some(false) }),
                experimental: None,
            },
            instructions,
            catalog,
            request_handlers,
            notification_handlers,
        }
    }

    /// Runs the handler for `request`. Always produces a response: handler
    /// errors and panics become JSON-RPC errors and never reach the session.
    pub async fn handle_request(self: Arc<Self>, request: Request, session: Arc<SessionContext>) -> Response {
        let id = request.id.clone();
        let method = request.method.clone();
        let session_id = session.session_id();

        let Some(handler) = self.request_handlers.get(method.as_str()).cloned() else {
            if self.notification_handlers.contains_key(method.as_str()) {
                tracing::warn!(%session_id, %method, "notification method sent as a request");
                return Self::error_response(
                    id,
                    McpError::ProtocolError(format!("Method '{}' is a notification and must not carry an id", method)),
                );
            }
            tracing::debug!(%session_id, %method, "unhandled request method");
            return Self::error_response(id, McpError::MethodNotFound(method));
        };

        match AssertUnwindSafe(handler(request, session, self.clone())).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                tracing::warn!(%session_id, %method, error = %err, "request handler returned an error");
                Self::error_response(id, err)
            }
            Err(_) => {
                tracing::error!(%session_id, %method, "request handler panicked");
                Response::new_error(id, INTERNAL_ERROR, "Internal server error", None)
            }
        }
    }

    pub async fn handle_notification(self: Arc<Self>, notification: Notification, session: Arc<SessionContext>) {
        let method = notification.method.clone();
        let session_id = session.session_id();

        let Some(handler) = self.notification_handlers.get(method.as_str()).cloned() else {
            if self.request_handlers.contains_key(method.as_str()) {
                tracing::warn!(%session_id, %method, "request method sent as a notification, nothing to answer");
            } else {
                tracing::debug!(%session_id, %method, "ignoring unknown notification");
            }
            return;
        };

        match AssertUnwindSafe(handler(notification, session, self.clone())).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(%session_id, %method, error = %err, "notification handler returned an error"),
            Err(_) => tracing::error!(%session_id, %method, "notification handler panicked"),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_request_handler<F, Fut>(mut self, method: &'static str, f: F) -> Self
    where
        F: Fn(Request, Arc<SessionContext>, Arc<McpServer>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, McpError>> + Send + 'static,
    {
        self.request_handlers.insert(method, request_handler(f));
        self
    }

    fn error_response(id: RequestId, err: McpError) -> Response {
        let code = err.rpc_code();
        let data = match &err {
            McpError::ResourceNotFound(uri) => Some(json!({ "uri": uri })),
            _ => None,
        };
        let message = if code == INTERNAL_ERROR {
            format!("Internal server error: {}", err)
        } else {
            err.to_string()
        };
        Response::new_error(id, code, &message, data)
    }
}

/// Shared state of the HTTP front end.
pub struct HttpGlobalAppState {
    pub sessions: Arc<SessionRegistry>,
    pub app_config: Arc<McpServer>,
    pub config: ServerConfig,
    pub shutdown: CancellationToken,
}

impl HttpGlobalAppState {
    pub fn new(app_config: Arc<McpServer>, config: ServerConfig, shutdown: CancellationToken) -> Self {
        HttpGlobalAppState { sessions: Arc::new(SessionRegistry::new()), app_config, config, shutdown }
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

pub struct McpHttpServer;

impl McpHttpServer {
    pub fn router(state: Arc<HttpGlobalAppState>) -> Router {
        // The calling agent lives on a third-party origin.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        Router::new()
            .route(&state.config.sse_path, get(McpHttpServer::handle_sse_get))
            .route(&state.config.message_path, post(McpHttpServer::handle_message_post))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serves until `shutdown` is cancelled. Cancelling also closes every open
    /// session so their streams end and the listener can drain.
    pub async fn start_listener(
        config: ServerConfig,
        app_config: Arc<McpServer>,
        shutdown: CancellationToken,
    ) -> Result<(), McpError> {
        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            sse = %config.sse_path,
            messages = %config.message_path,
            "HTTP server listening"
        );

        let state = Arc::new(HttpGlobalAppState::new(app_config, config, shutdown.clone()));
        let app = McpHttpServer::router(state.clone());

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!(remaining = state.sessions.size(), "HTTP server stopped");
        Ok(())
    }

    /// Stream endpoint: opens a new session and keeps the event stream open
    /// until the client goes away or the server shuts down.
    pub async fn handle_sse_get(State(state): State<Arc<HttpGlobalAppState>>) -> AxumResponse {
        let opened = McpSessionHandler::open(
            state.app_config.clone(),
            state.sessions.clone(),
            &state.config,
            state.shutdown.child_token(),
        );

        let (handler, outbound_rx) = match opened {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "failed to open session");
                return e.into_response();
            }
        };

        let session_id = handler.session_id();
        let stream = SseTransport::event_stream(session_id, state.config.message_path.clone(), outbound_rx);
        tokio::spawn(handler.run());
        tracing::debug!(%session_id, active = state.sessions.size(), "event stream started");

        Sse::new(stream)
            .keep_alive(KeepAlive::new().interval(state.config.keep_alive).text("keep-alive"))
            .into_response()
    }

    /// Message endpoint: routes one JSON-RPC message into the session named by
    /// the `sessionId` query parameter.
    pub async fn handle_message_post(
        State(state): State<Arc<HttpGlobalAppState>>,
        Query(query): Query<MessageQuery>,
        body: String,
    ) -> Result<AxumResponse, McpError> {
        let raw_id = query
            .session_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(McpError::MissingSessionId)?;

        // Malformed ids can never have been issued, so they are simply unknown.
        let Some(session) = Uuid::parse_str(raw_id.trim()).ok().and_then(|id| state.sessions.lookup(&id)) else {
            tracing::debug!(session_id = %raw_id, "message for unknown session");
            return Err(McpError::SessionNotFound);
        };
        let session_id = session.session_id();

        let message = McpMessage::from_json(&body).inspect_err(|e| {
            tracing::debug!(%session_id, error = %e, "rejecting malformed message");
        })?;

        match session.dispatch(message, state.config.request_timeout).await {
            Ok(Some(response)) => Ok(Json(response).into_response()),
            Ok(None) => Ok(StatusCode::ACCEPTED.into_response()),
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "message dispatch failed");
                Err(e)
            }
        }
    }
}
