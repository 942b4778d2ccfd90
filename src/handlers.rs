//! Protocol capability handlers. Every session's protocol server routes to
//! these; they only read the shared catalog and the caller's own session state.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    CallToolResult, InitializeRequestParams, InitializeResult, McpError, Notification, Request,
    ResourceTemplatesListResult, ResourcesListResult, ResourcesReadParams, ResourcesReadResult,
    Response, ToolsCallParams, ToolsListResult,
    catalog::ProductQuery,
    server::McpServer,
    session::SessionContext,
};

fn parse_params<T: DeserializeOwned>(request: &Request) -> Result<T, McpError> {
    let params = request.params.clone().unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(params)
        .map_err(|e| McpError::InvalidParams(format!("Invalid {} params: {}", request.method, e)))
}

pub async fn handle_initialize(
    request: Request,
    session: Arc<SessionContext>,
    server: Arc<McpServer>,
) -> Result<Response, McpError> {
    let params: InitializeRequestParams = parse_params(&request)?;

    let protocol_version = if McpServer::SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
        params.protocol_version
    } else {
        tracing::info!(
            session_id = %session.session_id(),
            requested = %params.protocol_version,
            "unsupported protocol version requested, answering with latest"
        );
        McpServer::LATEST_SUPPORTED_PROTOCOL_VERSION.to_string()
    };

    session.complete_initialize(protocol_version.clone(), params.client_info.clone())?;
    tracing::info!(
        session_id = %session.session_id(),
        %protocol_version,
        client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
        "session initialized"
    );

    let result = InitializeResult {
        protocol_version,
        capabilities: server.server_capabilities.clone(),
        server_info: Some(server.server_info.clone()),
        instructions: server.instructions.clone(),
    };
    Response::from_result(request.id, &result)
}

pub async fn handle_initialized_notification(
    _notification: Notification,
    session: Arc<SessionContext>,
    _server: Arc<McpServer>,
) -> Result<(), McpError> {
    tracing::debug!(session_id = %session.session_id(), "client reports ready");
    Ok(())
}

pub async fn handle_ping(
    request: Request,
    _session: Arc<SessionContext>,
    _server: Arc<McpServer>,
) -> Result<Response, McpError> {
    Ok(Response::new_success(request.id, Value::Object(Default::default())))
}

pub async fn handle_tools_list(
    request: Request,
    _session: Arc<SessionContext>,
    server: Arc<McpServer>,
) -> Result<Response, McpError> {
    let result = ToolsListResult { tools: server.catalog.tools(), next_cursor: None };
    Response::from_result(request.id, &result)
}

pub async fn handle_resources_list(
    request: Request,
    _session: Arc<SessionContext>,
    server: Arc<McpServer>,
) -> Result<Response, McpError> {
    let result = ResourcesListResult { resources: server.catalog.resources(), next_cursor: None };
    Response::from_result(request.id, &result)
}

pub async fn handle_resource_templates_list(
    request: Request,
    _session: Arc<SessionContext>,
    server: Arc<McpServer>,
) -> Result<Response, McpError> {
    let result = ResourceTemplatesListResult {
        resource_templates: server.catalog.resource_templates(),
        next_cursor: None,
    };
    Response::from_result(request.id, &result)
}

pub async fn handle_resources_read(
    request: Request,
    _session: Arc<SessionContext>,
    server: Arc<McpServer>,
) -> Result<Response, McpError> {
    let params: ResourcesReadParams = parse_params(&request)?;
    let widget = server
        .catalog
        .resource(&params.uri)
        .ok_or_else(|| McpError::ResourceNotFound(params.uri.clone()))?;

    let result = ResourcesReadResult { contents: vec![widget.contents()] };
    Response::from_result(request.id, &result)
}

/// Unknown tools and bad arguments are reported as tool results with
/// `isError` set, so the calling model sees them.
pub async fn handle_tools_call(
    request: Request,
    session: Arc<SessionContext>,
    server: Arc<McpServer>,
) -> Result<Response, McpError> {
    let params: ToolsCallParams = parse_params(&request)?;
    let session_id = session.session_id();

    let Some(widget) = server.catalog.tool(&params.name) else {
        tracing::info!(%session_id, tool = %params.name, "unknown tool requested");
        let result = CallToolResult::error_text(format!("Unknown tool: {}", params.name));
        return Response::from_result(request.id, &result);
    };

    let result = match ProductQuery::from_arguments(params.arguments.as_ref()) {
        Ok(query) => {
            tracing::info!(%session_id, tool = %params.name, query = %query.query, skip = query.skip, "tool invoked");
            widget.call_result(&query)
        }
        Err(e) => {
            tracing::info!(%session_id, tool = %params.name, field = e.field, "tool arguments rejected");
            CallToolResult::error_text(e.to_string())
        }
    };
    Response::from_result(request.id, &result)
}
