use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    ClientInfo, McpError, McpMessage, Response,
    config::ServerConfig,
    registry::SessionRegistry,
    server::McpServer,
    transport::SseTransport,
};

/// Lifecycle of one session. There is no way back to `Open`: a reconnecting
/// client always gets a new identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The event stream was dropped by the HTTP layer.
    ClientDisconnected,
    /// Writing to the event stream failed.
    TransportFailed,
    /// The server is shutting down.
    Shutdown,
    /// Every inbound sender is gone.
    InboundClosed,
}

/// Per-session protocol state shared between the record in the registry and
/// the session task.
#[derive(Debug)]
pub struct SessionContext {
    session_id: Uuid,
    state: Mutex<SessionState>,
    negotiated_protocol_version: Mutex<Option<String>>,
    client_info: Mutex<Option<ClientInfo>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionContext {
    pub fn new(session_id: Uuid) -> Self {
        SessionContext {
            session_id,
            state: Mutex::new(SessionState::Open),
            negotiated_protocol_version: Mutex::new(None),
            client_info: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        *guard(&self.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    fn transition(&self, next: SessionState) -> SessionState {
        let mut state = guard(&self.state);
        let previous = *state;
        *state = next;
        previous
    }

    pub fn negotiated_protocol_version(&self) -> Option<String> {
        guard(&self.negotiated_protocol_version).clone()
    }

    /// Records the outcome of `initialize`. Fails if the session already negotiated.
    pub fn complete_initialize(&self, version: String, client_info: Option<ClientInfo>) -> Result<(), McpError> {
        let mut negotiated = guard(&self.negotiated_protocol_version);
        if negotiated.is_some() {
            return Err(McpError::ProtocolError("session already initialized".to_string()));
        }
        *negotiated = Some(version);
        *guard(&self.client_info) = client_info;
        Ok(())
    }

    pub fn client_info(&self) -> Option<ClientInfo> {
        guard(&self.client_info).clone()
    }
}

/// One message handed to a session task. Requests carry a reply slot for the
/// HTTP caller waiting on the result.
#[derive(Debug)]
pub struct InboundMessage {
    pub message: McpMessage,
    pub reply: Option<oneshot::Sender<Response>>,
}

/// The registry's view of a session: how to reach its protocol server.
#[derive(Debug)]
pub struct McpSessionClient {
    context: Arc<SessionContext>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl McpSessionClient {
    pub fn new(inbound_tx: mpsc::Sender<InboundMessage>, context: Arc<SessionContext>) -> Self {
        McpSessionClient { context, inbound_tx }
    }

    pub fn session_id(&self) -> Uuid {
        self.context.session_id()
    }

    /// Queues `message` behind any earlier ones for this session. Requests wait
    /// for their response; notifications and responses return `None` once queued.
    pub async fn dispatch(&self, message: McpMessage, timeout: Duration) -> Result<Option<Response>, McpError> {
        let session_id = self.session_id();
        if !self.context.is_open() {
            return Err(McpError::SessionClosed(session_id));
        }

        match message {
            McpMessage::Request(request) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                self.inbound_tx
                    .send(InboundMessage { message: McpMessage::Request(request), reply: Some(reply_tx) })
                    .await
                    .map_err(|_| McpError::SessionClosed(session_id))?;

                match tokio::time::timeout(timeout, reply_rx).await {
                    Err(_) => Err(McpError::RequestTimeout),
                    // reply slot dropped unanswered: the session task ended
                    Ok(Err(_)) => Err(McpError::SessionClosed(session_id)),
                    Ok(Ok(response)) => Ok(Some(response)),
                }
            }
            other => {
                self.inbound_tx
                    .send(InboundMessage { message: other, reply: None })
                    .await
                    .map_err(|_| McpError::SessionClosed(session_id))?;
                Ok(None)
            }
        }
    }
}

/// The protocol server instance of one session. It owns the session's inbound
/// queue and outbound stream and is driven by a dedicated task until the
/// stream ends.
pub struct McpSessionHandler {
    context: Arc<SessionContext>,
    transport: SseTransport,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    server: Arc<McpServer>,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
    mirror_responses: bool,
}

impl McpSessionHandler {
    /// Creates the transport and protocol server for a new stream and registers
    /// the session. Returns the handler and the receiver feeding the event stream.
    pub fn open(
        server: Arc<McpServer>,
        registry: Arc<SessionRegistry>,
        config: &ServerConfig,
        shutdown: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<McpMessage>), McpError> {
        let (transport, outbound_rx) = SseTransport::new(config.channel_capacity);
        let session_id = transport.session_id();
        let context = Arc::new(SessionContext::new(session_id));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);

        let client = Arc::new(McpSessionClient::new(inbound_tx, context.clone()));
        registry.register(session_id, client)?;

        let handler = McpSessionHandler {
            context,
            transport,
            inbound_rx,
            server,
            registry,
            shutdown,
            mirror_responses: config.mirror_responses,
        };
        Ok((handler, outbound_rx))
    }

    pub fn session_id(&self) -> Uuid {
        self.context.session_id()
    }

    /// Processes inbound messages in arrival order until the stream ends, then
    /// tears the session down.
    pub async fn run(mut self) {
        let session_id = self.session_id();
        tracing::info!(%session_id, "session opened");

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Err(CloseReason::Shutdown),
                _ = self.transport.closed() => Err(CloseReason::ClientDisconnected),
                inbound = self.inbound_rx.recv() => inbound.ok_or(CloseReason::InboundClosed),
            };

            match next {
                Ok(inbound) => {
                    if let Err(reason) = self.handle_inbound(inbound).await {
                        break reason;
                    }
                }
                Err(reason) => break reason,
            }
        };

        self.close(reason);
    }

    async fn handle_inbound(&self, inbound: InboundMessage) -> Result<(), CloseReason> {
        let session_id = self.session_id();
        match inbound.message {
            McpMessage::Request(request) => {
                tracing::debug!(%session_id, method = %request.method, "handling request");
                let response = self.server.clone().handle_request(request, self.context.clone()).await;

                let waiting_caller = inbound.reply.is_some();
                if let Some(reply) = inbound.reply {
                    if reply.send(response.clone()).is_err() {
                        tracing::debug!(%session_id, id = ?response.id, "HTTP caller gone before response was ready");
                    }
                }

                if self.mirror_responses || !waiting_caller {
                    // a reader that stops draining the stream must not hold off shutdown
                    let sent = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return Err(CloseReason::Shutdown),
                        sent = self.transport.send(McpMessage::Response(response)) => sent,
                    };
                    if let Err(e) = sent {
                        tracing::warn!(%session_id, error = %e, "event stream write failed");
                        return Err(CloseReason::TransportFailed);
                    }
                }
            }
            McpMessage::Notification(notification) => {
                tracing::debug!(%session_id, method = %notification.method, "handling notification");
                self.server.clone().handle_notification(notification, self.context.clone()).await;
            }
            McpMessage::Response(response) => {
                // this server never issues requests to the client
                tracing::debug!(%session_id, id = ?response.id, "ignoring unsolicited client response");
            }
        }
        Ok(())
    }

    /// The single teardown path: Open -> Closing -> Closed. Consuming `self`
    /// drops the transport, which ends the event stream.
    fn close(self, reason: CloseReason) {
        let session_id = self.session_id();
        let previous = self.context.transition(SessionState::Closing);
        debug_assert_eq!(previous, SessionState::Open);

        let removed = self.registry.unregister(&session_id);
        self.context.transition(SessionState::Closed);

        match reason {
            CloseReason::TransportFailed => {
                tracing::warn!(%session_id, ?reason, removed, "session closed after transport failure")
            }
            _ => tracing::info!(%session_id, ?reason, removed, "session closed"),
        }
    }
}
