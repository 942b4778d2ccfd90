use std::convert::Infallible;

use axum::response::sse::Event;
use futures::{Stream, stream};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use uuid::Uuid;

use crate::{McpError, McpMessage};

/// Outbound half of one session: frames protocol messages as SSE events and
/// owns the session identifier it generated.
#[derive(Debug)]
pub struct SseTransport {
    session_id: Uuid,
    sender: mpsc::Sender<McpMessage>,
}

impl SseTransport {
    /// Creates a transport with a fresh random session id. The returned receiver
    /// feeds the HTTP response body; dropping it closes the transport.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<McpMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (SseTransport { session_id: Uuid::new_v4(), sender }, receiver)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn send(&self, message: McpMessage) -> Result<(), McpError> {
        self.sender.send(message).await.map_err(|e| {
            McpError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("Failed to send outgoing message to event stream: {}", e),
            ))
        })
    }

    /// Resolves once the event stream has been dropped (client gone or write failed).
    pub async fn closed(&self) {
        self.sender.closed().await
    }

    /// Where the client must POST messages for this session.
    pub fn endpoint_url(message_path: &str, session_id: Uuid) -> String {
        format!("{}?sessionId={}", message_path, session_id)
    }

    pub fn endpoint_event(message_path: &str, session_id: Uuid) -> Event {
        Event::default().event("endpoint").data(Self::endpoint_url(message_path, session_id))
    }

    pub fn frame(session_id: Uuid, message: &McpMessage) -> Event {
        match message.to_json() {
            Ok(json_str) => Event::default().event("message").data(json_str),
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "failed to serialize outgoing message");
                Event::default().event("error").data("serialization error")
            }
        }
    }

    /// The full response body: the `endpoint` event first, then every outbound message.
    pub fn event_stream(
        session_id: Uuid,
        message_path: String,
        receiver: mpsc::Receiver<McpMessage>,
    ) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        let endpoint = Self::endpoint_event(&message_path, session_id);
        let messages = ReceiverStream::new(receiver).map(move |msg| Ok::<_, Infallible>(Self::frame(session_id, &msg)));
        stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages)
    }
}
