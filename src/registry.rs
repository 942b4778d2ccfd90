use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use crate::{McpError, session::McpSessionClient};

/// Live sessions keyed by the identifier their stream announced.
///
/// This is the only shared mutable state of the session layer. Registration
/// happens on stream setup, lookups on every inbound message and removal from
/// the session's own task when its stream ends; all three may run concurrently.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<McpSessionClient>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new session. Identifiers are random v4 UUIDs, so a collision
    /// means the caller reused an id.
    pub fn register(&self, session_id: Uuid, record: Arc<McpSessionClient>) -> Result<(), McpError> {
        match self.sessions.entry(session_id) {
            Entry::Occupied(_) => {
                tracing::error!(%session_id, "refusing to register duplicate session id");
                Err(McpError::DuplicateSession(session_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                tracing::debug!(%session_id, active = self.sessions.len(), "session registered");
                Ok(())
            }
        }
    }

    pub fn lookup(&self, session_id: &Uuid) -> Option<Arc<McpSessionClient>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// Removes a session. Returns whether it was present; removing twice is a no-op.
    pub fn unregister(&self, session_id: &Uuid) -> bool {
        let removed = self.sessions.remove(session_id).is_some();
        if removed {
            tracing::debug!(%session_id, active = self.sessions.len(), "session unregistered");
        }
        removed
    }

    pub fn contains(&self, session_id: &Uuid) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
