//! Process-wide lookup of bound sessions by connection id.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::Session;

/// Registry of live sessions, keyed by connection id.
///
/// Holds weak references so a session's lifetime stays tied to its
/// connection task.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u32, Weak<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a bound session
    pub fn register(&self, session: &Arc<Session>) {
        self.sessions
            .insert(session.connection_id(), Arc::downgrade(session));
    }

    /// Remove a session
    pub fn unregister(&self, connection_id: u32) {
        self.sessions.remove(&connection_id);
    }

    /// Look up a live session
    pub fn get(&self, connection_id: u32) -> Option<Arc<Session>> {
        let session = self.sessions.get(&connection_id)?.upgrade();
        if session.is_none() {
            self.sessions.remove(&connection_id);
        }
        session
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
