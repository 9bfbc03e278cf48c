//! Pending and bound session state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::executor::StatementSlot;
use crate::protocol::mysql::{Challenge, HandshakeResponse41};

use super::Transaction;

/// State kept between the greeting and the authentication reply.
///
/// Exactly one authentication task may consume it.
#[derive(Debug, Clone)]
pub struct PendingSession {
    /// Connection id sent in the greeting
    pub connection_id: u32,
    /// Character set index sent in the greeting
    pub charset_index: u8,
    /// Capability flags sent in the greeting
    pub server_capabilities: u32,
    /// Challenge sent in the greeting
    pub challenge: Challenge,
    /// Client address
    pub remote_address: Option<SocketAddr>,
    /// Gateway address the client connected to
    pub local_address: Option<SocketAddr>,
}

/// Named values attached to a session
#[derive(Debug, Default)]
pub struct SessionAttachments {
    /// Client address
    pub remote_address: Option<SocketAddr>,
    /// Gateway address the client connected to
    pub local_address: Option<SocketAddr>,
    /// Free-form attributes
    pub extra: DashMap<String, String>,
}

/// An authenticated client connection.
///
/// Shared as `Arc<Session>` between the connection task, the workers it
/// spawns and the [`SessionRegistry`](super::SessionRegistry).
pub struct Session {
    connection_id: u32,
    charset: u8,
    capabilities: u32,
    user: String,
    schema: Mutex<Option<String>>,
    challenge: Challenge,
    handshake_response: HandshakeResponse41,
    attachments: SessionAttachments,
    transaction: Transaction,
    query_timeout_ms: AtomicU64,
    statements: DashMap<u64, Arc<StatementSlot>>,
    closed: AtomicBool,
    termination_requested: AtomicBool,
    termination: Notify,
}

impl Session {
    /// Promote a pending session after successful authentication.
    pub fn bind(
        pending: PendingSession,
        handshake_response: HandshakeResponse41,
        transaction: Transaction,
        query_timeout_ms: u64,
    ) -> Self {
        let attachments = SessionAttachments {
            remote_address: pending.remote_address,
            local_address: pending.local_address,
            extra: DashMap::new(),
        };
        for key in ["_client_name", "_client_version", "program_name"] {
            if let Some(value) = handshake_response.connect_attr(key) {
                attachments.extra.insert(key.to_string(), value.to_string());
            }
        }

        Self {
            connection_id: pending.connection_id,
            charset: handshake_response.character_set,
            capabilities: pending.server_capabilities & handshake_response.capability_flags,
            user: handshake_response.username.clone(),
            schema: Mutex::new(handshake_response.schema().map(str::to_string)),
            challenge: pending.challenge,
            handshake_response,
            attachments,
            transaction,
            query_timeout_ms: AtomicU64::new(query_timeout_ms),
            statements: DashMap::new(),
            closed: AtomicBool::new(false),
            termination_requested: AtomicBool::new(false),
            termination: Notify::new(),
        }
    }

    /// Connection id (also the MySQL thread id seen by the client)
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Negotiated character set index
    pub fn charset(&self) -> u8 {
        self.charset
    }

    /// Capabilities both sides support
    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    /// Authenticated user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Currently selected schema
    pub fn schema(&self) -> Option<String> {
        self.schema
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Select a schema
    pub fn set_schema(&self, schema: impl Into<String>) {
        *self.schema.lock().unwrap_or_else(PoisonError::into_inner) = Some(schema.into());
    }

    /// Challenge issued to this connection
    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    /// The client's handshake response
    pub fn handshake_response(&self) -> &HandshakeResponse41 {
        &self.handshake_response
    }

    /// Named attachments
    pub fn attachments(&self) -> &SessionAttachments {
        &self.attachments
    }

    /// The session's transaction
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Statement deadline in milliseconds (0 = none)
    pub fn query_timeout_ms(&self) -> u64 {
        self.query_timeout_ms.load(Ordering::Relaxed)
    }

    /// Change the statement deadline
    pub fn set_query_timeout_ms(&self, ms: u64) {
        self.query_timeout_ms.store(ms, Ordering::Relaxed);
    }

    /// Track a worker's statement for cancel fan-out
    pub fn register_statement(&self, slot: Arc<StatementSlot>) {
        self.statements.insert(slot.id(), slot);
    }

    /// Stop tracking a worker's statement
    pub fn unregister_statement(&self, slot_id: u64) {
        self.statements.remove(&slot_id);
    }

    /// Number of workers currently registered
    pub fn in_flight(&self) -> usize {
        self.statements.len()
    }

    /// Cancel every in-flight statement. Returns how many were signalled.
    pub async fn cancel(&self) -> usize {
        // Snapshot first: no map guard may be held across an await
        let slots: Vec<Arc<StatementSlot>> = self
            .statements
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut cancelled = 0;
        for slot in slots {
            if slot.cancel().await {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(
                connection_id = self.connection_id,
                cancelled, "Cancelled in-flight statements"
            );
        }
        cancelled
    }

    /// Close the session: cancel in-flight statements and close the
    /// transaction. Returns `true` on the first call only.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel().await;
        self.transaction.close();
        debug!(
            connection_id = self.connection_id,
            user = %self.user,
            "Session closed"
        );
        true
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ask the owning connection to shut down (`KILL CONNECTION`)
    pub fn request_termination(&self) {
        self.termination_requested.store(true, Ordering::Release);
        self.termination.notify_one();
    }

    /// Whether termination was requested
    pub fn is_termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::Acquire)
    }

    /// Resolves once termination has been requested
    pub async fn terminated(&self) {
        if self.is_termination_requested() {
            return;
        }
        self.termination.notified().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("user", &self.user)
            .field("schema", &self.schema())
            .field("charset", &self.charset)
            .field("transaction", &self.transaction)
            .field("closed", &self.is_closed())
            .finish()
    }
}
