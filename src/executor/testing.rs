//! In-memory backend used by unit tests. Records every call in order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::backend::{
    AcquireOptions, BackendConnection, BackendError, BackendResult, ConnectionProvider,
    PreparedStatement, ResultCursor,
};
use crate::error::{GatewayError, Result};
use crate::protocol::mysql::{Challenge, HandshakeResponse41, GATEWAY_CAPABILITIES};
use crate::session::{PendingSession, Session, Transaction};
use crate::value::Value;

/// Knobs controlling how the mock backend behaves
#[derive(Clone, Default)]
pub(crate) struct Behavior {
    pub fail_acquire: bool,
    pub fail_prepare: bool,
    pub fail_execute: Option<BackendError>,
    pub fail_cursor_close: bool,
    pub fail_statement_close: bool,
    pub affected_rows: u64,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Execution blocks this long unless cancelled
    pub execute_delay: Option<Duration>,
}

/// Mock provider shared by all connections it hands out
pub(crate) struct MockProvider {
    behavior: Behavior,
    events: Arc<Mutex<Vec<String>>>,
    last_timeout: Arc<AtomicU64>,
    executing: Arc<Notify>,
}

impl MockProvider {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            events: Arc::new(Mutex::new(Vec::new())),
            last_timeout: Arc::new(AtomicU64::new(0)),
            executing: Arc::new(Notify::new()),
        })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn last_timeout(&self) -> u64 {
        self.last_timeout.load(Ordering::SeqCst)
    }

    /// Resolves once a statement starts executing
    pub async fn wait_executing(&self) {
        self.executing.notified().await
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn acquire(&self, options: &AcquireOptions) -> Result<Box<dyn BackendConnection>> {
        self.record(format!("acquire:{}", options.shard));
        if self.behavior.fail_acquire {
            return Err(GatewayError::ConnectionUnavailable {
                shard: options.shard.clone(),
                reason: "pool exhausted".into(),
            });
        }
        Ok(Box::new(MockConnection {
            shard: options.shard.clone(),
            behavior: self.behavior.clone(),
            events: Arc::clone(&self.events),
            last_timeout: Arc::clone(&self.last_timeout),
            executing: Arc::clone(&self.executing),
        }))
    }

    fn release(&self, shard: &str, _connection: Box<dyn BackendConnection>) {
        self.record(format!("release:{}", shard));
    }
}

struct MockConnection {
    shard: String,
    behavior: Behavior,
    events: Arc<Mutex<Vec<String>>>,
    last_timeout: Arc<AtomicU64>,
    executing: Arc<Notify>,
}

#[async_trait]
impl BackendConnection for MockConnection {
    fn shard(&self) -> &str {
        &self.shard
    }

    fn is_healthy(&self) -> bool {
        true
    }

    async fn prepare(&mut self, sql: &str) -> BackendResult<Arc<dyn PreparedStatement>> {
        self.events.lock().unwrap().push(format!("prepare:{}", sql));
        if self.behavior.fail_prepare {
            return Err(BackendError::with_code(1064, "42000", "You have an error in your SQL syntax"));
        }
        Ok(Arc::new(MockStatement {
            behavior: self.behavior.clone(),
            events: Arc::clone(&self.events),
            timeout: AtomicU64::new(0),
            last_timeout: Arc::clone(&self.last_timeout),
            executing: Arc::clone(&self.executing),
            cancelled: Notify::new(),
        }))
    }
}

struct MockStatement {
    behavior: Behavior,
    events: Arc<Mutex<Vec<String>>>,
    timeout: AtomicU64,
    last_timeout: Arc<AtomicU64>,
    executing: Arc<Notify>,
    cancelled: Notify,
}

impl MockStatement {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    async fn run(&self) -> BackendResult<()> {
        self.executing.notify_one();
        if let Some(delay) = self.behavior.execute_delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancelled.notified() => {
                    return Err(BackendError::with_code(1317, "70100", "Query execution was interrupted"));
                }
            }
        }
        match &self.behavior.fail_execute {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PreparedStatement for MockStatement {
    fn set_query_timeout(&self, secs: u64) {
        self.record(format!("timeout:{}", secs));
        self.timeout.store(secs, Ordering::SeqCst);
        self.last_timeout.store(secs, Ordering::SeqCst);
    }

    fn query_timeout(&self) -> u64 {
        self.timeout.load(Ordering::SeqCst)
    }

    async fn execute_update(&self, params: &[Value]) -> BackendResult<u64> {
        self.record(format!("execute_update:{}", params.len()));
        self.run().await?;
        Ok(self.behavior.affected_rows)
    }

    async fn execute_query(&self, params: &[Value]) -> BackendResult<Box<dyn ResultCursor>> {
        self.record(format!("execute_query:{}", params.len()));
        self.run().await?;
        Ok(Box::new(MockCursor {
            columns: self.behavior.columns.clone(),
            rows: self.behavior.rows.clone().into(),
            fail_close: self.behavior.fail_cursor_close,
            events: Arc::clone(&self.events),
        }))
    }

    async fn cancel(&self) -> BackendResult<()> {
        self.record("cancel");
        self.cancelled.notify_one();
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.record("statement.close");
        if self.behavior.fail_statement_close {
            return Err(BackendError::new("statement close failed"));
        }
        Ok(())
    }
}

struct MockCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    fail_close: bool,
    events: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ResultCursor for MockCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> BackendResult<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.events.lock().unwrap().push("cursor.close".to_string());
        if self.fail_close {
            return Err(BackendError::new("cursor close failed"));
        }
        Ok(())
    }
}

/// Bound session whose transaction hands out connections from `provider`
pub(crate) fn session(provider: Arc<dyn ConnectionProvider>, query_timeout_ms: u64) -> Arc<Session> {
    let pending = PendingSession {
        connection_id: 4242,
        charset_index: 33,
        server_capabilities: GATEWAY_CAPABILITIES,
        challenge: Challenge::from_parts(*b"AbCdEfGh", *b"IjKlMnOpQrSt"),
        remote_address: None,
        local_address: None,
    };
    let response = HandshakeResponse41 {
        capability_flags: GATEWAY_CAPABILITIES,
        username: "app".into(),
        ..HandshakeResponse41::default()
    };
    Arc::new(Session::bind(
        pending,
        response,
        Transaction::new(provider),
        query_timeout_ms,
    ))
}
