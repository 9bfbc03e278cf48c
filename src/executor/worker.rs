//! Shard execution worker.

use std::sync::Arc;

use crate::backend::{
    AcquireOptions, BackendConnection, BackendError, ConnectionProvider, PreparedStatement,
    ResultCursor,
};
use crate::error::{GatewayError, Result};
use crate::session::Session;
use crate::value::Value;

use super::StatementSlot;

/// Lifecycle of a [`ShardWorker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, nothing acquired
    Created,
    /// Holding a backend connection
    Connected,
    /// Statement prepared and running
    Executing,
    /// Query finished, cursor open for fetching
    ResultOpen,
    /// All resources released
    Closed,
}

/// Executes one statement on one shard for one session.
///
/// Holds at most one backend connection, one prepared statement and one
/// result cursor. [`close`](Self::close) releases them in that reverse order:
/// cursor, statement, connection. Every step runs even when an earlier one
/// fails, and all three handles are empty afterwards.
pub struct ShardWorker {
    session: Arc<Session>,
    shard: String,
    sql: String,
    params: Vec<Value>,
    state: WorkerState,
    provider: Option<Arc<dyn ConnectionProvider>>,
    connection: Option<Box<dyn BackendConnection>>,
    slot: Arc<StatementSlot>,
    cursor: Option<Box<dyn ResultCursor>>,
    closed: bool,
    teardown_failures: Vec<GatewayError>,
}

impl ShardWorker {
    /// Create a worker and register its statement slot with the session.
    pub fn new(
        session: Arc<Session>,
        shard: impl Into<String>,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> Self {
        let slot = Arc::new(StatementSlot::new());
        session.register_statement(Arc::clone(&slot));
        Self {
            session,
            shard: shard.into(),
            sql: sql.into(),
            params,
            state: WorkerState::Created,
            provider: None,
            connection: None,
            slot,
            cursor: None,
            closed: false,
            teardown_failures: Vec::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Target shard
    pub fn shard(&self) -> &str {
        &self.shard
    }

    /// Statement text
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Handle that cancels this worker's statement from another task
    pub fn canceller(&self) -> Arc<StatementSlot> {
        Arc::clone(&self.slot)
    }

    /// Whether the worker currently holds a connection, statement or cursor
    pub fn holds_resources(&self) -> bool {
        self.connection.is_some() || !self.slot.is_empty() || self.cursor.is_some()
    }

    /// Teardown failures recorded by `close`, oldest first
    pub fn teardown_failures(&self) -> &[GatewayError] {
        &self.teardown_failures
    }

    /// Acquire a backend connection from the session's transaction.
    ///
    /// The provider is resolved on every call; nothing is cached between
    /// executions.
    pub async fn get_connection(
        &mut self,
        options: &AcquireOptions,
    ) -> Result<Box<dyn BackendConnection>> {
        let provider = self.session.transaction().connection_provider()?;
        let connection = provider.acquire(options).await?;
        self.provider = Some(provider);
        Ok(connection)
    }

    /// Apply the session's query timeout to `statement`.
    ///
    /// Milliseconds are rounded up to whole seconds; zero leaves the
    /// statement without a deadline.
    pub fn apply_deadline(&self, statement: &dyn PreparedStatement) {
        let timeout_ms = self.session.query_timeout_ms();
        if timeout_ms > 0 {
            statement.set_query_timeout(timeout_ms.div_ceil(1000));
        }
    }

    /// Run a statement that returns an affected-row count.
    ///
    /// The worker is closed afterwards whether or not execution succeeded.
    pub async fn execute_update(&mut self) -> Result<u64> {
        self.before_execute().await;
        let result = self.run_update().await;
        self.close().await;
        result
    }

    /// Run a statement that returns rows and leave the cursor open.
    ///
    /// On failure the worker is closed before the error is returned.
    pub async fn execute_query(&mut self) -> Result<()> {
        self.before_execute().await;
        match self.run_query().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// Column names of the open result
    pub fn columns(&self) -> &[String] {
        self.cursor.as_ref().map(|c| c.columns()).unwrap_or(&[])
    }

    /// Next row of the open result, `None` once exhausted
    pub async fn fetch_row(&mut self) -> Result<Option<Vec<Value>>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Err(GatewayError::Internal(format!(
                "No open result on shard '{}'",
                self.shard
            )));
        };
        cursor
            .next_row()
            .await
            .map_err(|e| wrap_exception("fetching row", &self.shard, &self.sql, &e))
    }

    /// Best-effort cancel of the running statement. No-op without one.
    pub async fn cancel(&self) {
        if self.slot.cancel().await {
            debug!(shard = %self.shard, "Cancel requested for shard statement");
        }
    }

    /// Release cursor, statement and connection, in that order.
    ///
    /// Idempotent. Failures are recorded in
    /// [`teardown_failures`](Self::teardown_failures) and logged, never
    /// returned.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }

        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close().await {
                self.record_teardown_failure("result cursor", &e);
            }
        }

        if let Some(statement) = self.slot.take() {
            if let Err(e) = statement.close().await {
                self.record_teardown_failure("statement", &e);
            }
        }

        if let Some(connection) = self.connection.take() {
            match self.provider.take() {
                Some(provider) => provider.release(&self.shard, connection),
                None => connection.discard(),
            }
        }

        self.closed = true;
        self.state = WorkerState::Closed;
        trace!(shard = %self.shard, "Shard worker closed");
    }

    /// Human-readable execution plan, e.g.
    /// `execute on shard1: SELECT * FROM t WHERE id=? params: {1: 5}`.
    pub fn explain(&self) -> String {
        let mut out = format!("execute on {}: {}", self.shard, self.sql);
        if !self.params.is_empty() {
            let rendered: Vec<String> = self
                .params
                .iter()
                .enumerate()
                .map(|(i, v)| format!("{}: {}", i + 1, v.sql_literal()))
                .collect();
            out.push_str(&format!(" params: {{{}}}", rendered.join(", ")));
        }
        out
    }

    async fn before_execute(&mut self) {
        self.close().await;
        self.closed = false;
        self.state = WorkerState::Created;
    }

    async fn prepare(&mut self) -> Result<Arc<dyn PreparedStatement>> {
        let options = AcquireOptions::for_shard(self.shard.clone());
        let connection = self.get_connection(&options).await?;
        let connection = self.connection.insert(connection);
        self.state = WorkerState::Connected;

        let statement = connection
            .prepare(&self.sql)
            .await
            .map_err(|e| wrap_exception("preparing statement", &self.shard, &self.sql, &e))?;
        self.slot.install(Arc::clone(&statement));
        self.apply_deadline(statement.as_ref());
        self.state = WorkerState::Executing;
        debug!(shard = %self.shard, params = self.params.len(), "Executing on shard");
        Ok(statement)
    }

    async fn run_update(&mut self) -> Result<u64> {
        let statement = self.prepare().await?;
        statement
            .execute_update(&self.params)
            .await
            .map_err(|e| wrap_exception("executing update", &self.shard, &self.sql, &e))
    }

    async fn run_query(&mut self) -> Result<()> {
        let statement = self.prepare().await?;
        let cursor = statement
            .execute_query(&self.params)
            .await
            .map_err(|e| wrap_exception("executing query", &self.shard, &self.sql, &e))?;
        self.cursor = Some(cursor);
        self.state = WorkerState::ResultOpen;
        Ok(())
    }

    fn record_teardown_failure(&mut self, resource: &'static str, cause: &BackendError) {
        warn!(
            shard = %self.shard,
            resource,
            error = %cause,
            "Failed to close shard resource"
        );
        self.teardown_failures.push(GatewayError::ResourceTeardown {
            resource,
            cause: cause.to_string(),
        });
    }
}

impl Drop for ShardWorker {
    fn drop(&mut self) {
        self.session.unregister_statement(self.slot.id());
        // Cursor and statement cannot be closed without awaiting; dropping
        // them is the best a synchronous path can do. The connection still
        // goes back to the provider.
        if let Some(connection) = self.connection.take() {
            debug!(shard = %self.shard, "Releasing connection of unclosed shard worker");
            self.cursor.take();
            self.slot.take();
            match self.provider.take() {
                Some(provider) => provider.release(&self.shard, connection),
                None => connection.discard(),
            }
        }
    }
}

/// Normalize a backend failure into [`GatewayError::Execution`].
pub fn wrap_exception(operation: &str, shard: &str, sql: &str, cause: &BackendError) -> GatewayError {
    GatewayError::Execution {
        operation: operation.to_string(),
        shard: shard.to_string(),
        sql: sql.to_string(),
        cause: cause.to_string(),
    }
}
