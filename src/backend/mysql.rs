//! MySQL shard provider backed by `mysql_async` pools.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row};
use tokio::sync::Mutex;

use crate::config::{Config, ShardConfig};
use crate::error::{GatewayError, Result};
use crate::value::Value;

use super::{
    AcquireOptions, BackendConnection, BackendError, BackendResult, ConnectionProvider,
    PreparedStatement, ResultCursor,
};

struct ShardPool {
    pool: Pool,
    opts: Opts,
    connect_timeout: Duration,
}

/// [`ConnectionProvider`] with one `mysql_async::Pool` per shard.
pub struct MySqlShardProvider {
    shards: HashMap<String, ShardPool>,
}

impl MySqlShardProvider {
    /// Build pools for every shard in `config`.
    ///
    /// Pools connect lazily; no backend traffic happens here.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut shards = HashMap::with_capacity(config.shards.len());
        for (name, shard) in &config.shards {
            shards.insert(name.clone(), Self::build_pool(name, shard)?);
            debug!(
                shard = %name,
                host = %shard.host,
                port = shard.port,
                max_connections = shard.max_connections,
                "Shard pool configured"
            );
        }
        Ok(Self { shards })
    }

    fn build_pool(name: &str, shard: &ShardConfig) -> Result<ShardPool> {
        if shard.max_connections == 0 {
            return Err(GatewayError::Config(format!(
                "shard '{}': max_connections must be at least 1",
                name
            )));
        }
        let constraints = PoolConstraints::new(0, shard.max_connections).ok_or_else(|| {
            GatewayError::Config(format!("shard '{}': invalid pool constraints", name))
        })?;
        let opts: Opts = OptsBuilder::default()
            .ip_or_hostname(shard.host.clone())
            .tcp_port(shard.port)
            .user(Some(shard.username.clone()))
            .pass(Some(shard.password.clone()))
            .db_name(shard.database.clone())
            .pool_opts(PoolOpts::default().with_constraints(constraints))
            .into();
        Ok(ShardPool {
            pool: Pool::new(opts.clone()),
            opts,
            connect_timeout: Duration::from_secs(shard.connect_timeout_secs),
        })
    }

    /// Names of the configured shards
    pub fn shard_names(&self) -> Vec<String> {
        self.shards.keys().cloned().collect()
    }

    /// Close every pool. Connections still borrowed are closed on release.
    pub async fn disconnect_all(&self) {
        for (name, shard) in &self.shards {
            if let Err(e) = shard.pool.clone().disconnect().await {
                warn!(shard = %name, error = %e, "Error disconnecting shard pool");
            }
        }
    }
}

#[async_trait]
impl ConnectionProvider for MySqlShardProvider {
    async fn acquire(&self, options: &AcquireOptions) -> Result<Box<dyn BackendConnection>> {
        let shard = self.shards.get(&options.shard).ok_or_else(|| {
            GatewayError::ConnectionUnavailable {
                shard: options.shard.clone(),
                reason: "unknown shard".into(),
            }
        })?;
        let wait = options.timeout.unwrap_or(shard.connect_timeout);

        let conn = match tokio::time::timeout(wait, shard.pool.get_conn()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(GatewayError::ConnectionUnavailable {
                    shard: options.shard.clone(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(GatewayError::ConnectionUnavailable {
                    shard: options.shard.clone(),
                    reason: format!("timed out after {:?}", wait),
                })
            }
        };

        trace!(shard = %options.shard, thread_id = conn.id(), "Acquired shard connection");
        Ok(Box::new(MySqlConnection {
            shard: options.shard.clone(),
            thread_id: conn.id(),
            conn: Arc::new(Mutex::new(Some(conn))),
            opts: shard.opts.clone(),
            broken: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn release(&self, shard: &str, connection: Box<dyn BackendConnection>) {
        if connection.is_healthy() {
            // Dropping a pooled `Conn` hands it back to its pool
            drop(connection);
        } else {
            debug!(shard = %shard, "Discarding broken shard connection");
            connection.discard();
        }
    }
}

struct MySqlConnection {
    shard: String,
    thread_id: u32,
    conn: Arc<Mutex<Option<Conn>>>,
    opts: Opts,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl BackendConnection for MySqlConnection {
    fn shard(&self) -> &str {
        &self.shard
    }

    fn is_healthy(&self) -> bool {
        !self.broken.load(Ordering::Acquire)
    }

    async fn prepare(&mut self, sql: &str) -> BackendResult<Arc<dyn PreparedStatement>> {
        let statement = {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or_else(connection_gone)?;
            conn.prep(sql).await.map_err(backend_error)?
        };
        Ok(Arc::new(MySqlStatement {
            statement,
            conn: Arc::clone(&self.conn),
            thread_id: self.thread_id,
            opts: self.opts.clone(),
            timeout_secs: AtomicU64::new(0),
            broken: Arc::clone(&self.broken),
            gate: ExecutionGate::default(),
        }))
    }

    fn discard(self: Box<Self>) {
        let conn = Arc::clone(&self.conn);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        handle.spawn(async move {
            if let Some(conn) = conn.lock().await.take() {
                if let Err(e) = conn.disconnect().await {
                    trace!(error = %e, "Disconnect of discarded connection failed");
                }
            }
        });
    }
}

#[derive(Debug, Default)]
struct GateState {
    executing: bool,
    closed: bool,
}

/// Tracks whether a statement is running on its connection.
///
/// An interrupt only runs while an execution owns the connection, and an
/// execution cannot finish while an interrupt is in flight. The connection
/// therefore never returns to its pool with a `KILL` still pending.
#[derive(Debug, Default)]
struct ExecutionGate {
    state: Mutex<GateState>,
}

impl ExecutionGate {
    /// Run `work` as the statement's execution.
    async fn run<T, F>(&self, work: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        self.state.lock().await.executing = true;
        let out = work.await;
        self.finish().await;
        out
    }

    /// Mark the execution as over. Needed when `run` was dropped mid-way.
    async fn finish(&self) {
        self.state.lock().await.executing = false;
    }

    /// The statement will not run again; later interrupts are ignored.
    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        state.executing = false;
    }

    async fn is_active(&self) -> bool {
        let state = self.state.lock().await;
        state.executing && !state.closed
    }

    /// Run `interrupt` if an execution is in progress, holding the gate
    /// until it completes. Returns `None` when there was nothing to interrupt.
    async fn interrupt<T, F>(&self, interrupt: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        let state = self.state.lock().await;
        if !state.executing || state.closed {
            return None;
        }
        let out = interrupt.await;
        drop(state);
        Some(out)
    }
}

struct MySqlStatement {
    statement: mysql_async::Statement,
    conn: Arc<Mutex<Option<Conn>>>,
    thread_id: u32,
    opts: Opts,
    timeout_secs: AtomicU64,
    broken: Arc<AtomicBool>,
    gate: ExecutionGate,
}

impl MySqlStatement {
    /// Run `work` under the statement deadline, if one is set.
    async fn with_deadline<T, F>(&self, work: F) -> BackendResult<T>
    where
        T: Send,
        F: std::future::Future<Output = BackendResult<T>> + Send,
    {
        let secs = self.query_timeout();
        if secs == 0 {
            return work.await;
        }
        match tokio::time::timeout(Duration::from_secs(secs), work).await {
            Ok(result) => result,
            Err(_) => {
                // The connection is mid-result and cannot be reused
                self.broken.store(true, Ordering::Release);
                if let Err(e) = self.kill_query().await {
                    debug!(thread_id = self.thread_id, error = %e, "KILL QUERY after deadline failed");
                }
                self.gate.finish().await;
                Err(BackendError::with_code(
                    1317,
                    "70100",
                    format!("Query execution was interrupted, maximum statement execution time ({}s) exceeded", secs),
                ))
            }
        }
    }

    /// Send `KILL QUERY` over a side connection while this statement's
    /// execution still owns the backend thread.
    async fn kill_query(&self) -> BackendResult<()> {
        if !self.gate.is_active().await {
            trace!(thread_id = self.thread_id, "No execution in progress, nothing to kill");
            return Ok(());
        }
        let mut side = Conn::new(self.opts.clone()).await.map_err(backend_error)?;
        let kill = format!("KILL QUERY {}", self.thread_id);
        let result = self
            .gate
            .interrupt(async { side.query_drop(kill).await.map_err(backend_error) })
            .await
            .unwrap_or_else(|| {
                trace!(thread_id = self.thread_id, "Execution ended before KILL was sent");
                Ok(())
            });
        if let Err(e) = side.disconnect().await {
            trace!(error = %e, "Disconnect of cancel connection failed");
        }
        result
    }
}

#[async_trait]
impl PreparedStatement for MySqlStatement {
    fn set_query_timeout(&self, secs: u64) {
        self.timeout_secs.store(secs, Ordering::Relaxed);
    }

    fn query_timeout(&self) -> u64 {
        self.timeout_secs.load(Ordering::Relaxed)
    }

    async fn execute_update(&self, params: &[Value]) -> BackendResult<u64> {
        let params = to_params(params);
        self.with_deadline(async {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or_else(connection_gone)?;
            self.gate
                .run(async move {
                    conn.exec_drop(&self.statement, params)
                        .await
                        .map_err(backend_error)?;
                    Ok::<_, BackendError>(conn.affected_rows())
                })
                .await
        })
        .await
    }

    async fn execute_query(&self, params: &[Value]) -> BackendResult<Box<dyn ResultCursor>> {
        let params = to_params(params);
        self.with_deadline(async {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or_else(connection_gone)?;
            let (columns, rows) = self
                .gate
                .run(async move {
                    let mut result = conn
                        .exec_iter(&self.statement, params)
                        .await
                        .map_err(backend_error)?;
                    let columns: Vec<String> = result
                        .columns()
                        .map(|cols| cols.iter().map(|c| c.name_str().into_owned()).collect())
                        .unwrap_or_default();
                    let rows: Vec<Row> = result.collect().await.map_err(backend_error)?;
                    Ok::<_, BackendError>((columns, rows))
                })
                .await?;
            let rows: VecDeque<Vec<Value>> = rows
                .into_iter()
                .map(|row| row.unwrap().into_iter().map(from_mysql).collect())
                .collect();
            Ok(Box::new(BufferedCursor { columns, rows }) as Box<dyn ResultCursor>)
        })
        .await
    }

    async fn cancel(&self) -> BackendResult<()> {
        debug!(thread_id = self.thread_id, "Cancelling statement");
        self.kill_query().await
    }

    async fn close(&self) -> BackendResult<()> {
        self.gate.close().await;
        let mut guard = self.conn.lock().await;
        match guard.as_mut() {
            Some(conn) => conn
                .close(self.statement.clone())
                .await
                .map_err(backend_error),
            None => Ok(()),
        }
    }
}

/// Rows of a finished query, fetched eagerly
struct BufferedCursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
}

#[async_trait]
impl ResultCursor for BufferedCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_row(&mut self) -> BackendResult<Option<Vec<Value>>> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> BackendResult<()> {
        self.rows.clear();
        Ok(())
    }
}

fn connection_gone() -> BackendError {
    BackendError::new("connection already discarded")
}

fn backend_error(err: mysql_async::Error) -> BackendError {
    match err {
        mysql_async::Error::Server(server) => {
            BackendError::with_code(server.code, server.state, server.message)
        }
        other => BackendError::new(other.to_string()),
    }
}

fn to_params(values: &[Value]) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(to_mysql).collect())
    }
}

fn to_mysql(value: &Value) -> mysql_async::Value {
    use mysql_async::Value as M;
    match value {
        Value::Null => M::NULL,
        Value::Bool(b) => M::Int(i64::from(*b)),
        Value::Int(i) => M::Int(*i),
        Value::UInt(u) => M::UInt(*u),
        Value::Double(d) => M::Double(*d),
        Value::Decimal(s) | Value::String(s) => M::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => M::Bytes(b.clone()),
        Value::Date(d) => M::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Timestamp(ts) => M::Date(
            ts.year() as u16,
            ts.month() as u8,
            ts.day() as u8,
            ts.hour() as u8,
            ts.minute() as u8,
            ts.second() as u8,
            ts.nanosecond() / 1_000,
        ),
    }
}

fn from_mysql(value: mysql_async::Value) -> Value {
    use mysql_async::Value as M;
    match value {
        M::NULL => Value::Null,
        M::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        M::Int(i) => Value::Int(i),
        M::UInt(u) => Value::UInt(u),
        M::Float(f) => Value::Double(f64::from(f)),
        M::Double(d) => Value::Double(d),
        M::Date(y, m, d, h, min, s, us) => {
            let timestamp = NaiveDate::from_ymd_opt(i32::from(y), u32::from(m), u32::from(d))
                .and_then(|date| {
                    date.and_hms_micro_opt(u32::from(h), u32::from(min), u32::from(s), us)
                });
            match timestamp {
                Some(ts) => Value::Timestamp(ts),
                // Zero dates have no calendar representation
                None => Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    y, m, d, h, min, s
                )),
            }
        }
        M::Time(neg, days, h, m, s, us) => {
            let sign = if neg { "-" } else { "" };
            let hours = days * 24 + u32::from(h);
            if us > 0 {
                Value::String(format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, m, s, us))
            } else {
                Value::String(format!("{}{:02}:{:02}:{:02}", sign, hours, m, s))
            }
        }
    }
}
