//! Backend shard access.
//!
//! The gateway reaches shards through a small set of object-safe traits so
//! the execution worker never depends on a concrete driver:
//!
//! - [`ConnectionProvider`] - per-shard pool owned by a session's transaction
//! - [`BackendConnection`] - one borrowed connection
//! - [`PreparedStatement`] - a statement prepared on that connection
//! - [`ResultCursor`] - rows produced by a query
//!
//! [`MySqlShardProvider`] implements them over `mysql_async`, and
//! [`ShardEngine`] opens transactions over a shared provider.

mod engine;
mod mysql;

pub use engine::{EngineConnector, EngineLogin, ShardEngine};
pub use mysql::MySqlShardProvider;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::value::Value;

/// Error reported by a backend driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// Vendor error code, when the backend sent one
    pub code: Option<u16>,
    /// SQL state, when the backend sent one
    pub sql_state: Option<String>,
    /// Native error text
    pub message: String,
}

impl BackendError {
    /// Error without a vendor code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            sql_state: None,
            message: message.into(),
        }
    }

    /// Error carrying a vendor code and SQL state
    pub fn with_code(code: u16, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            sql_state: Some(sql_state.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.sql_state) {
            (Some(code), Some(state)) => write!(f, "ERROR {} ({}): {}", code, state, self.message),
            (Some(code), None) => write!(f, "ERROR {}: {}", code, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}

/// Result type for backend driver calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// What a worker asks the provider for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Shard to connect to
    pub shard: String,
    /// How long to wait for a pooled connection; `None` uses the provider default
    pub timeout: Option<Duration>,
}

impl AcquireOptions {
    /// Options for `shard` with the provider's default timeout
    pub fn for_shard(shard: impl Into<String>) -> Self {
        Self {
            shard: shard.into(),
            timeout: None,
        }
    }
}

/// Per-shard connection factory shared by every session.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Borrow a connection to `options.shard`.
    ///
    /// Fails with `GatewayError::ConnectionUnavailable` when the pool is
    /// exhausted or the backend is down.
    async fn acquire(&self, options: &AcquireOptions) -> Result<Box<dyn BackendConnection>>;

    /// Return a connection previously acquired for `shard`. Never fails.
    fn release(&self, shard: &str, connection: Box<dyn BackendConnection>);
}

/// One borrowed backend connection
#[async_trait]
pub trait BackendConnection: Send {
    /// Shard this connection belongs to
    fn shard(&self) -> &str;

    /// Whether the connection can be reused after release
    fn is_healthy(&self) -> bool;

    /// Prepare `sql` on this connection
    async fn prepare(&mut self, sql: &str) -> BackendResult<Arc<dyn PreparedStatement>>;

    /// Drop a connection that must not go back to the pool
    fn discard(self: Box<Self>) {}
}

/// A prepared statement.
///
/// Methods take `&self` so a statement can be cancelled from another task
/// while it executes.
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Apply a deadline in whole seconds; 0 clears it
    fn set_query_timeout(&self, secs: u64);

    /// Deadline currently applied, in seconds
    fn query_timeout(&self) -> u64;

    /// Run a statement that returns an affected-row count
    async fn execute_update(&self, params: &[Value]) -> BackendResult<u64>;

    /// Run a statement that returns rows
    async fn execute_query(&self, params: &[Value]) -> BackendResult<Box<dyn ResultCursor>>;

    /// Ask the backend to stop the running statement
    async fn cancel(&self) -> BackendResult<()>;

    /// Release the statement on the backend
    async fn close(&self) -> BackendResult<()>;
}

/// Rows produced by a query
#[async_trait]
pub trait ResultCursor: Send {
    /// Column names in result order
    fn columns(&self) -> &[String];

    /// Next row, or `None` when exhausted
    async fn next_row(&mut self) -> BackendResult<Option<Vec<Value>>>;

    /// Release the cursor
    async fn close(&mut self) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::with_code(1146, "42S02", "Table 'db.t' doesn't exist");
        assert_eq!(err.to_string(), "ERROR 1146 (42S02): Table 'db.t' doesn't exist");
        assert_eq!(BackendError::new("socket closed").to_string(), "socket closed");
    }

    #[test]
    fn test_acquire_options_for_shard() {
        let options = AcquireOptions::for_shard("shard1");
        assert_eq!(options.shard, "shard1");
        assert!(options.timeout.is_none());
    }
}
