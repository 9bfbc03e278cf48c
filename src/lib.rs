//! ddal-gateway - MySQL-protocol gateway for a sharded database access layer
//!
//! This library provides the core functionality of the gateway:
//! - Speaks the MySQL client/server protocol to arbitrary client drivers
//! - Issues a per-connection challenge and authenticates clients against a
//!   pluggable privilege store before a session is bound
//! - Executes statements on backend shards through per-statement workers that
//!   borrow pooled connections from the session's transaction
//! - Runs authentication and execution on a bounded worker pool so network I/O
//!   never waits on credential checks or backend round-trips

#[macro_use]
mod logging;

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod routing;
pub mod server;
pub mod session;
pub mod value;

pub use auth::{Privilege, StaticPrivilege};
pub use backend::{
    AcquireOptions, BackendConnection, BackendError, ConnectionProvider, EngineConnector,
    MySqlShardProvider, PreparedStatement, ResultCursor, ShardEngine,
};
pub use config::Config;
pub use error::{GatewayError, Result};
pub use executor::{ShardWorker, WorkerState};
pub use routing::{HintRouter, RoutePlan, ShardRouter, ShardTarget, StatementKind};
pub use server::{GatewayContext, GatewayMetrics, Listener, MetricsSnapshot, WorkerPool};
pub use session::{PendingSession, Session, SessionAttachments, SessionRegistry, Transaction};
pub use value::Value;
