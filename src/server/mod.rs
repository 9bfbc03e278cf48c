//! Server module for ddal-gateway
//!
//! This module contains:
//! - TCP listener
//! - Per-connection loop
//! - Handshake state machine and authentication task
//! - Command dispatch for bound sessions
//! - Bounded worker pool
//! - Metrics collection

pub mod auth_task;
pub mod connection;
pub mod dispatch;
pub mod handshake;
pub mod listener;
pub mod metrics;
pub mod pool;

pub use auth_task::{AuthOutcome, AuthTask};
pub use connection::ClientConnection;
pub use dispatch::{CommandDispatcher, DispatchOutcome};
pub use handshake::{FrameDisposition, HandshakeMachine, HandshakeState, ProtocolSettings};
pub use listener::Listener;
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use pool::WorkerPool;

use std::sync::Arc;

use crate::auth::Privilege;
use crate::backend::EngineConnector;
use crate::config::Config;
use crate::error::Result;
use crate::routing::ShardRouter;
use crate::session::SessionRegistry;

/// Everything a connection task needs, shared by all connections.
pub struct GatewayContext {
    /// Loaded configuration
    pub config: Arc<Config>,
    /// Privilege store consulted during authentication
    pub privilege: Arc<dyn Privilege>,
    /// Opens the transaction of a new session
    pub engine: Arc<dyn EngineConnector>,
    /// Maps statements onto shards
    pub router: Arc<dyn ShardRouter>,
    /// Bound sessions by connection id
    pub registry: Arc<SessionRegistry>,
    /// Pool for authentication and execution tasks
    pub pool: WorkerPool,
    /// Counters
    pub metrics: Arc<GatewayMetrics>,
    /// Greeting values
    pub settings: ProtocolSettings,
}

impl GatewayContext {
    /// Assemble a context from configuration and collaborators.
    pub fn new(
        config: Arc<Config>,
        privilege: Arc<dyn Privilege>,
        engine: Arc<dyn EngineConnector>,
        router: Arc<dyn ShardRouter>,
    ) -> Result<Self> {
        let settings = ProtocolSettings::from_config(&config)?;
        let pool = WorkerPool::new(
            config.server.worker_pool.max_concurrent,
            config.server.worker_pool.max_queued,
        );
        Ok(Self {
            config,
            privilege,
            engine,
            router,
            registry: Arc::new(SessionRegistry::new()),
            pool,
            metrics: GatewayMetrics::shared(),
            settings,
        })
    }
}
