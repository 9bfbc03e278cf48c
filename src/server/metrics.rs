//! Gateway metrics.
//!
//! Atomic counters recorded on the hot path and read back through
//! [`GatewayMetrics::snapshot`].
//!
//! ## Connection Metrics
//! - `connections_accepted`: Total connections accepted
//! - `connections_active`: Currently open connections
//! - `connections_rejected`: Rejected by the connection limit
//!
//! ## Authentication Metrics
//! - `auth_successes` / `auth_failures`
//!
//! ## Execution Metrics
//! - `statements_executed` / `statements_failed`
//! - `statements_cancelled`: Statements signalled by `KILL`
//! - `teardown_failures`: Cursor or statement close errors
//! - `pool_rejections`: Tasks refused by the worker pool

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Atomic ordering used for metrics (Relaxed is sufficient for counters).
const METRIC_ORDERING: Ordering = Ordering::Relaxed;

/// Centralized metrics for the gateway.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // ========================================================================
    // Connection Metrics
    // ========================================================================
    /// Total connections accepted since startup
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections rejected due to max connections limit
    pub connections_rejected: AtomicU64,

    // ========================================================================
    // Authentication Metrics
    // ========================================================================
    /// Sessions bound
    pub auth_successes: AtomicU64,
    /// Handshakes answered with an error
    pub auth_failures: AtomicU64,

    // ========================================================================
    // Execution Metrics
    // ========================================================================
    /// Shard statements that completed
    pub statements_executed: AtomicU64,
    /// Shard statements that failed
    pub statements_failed: AtomicU64,
    /// Statements signalled by a cancel request
    pub statements_cancelled: AtomicU64,
    /// Resources that failed to close
    pub teardown_failures: AtomicU64,
    /// Submissions refused by the worker pool
    pub pool_rejections: AtomicU64,
}

impl GatewayMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared metrics instance.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record a new connection accepted.
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, METRIC_ORDERING);
        self.connections_active.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a connection closed.
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, METRIC_ORDERING);
    }

    /// Record a connection rejected due to limit.
    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a successful authentication.
    pub fn auth_success(&self) {
        self.auth_successes.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a failed authentication.
    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a completed shard statement.
    pub fn statement_executed(&self) {
        self.statements_executed.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a failed shard statement.
    pub fn statement_failed(&self) {
        self.statements_failed.fetch_add(1, METRIC_ORDERING);
    }

    /// Record statements signalled by a cancel.
    pub fn statements_cancelled(&self, count: u64) {
        self.statements_cancelled.fetch_add(count, METRIC_ORDERING);
    }

    /// Record teardown failures reported by a worker.
    pub fn teardown_failures(&self, count: u64) {
        self.teardown_failures.fetch_add(count, METRIC_ORDERING);
    }

    /// Record a worker pool rejection.
    pub fn pool_rejected(&self) {
        self.pool_rejections.fetch_add(1, METRIC_ORDERING);
    }

    /// Get a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(METRIC_ORDERING),
            connections_active: self.connections_active.load(METRIC_ORDERING),
            connections_rejected: self.connections_rejected.load(METRIC_ORDERING),
            auth_successes: self.auth_successes.load(METRIC_ORDERING),
            auth_failures: self.auth_failures.load(METRIC_ORDERING),
            statements_executed: self.statements_executed.load(METRIC_ORDERING),
            statements_failed: self.statements_failed.load(METRIC_ORDERING),
            statements_cancelled: self.statements_cancelled.load(METRIC_ORDERING),
            teardown_failures: self.teardown_failures.load(METRIC_ORDERING),
            pool_rejections: self.pool_rejections.load(METRIC_ORDERING),
        }
    }
}

/// Plain copy of [`GatewayMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub auth_successes: u64,
    pub auth_failures: u64,
    pub statements_executed: u64,
    pub statements_failed: u64,
    pub statements_cancelled: u64,
    pub teardown_failures: u64,
    pub pool_rejections: u64,
}
