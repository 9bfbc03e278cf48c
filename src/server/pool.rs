//! Bounded worker pool for authentication and execution tasks.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{GatewayError, Result};

/// Runs at most `max_concurrent` tasks with at most `max_queued` more
/// waiting. Submissions beyond that are refused instead of spawned.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    /// Running plus queued
    admission: Arc<Semaphore>,
    /// Running
    running: Arc<Semaphore>,
    max_concurrent: usize,
    max_queued: usize,
}

impl WorkerPool {
    /// Create a pool. Both limits are clamped to at least one running slot.
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            admission: Arc::new(Semaphore::new(max_concurrent + max_queued)),
            running: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_queued,
        }
    }

    /// Submit `task`.
    ///
    /// Fails with [`GatewayError::Overloaded`] when the queue is full; the
    /// task is dropped without being polled.
    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let admitted = Arc::clone(&self.admission).try_acquire_owned().map_err(|_| {
            GatewayError::Overloaded(format!(
                "worker pool full ({} running, {} queued)",
                self.max_concurrent, self.max_queued
            ))
        })?;
        let running = Arc::clone(&self.running);
        Ok(tokio::spawn(async move {
            let _admitted = admitted;
            // The semaphore is never closed
            let _running = running.acquire_owned().await;
            task.await
        }))
    }

    /// Tasks currently admitted (running or queued)
    pub fn in_use(&self) -> usize {
        self.max_concurrent + self.max_queued - self.admission.available_permits()
    }
}
