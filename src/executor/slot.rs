//! Cancel handle shared between a worker and its session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::backend::PreparedStatement;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(1);

/// Holds the statement a worker is currently running, if any.
///
/// The session keeps a clone of every slot so `cancel` can reach statements
/// from outside the worker's task.
pub struct StatementSlot {
    id: u64,
    statement: Mutex<Option<Arc<dyn PreparedStatement>>>,
}

impl StatementSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            statement: Mutex::new(None),
        }
    }

    /// Process-unique slot id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether no statement is installed
    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    pub(crate) fn install(&self, statement: Arc<dyn PreparedStatement>) {
        *self.lock() = Some(statement);
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn PreparedStatement>> {
        self.lock().take()
    }

    /// Best-effort cancel of the installed statement.
    ///
    /// Returns whether a statement was signalled. Backend errors are logged
    /// and swallowed.
    pub async fn cancel(&self) -> bool {
        let Some(statement) = self.lock().clone() else {
            return false;
        };
        if let Err(e) = statement.cancel().await {
            debug!(slot = self.id, error = %e, "Statement cancel failed");
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<dyn PreparedStatement>>> {
        self.statement.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StatementSlot {
    fn default() -> Self {
        Self::new()
    }
}
