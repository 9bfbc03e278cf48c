//! Session-scoped transaction.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::ConnectionProvider;
use crate::error::{GatewayError, Result};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Engine transaction owned by one session.
///
/// Holds the shared [`ConnectionProvider`] that every worker of the session
/// acquires from. The provider itself is shared across sessions.
pub struct Transaction {
    id: u64,
    provider: Arc<dyn ConnectionProvider>,
    closed: AtomicBool,
}

impl Transaction {
    /// Open a transaction over `provider`
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            provider,
            closed: AtomicBool::new(false),
        }
    }

    /// Process-unique transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Provider for this transaction's backend connections
    pub fn connection_provider(&self) -> Result<Arc<dyn ConnectionProvider>> {
        if self.is_closed() {
            return Err(GatewayError::Internal(format!(
                "Transaction {} is closed",
                self.id
            )));
        }
        Ok(Arc::clone(&self.provider))
    }

    /// Close the transaction. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
