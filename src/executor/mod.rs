//! Per-shard statement execution.
//!
//! A [`ShardWorker`] runs one statement on one shard for one session. It
//! borrows a backend connection from the session's transaction, executes
//! with bound parameters and the session deadline, and tears its resources
//! down in a fixed order (cursor, statement, connection) no matter how the
//! execution ended.

mod slot;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use slot::StatementSlot;
pub use worker::{wrap_exception, ShardWorker, WorkerState};
