//! Session state for authenticated client connections.
//!
//! A connection starts with a [`PendingSession`] created when the greeting is
//! sent. Successful authentication promotes it to a bound [`Session`] that
//! owns the connection's [`Transaction`]. Bound sessions are published in the
//! process-wide [`SessionRegistry`] so `KILL` can reach them.

mod registry;
mod state;
mod transaction;

pub use registry::SessionRegistry;
pub use state::{PendingSession, Session, SessionAttachments};
pub use transaction::Transaction;
