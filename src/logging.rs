//! Logging macros that set target to "ddal_gateway" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "ddal_gateway::server::connection"), which makes filter directives
//! noisy. These macros keep every event from this crate under one target so
//! `RUST_LOG=ddal_gateway=debug` covers the whole gateway.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "ddal_gateway", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "ddal_gateway", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "ddal_gateway", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "ddal_gateway", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "ddal_gateway", $($arg)*) };
}
