//! MySQL protocol implementation
//!
//! This module contains:
//! - Packet structures, capability flags and error codes
//! - Packet parser and builders (read/write)
//! - Challenge generation and `mysql_native_password` verification
//! - Character set table

pub mod auth;
pub mod charset;
pub mod packets;
pub mod parser;

pub use auth::*;
pub use packets::*;
pub use parser::*;
