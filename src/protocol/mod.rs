//! Protocol module for ddal-gateway
//!
//! Only the MySQL client/server protocol is spoken by the gateway.

pub mod mysql;
