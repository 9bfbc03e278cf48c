//! Configuration module for ddal-gateway
//!
//! ```yaml
//! server:
//!   listen_port: 3307
//!   worker_pool:
//!     max_concurrent: 64
//!     max_queued: 1024
//!
//! users:
//!   - username: app
//!     password: "${APP_PASSWORD}"
//!     schemas: [orders]
//!
//! shards:
//!   shard1:
//!     host: "db1.example.com"
//!     port: 3306
//!     username: ddal
//!     password: "${SHARD1_PASSWORD}"
//!     database: orders
//!
//! routing:
//!   default_shard: shard1
//!
//! session:
//!   query_timeout_ms: 30000
//! ```

mod loader;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use types::*;
