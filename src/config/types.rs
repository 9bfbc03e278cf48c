//! Configuration types

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Root configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Protocol greeting settings
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Gateway users checked during authentication
    #[serde(default)]
    pub users: Vec<UserConfig>,

    /// Backend shards keyed by shard name
    #[serde(default)]
    pub shards: BTreeMap<String, ShardConfig>,

    /// Statement routing
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Per-session execution settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Engine connect behaviour
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Shard that receives statements without a routing hint.
    ///
    /// Falls back to the only configured shard when `routing.default_shard`
    /// is unset.
    pub fn default_shard(&self) -> Option<&str> {
        if let Some(name) = self.routing.default_shard.as_deref() {
            return Some(name);
        }
        if self.shards.len() == 1 {
            return self.shards.keys().next().map(String::as_str);
        }
        None
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for user in &self.users {
            if user.username.is_empty() {
                return Err("User entry with empty username".to_string());
            }
            if !seen.insert(user.username.as_str()) {
                return Err(format!("Duplicate user '{}'", user.username));
            }
        }

        if self.server.worker_pool.max_concurrent == 0 {
            return Err("server.worker_pool.max_concurrent must be greater than 0".to_string());
        }
        if self.server.worker_pool.max_queued == 0 {
            return Err("server.worker_pool.max_queued must be greater than 0".to_string());
        }

        for (name, shard) in &self.shards {
            if shard.max_connections == 0 {
                return Err(format!(
                    "shards.{}.max_connections must be greater than 0",
                    name
                ));
            }
        }

        match self.routing.default_shard.as_deref() {
            Some(name) if !self.shards.contains_key(name) => {
                return Err(format!(
                    "routing.default_shard '{}' is not a configured shard",
                    name
                ));
            }
            None if self.shards.len() > 1 => {
                return Err(
                    "routing.default_shard is required when more than one shard is configured"
                        .to_string(),
                );
            }
            _ => {}
        }

        if crate::protocol::mysql::charset::index_of(&self.protocol.charset).is_none() {
            return Err(format!("Unknown charset '{}'", self.protocol.charset));
        }

        Ok(())
    }
}

/// Server listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Port to listen on
    pub listen_port: u16,
    /// Seconds a client has to send its handshake response
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Maximum number of concurrent connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bounded pool for authentication and execution tasks
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerPoolConfig {
    /// Tasks allowed to run at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Tasks allowed to wait for a running slot before submissions are rejected
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_queued: default_max_queued(),
        }
    }
}

/// Greeting values advertised to clients
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Server version string sent in the greeting
    #[serde(default = "default_server_version")]
    pub server_version: String,
    /// Character set name sent in the greeting
    #[serde(default = "default_charset")]
    pub charset: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            server_version: default_server_version(),
            charset: default_charset(),
        }
    }
}

/// A gateway user
#[derive(Clone, Deserialize)]
pub struct UserConfig {
    /// Login name
    pub username: String,
    /// Plaintext password; hashed and zeroized when the privilege store is built
    #[serde(default)]
    pub password: String,
    /// Schemas this user may select (empty = all)
    #[serde(default)]
    pub schemas: Vec<String>,
}

impl fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("schemas", &self.schemas)
            .finish()
    }
}

/// A backend shard
#[derive(Clone, Deserialize)]
pub struct ShardConfig {
    /// Backend host
    pub host: String,
    /// Backend port
    #[serde(default = "default_shard_port")]
    pub port: u16,
    /// Backend login
    pub username: String,
    /// Backend password
    #[serde(default)]
    pub password: String,
    /// Database selected on every backend connection
    #[serde(default)]
    pub database: Option<String>,
    /// Upper bound of pooled connections for this shard
    #[serde(default = "default_shard_max_connections")]
    pub max_connections: usize,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Routing configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RoutingConfig {
    /// Shard used when a statement carries no shard hint
    #[serde(default)]
    pub default_shard: Option<String>,
}

/// Session execution settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionConfig {
    /// Statement deadline in milliseconds (0 = none)
    #[serde(default)]
    pub query_timeout_ms: u64,
}

/// Engine connect settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    /// Check that every shard is reachable before a session is bound
    #[serde(default)]
    pub probe_on_connect: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_concurrent() -> usize {
    64
}

fn default_max_queued() -> usize {
    1024
}

fn default_server_version() -> String {
    "5.7.0-ddal-gateway".to_string()
}

fn default_charset() -> String {
    "utf8".to_string()
}

fn default_shard_port() -> u16 {
    3306
}

fn default_shard_max_connections() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}
