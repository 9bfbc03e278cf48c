//! Configuration loader

use super::Config;
use crate::error::{GatewayError, Result};
use std::path::Path;

/// Load configuration from a YAML file
///
/// Also applies DDAL_GATEWAY_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
///
/// Also applies DDAL_GATEWAY_* env var overrides after loading.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml)?;
    resolve_config_env_vars(&mut config);
    apply_env_overrides(&mut config);
    config.validate().map_err(GatewayError::Config)?;
    Ok(config)
}

/// Apply DDAL_GATEWAY_* environment variable overrides to a config.
///
/// Supported env vars:
/// - `DDAL_GATEWAY_LISTEN_ADDRESS` - Override listen address
/// - `DDAL_GATEWAY_LISTEN_PORT` - Override listen port
/// - `DDAL_GATEWAY_LOG_LEVEL` - Override log level
/// - `DDAL_GATEWAY_CONNECT_TIMEOUT_SECS` - Override handshake read timeout
/// - `DDAL_GATEWAY_MAX_CONNECTIONS` - Override max connections
/// - `DDAL_GATEWAY_POOL_MAX_CONCURRENT` - Override running worker limit
/// - `DDAL_GATEWAY_POOL_MAX_QUEUED` - Override queued worker limit
/// - `DDAL_GATEWAY_QUERY_TIMEOUT_MS` - Override session query timeout
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("DDAL_GATEWAY_LISTEN_ADDRESS") {
        debug!("Overriding listen_address from DDAL_GATEWAY_LISTEN_ADDRESS");
        config.server.listen_address = val;
    }
    if let Some(port) = parsed_env::<u16>("DDAL_GATEWAY_LISTEN_PORT") {
        config.server.listen_port = port;
    }
    if let Ok(val) = std::env::var("DDAL_GATEWAY_LOG_LEVEL") {
        debug!("Overriding log level from DDAL_GATEWAY_LOG_LEVEL");
        config.logging.level = val;
    }
    if let Some(secs) = parsed_env::<u64>("DDAL_GATEWAY_CONNECT_TIMEOUT_SECS") {
        config.server.connect_timeout_secs = secs;
    }
    if let Some(max) = parsed_env::<usize>("DDAL_GATEWAY_MAX_CONNECTIONS") {
        config.server.max_connections = max;
    }
    if let Some(max) = parsed_env::<usize>("DDAL_GATEWAY_POOL_MAX_CONCURRENT") {
        config.server.worker_pool.max_concurrent = max;
    }
    if let Some(max) = parsed_env::<usize>("DDAL_GATEWAY_POOL_MAX_QUEUED") {
        config.server.worker_pool.max_queued = max;
    }
    if let Some(ms) = parsed_env::<u64>("DDAL_GATEWAY_QUERY_TIMEOUT_MS") {
        config.session.query_timeout_ms = ms;
    }
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => {
            debug!("Overriding config from {}", name);
            Some(value)
        }
        Err(_) => {
            warn!("Ignoring {}: '{}' is not a valid value", name, raw);
            None
        }
    }
}

/// Replace a whole-value secret reference with the environment variable it names.
///
/// `${NAME}` and `$NAME` are recognised; anything else, or a reference to an
/// unset variable, is returned unchanged.
fn resolve_env_var(value: &str) -> String {
    let name = match value.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(name) => name,
        None => match value.strip_prefix('$') {
            Some(name) if !name.is_empty() && !name.contains(' ') => name,
            _ => return value.to_string(),
        },
    };

    std::env::var(name).map_or_else(
        |_| {
            debug!("Secret reference {} is not set, keeping literal value", name);
            value.to_string()
        },
        |resolved| {
            debug!("Resolved secret reference {}", name);
            resolved
        },
    )
}

/// Resolve environment variables in all config fields that support it
fn resolve_config_env_vars(config: &mut Config) {
    for user in &mut config.users {
        user.username = resolve_env_var(&user.username);
        user.password = resolve_env_var(&user.password);
    }

    for shard in config.shards.values_mut() {
        shard.host = resolve_env_var(&shard.host);
        shard.username = resolve_env_var(&shard.username);
        shard.password = resolve_env_var(&shard.password);
        if let Some(ref db) = shard.database {
            shard.database = Some(resolve_env_var(db));
        }
    }
}
