//! Statement routing.
//!
//! Shard selection itself is pluggable through [`ShardRouter`]. The bundled
//! [`HintRouter`] only understands an explicit hint comment:
//!
//! ```sql
//! /*+ shards(shard1, shard2) */ SELECT count(*) FROM orders
//! ```
//!
//! Statements without a hint go to the default shard.

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::session::Session;
use crate::value::Value;

/// Whether a statement produces rows or an affected-row count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Returns a result set
    Query,
    /// Returns an affected-row count
    Update,
}

/// One shard-level execution
#[derive(Debug, Clone, PartialEq)]
pub struct ShardTarget {
    /// Shard name
    pub shard: String,
    /// Statement text sent to that shard
    pub sql: String,
    /// Bound parameters in order
    pub params: Vec<Value>,
}

/// Routing decision for one client statement
#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Kind shared by every target
    pub kind: StatementKind,
    /// Targets in merge order
    pub targets: Vec<ShardTarget>,
}

/// Maps a client statement onto shard targets.
pub trait ShardRouter: Send + Sync {
    /// Route `sql` for `session`.
    fn route(&self, session: &Session, sql: &str) -> Result<RoutePlan>;
}

const HINT_OPEN: &str = "/*+";
const HINT_CLOSE: &str = "*/";
const SHARDS_KEYWORD: &str = "shards";

/// Router driven by a leading `/*+ shards(...) */` comment.
#[derive(Debug, Clone)]
pub struct HintRouter {
    shards: Vec<String>,
    default_shard: Option<String>,
}

impl HintRouter {
    /// Router over `shards` with an optional fallback shard
    pub fn new(shards: Vec<String>, default_shard: Option<String>) -> Self {
        Self {
            shards,
            default_shard,
        }
    }

    /// Router for the shards and default in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.shards.keys().cloned().collect(),
            config.default_shard().map(str::to_string),
        )
    }

    /// Split a leading hint off `sql`.
    ///
    /// Returns the named shards (if a hint was present) and the statement
    /// with the hint removed.
    fn split_hint(sql: &str) -> Result<(Option<Vec<String>>, &str)> {
        let trimmed = sql.trim_start();
        let Some(rest) = trimmed.strip_prefix(HINT_OPEN) else {
            return Ok((None, trimmed));
        };
        let end = rest.find(HINT_CLOSE).ok_or_else(|| {
            GatewayError::ProtocolViolation("unterminated routing hint".into())
        })?;
        let hint = rest[..end].trim();
        let body = rest[end + HINT_CLOSE.len()..].trim_start();

        let Some(args) = hint
            .get(..SHARDS_KEYWORD.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(SHARDS_KEYWORD))
            .map(|_| hint[SHARDS_KEYWORD.len()..].trim_start())
            .and_then(|s| s.strip_prefix('('))
            .and_then(|s| s.strip_suffix(')'))
        else {
            // Not ours; leave optimizer hints for the backend
            return Ok((None, trimmed));
        };
        let names: Vec<String> = args
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Ok((Some(names), body))
    }

    /// Classify a statement by its first keyword
    pub fn classify(sql: &str) -> StatementKind {
        let mut rest = sql.trim_start();
        while let Some(comment) = rest.strip_prefix("/*") {
            match comment.find(HINT_CLOSE) {
                Some(end) => rest = comment[end + HINT_CLOSE.len()..].trim_start(),
                None => break,
            }
        }
        let keyword: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_uppercase();
        match keyword.as_str() {
            "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" => StatementKind::Query,
            _ => StatementKind::Update,
        }
    }
}

impl ShardRouter for HintRouter {
    fn route(&self, _session: &Session, sql: &str) -> Result<RoutePlan> {
        let (hinted, body) = Self::split_hint(sql)?;
        let shards = match hinted {
            Some(names) if names.is_empty() => {
                return Err(GatewayError::ProtocolViolation(
                    "routing hint names no shards".into(),
                ))
            }
            Some(names) => {
                if let Some(unknown) = names.iter().find(|n| !self.shards.contains(n)) {
                    return Err(GatewayError::ProtocolViolation(format!(
                        "unknown shard '{}' in routing hint",
                        unknown
                    )));
                }
                names
            }
            None => match &self.default_shard {
                Some(shard) => vec![shard.clone()],
                None => {
                    return Err(GatewayError::Config(
                        "no default shard configured".into(),
                    ))
                }
            },
        };

        let kind = Self::classify(body);
        trace!(?kind, shards = ?shards, "Routed statement");
        Ok(RoutePlan {
            kind,
            targets: shards
                .into_iter()
                .map(|shard| ShardTarget {
                    shard,
                    sql: body.to_string(),
                    params: Vec::new(),
                })
                .collect(),
        })
    }
}
