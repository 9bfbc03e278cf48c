//! Engine connection: opens the transaction a new session runs in.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::session::Transaction;

use super::{AcquireOptions, ConnectionProvider};

/// Verified login handed to the engine after authentication
pub struct EngineLogin<'a> {
    /// Authenticated user
    pub user: &'a str,
    /// Credential material the client forwarded (its auth response)
    pub credential: &'a [u8],
    /// Schema selected at connect time
    pub schema: Option<&'a str>,
}

impl fmt::Debug for EngineLogin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineLogin")
            .field("user", &self.user)
            .field("credential", &"<redacted>")
            .field("schema", &self.schema)
            .finish()
    }
}

/// Opens a [`Transaction`] for a freshly authenticated session.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Establish the engine connection for `login`.
    ///
    /// Errors are collaborator faults; the authentication task reports them
    /// to the client as database access denied.
    async fn connect(&self, login: &EngineLogin<'_>) -> Result<Transaction>;
}

/// Default engine: every session shares one [`ConnectionProvider`].
///
/// With probing enabled each configured shard is borrowed and returned once
/// before the transaction is handed out, so an unreachable shard fails the
/// login instead of the first statement.
pub struct ShardEngine {
    provider: Arc<dyn ConnectionProvider>,
    shards: Vec<String>,
    probe: bool,
}

impl ShardEngine {
    /// Create an engine over `provider`
    pub fn new(provider: Arc<dyn ConnectionProvider>, shards: Vec<String>, probe: bool) -> Self {
        Self {
            provider,
            shards,
            probe,
        }
    }

    /// Create an engine for the shards and probing mode in `config`
    pub fn from_config(provider: Arc<dyn ConnectionProvider>, config: &Config) -> Self {
        Self::new(
            provider,
            config.shards.keys().cloned().collect(),
            config.engine.probe_on_connect,
        )
    }

    /// Shards this engine knows about
    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    async fn probe_shards(&self) -> Result<()> {
        for shard in &self.shards {
            let connection = self
                .provider
                .acquire(&AcquireOptions::for_shard(shard.clone()))
                .await
                .map_err(|e| GatewayError::BackendConnect(format!("shard '{}': {}", shard, e)))?;
            self.provider.release(shard, connection);
        }
        Ok(())
    }
}

#[async_trait]
impl EngineConnector for ShardEngine {
    async fn connect(&self, login: &EngineLogin<'_>) -> Result<Transaction> {
        if self.probe {
            self.probe_shards().await?;
        }
        let transaction = Transaction::new(Arc::clone(&self.provider));
        debug!(
            user = %login.user,
            schema = ?login.schema,
            transaction = transaction.id(),
            "Engine transaction opened"
        );
        Ok(transaction)
    }
}
