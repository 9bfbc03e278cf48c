//! ddal-gateway - MySQL-protocol gateway for a sharded database access layer
//!
//! This binary:
//! - Accepts MySQL client connections and authenticates them against the
//!   configured users
//! - Binds each authenticated client to a session backed by pooled shard
//!   connections
//! - Routes statements to shards and relays their results

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use ddal_gateway::{
    config, ConnectionProvider, GatewayContext, HintRouter, Listener, MySqlShardProvider, Result,
    ShardEngine, StaticPrivilege,
};

#[derive(Parser)]
#[command(name = "ddal-gateway")]
#[command(version)]
#[command(about = "MySQL-protocol gateway for a sharded database access layer")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Override listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration (env overrides and validation included)
    let mut config = config::load_config(&cli.config)?;

    // Initialize logging
    // Priority: --verbose flag, then RUST_LOG env var, then configured level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting ddal-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", cli.config);

    // Apply CLI overrides
    if let Some(addr) = cli.listen_address {
        config.server.listen_address = addr;
    }
    if let Some(port) = cli.listen_port {
        config.server.listen_port = port;
    }

    let config = Arc::new(config);
    if config.users.is_empty() {
        warn!("No users configured; every login will be denied");
    }

    let provider = Arc::new(MySqlShardProvider::from_config(&config)?);
    let shard_provider: Arc<dyn ConnectionProvider> = provider.clone();
    let engine = ShardEngine::from_config(shard_provider, &config);
    let privilege = StaticPrivilege::from_config(&config);
    let router = HintRouter::from_config(&config);
    let ctx = GatewayContext::new(
        Arc::clone(&config),
        Arc::new(privilege),
        Arc::new(engine),
        Arc::new(router),
    )?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let listener = Listener::bind(Arc::new(ctx), shutdown_rx).await?;
    let metrics = listener.metrics();

    info!(
        "Gateway ready: listening on {}:{} with {} shard(s)",
        config.server.listen_address,
        config.server.listen_port,
        config.shards.len()
    );
    for (name, shard) in &config.shards {
        info!("  {} -> {}:{}", name, shard.host, shard.port);
    }

    // Spawn the listener task
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Listener error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Send shutdown signal; no receivers left is fine
    let _ = shutdown_tx.send(());

    if let Err(e) = listener_handle.await {
        error!("Listener task failed: {}", e);
    }
    provider.disconnect_all().await;

    let stats = metrics.snapshot();
    info!(
        "Shutdown complete. Connections: {}, authenticated: {}, statements: {} ok / {} failed",
        stats.connections_accepted,
        stats.auth_successes,
        stats.statements_executed,
        stats.statements_failed
    );

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
