//! TCP listener for incoming client connections

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use super::connection::ClientConnection;
use super::{GatewayContext, GatewayMetrics};
use crate::error::Result;
use crate::protocol::mysql::{build_err_packet, write_packet, ErrPacket, Packet, ER_CON_COUNT_ERROR};

/// TCP listener that accepts MySQL client connections
pub struct Listener {
    /// TCP listener
    listener: TcpListener,
    /// Shared gateway state
    ctx: Arc<GatewayContext>,
    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
    /// Connection limit semaphore (None = unlimited)
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(ctx: Arc<GatewayContext>, shutdown_rx: broadcast::Receiver<()>) -> Result<Self> {
        let server = &ctx.config.server;
        let addr = format!("{}:{}", server.listen_address, server.listen_port);

        let listener = TcpListener::bind(&addr).await?;

        // Create connection limit semaphore (0 = unlimited)
        let connection_semaphore = if server.max_connections > 0 {
            info!(
                "Listening on {} (max {} connections)",
                addr, server.max_connections
            );
            Some(Arc::new(Semaphore::new(server.max_connections)))
        } else {
            info!("Listening on {} (unlimited connections)", addr);
            None
        };

        Ok(Self {
            listener,
            ctx,
            shutdown_rx,
            connection_semaphore,
        })
    }

    /// Gateway counters
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => {
                            error!("Accept error: {}", e);
                            // Brief delay before retrying
                            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                        }
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        let stats = self.ctx.metrics.snapshot();
        info!(
            "Listener stopped. Total: {}, Active: {}, Rejected: {}",
            stats.connections_accepted, stats.connections_active, stats.connections_rejected
        );

        Ok(())
    }

    fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        // Try to acquire a connection permit if limiting is enabled
        let permit = match &self.connection_semaphore {
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(
                        "Connection from {} rejected: max connections ({}) reached",
                        addr, self.ctx.config.server.max_connections
                    );
                    self.ctx.metrics.connection_rejected();
                    tokio::spawn(refuse(stream, addr));
                    return;
                }
            },
            None => None,
        };

        debug!("Accepted connection from {}", addr);
        self.ctx.metrics.connection_accepted();

        let ctx = Arc::clone(&self.ctx);
        let shutdown_rx = self.shutdown_rx.resubscribe();
        tokio::spawn(async move {
            // Hold permit for connection lifetime
            let _permit = permit;
            let metrics = Arc::clone(&ctx.metrics);

            if let Err(e) = ClientConnection::new(stream, addr, ctx, shutdown_rx).handle().await {
                warn!("Connection from {} error: {}", addr, e);
            }
            metrics.connection_closed();
            debug!("Connection from {} closed", addr);
        });
    }
}

/// Tell a client over the connection limit why it is being dropped.
async fn refuse(mut stream: TcpStream, addr: SocketAddr) {
    let frame = ErrPacket::new(ER_CON_COUNT_ERROR, "Too many connections");
    if let Err(e) = write_packet(&mut stream, &Packet::new(0, build_err_packet(&frame))).await {
        debug!("Could not notify {} of rejection: {}", addr, e);
    }
}
