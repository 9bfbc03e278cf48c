//! Per-connection loop: greeting, authentication, command dispatch.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::Instrument;

use super::auth_task::AuthTask;
use super::dispatch::{CommandDispatcher, DispatchOutcome};
use super::handshake::{FrameDisposition, HandshakeMachine, HandshakeState};
use super::GatewayContext;
use crate::error::{GatewayError, Result};
use crate::protocol::mysql::{
    build_err_packet, read_packet, read_packet_limited, write_packet, write_packets, ErrPacket,
    Packet,
};

/// Largest frame accepted before the client is authenticated
const MAX_HANDSHAKE_PAYLOAD: usize = 64 * 1024;

/// A client connection from accept to close
pub struct ClientConnection {
    /// Client TCP stream
    stream: TcpStream,
    /// Client address
    client_addr: SocketAddr,
    /// Shared gateway state
    ctx: Arc<GatewayContext>,
    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
}

impl ClientConnection {
    /// Wrap an accepted stream
    pub fn new(
        stream: TcpStream,
        client_addr: SocketAddr,
        ctx: Arc<GatewayContext>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            stream,
            client_addr,
            ctx,
            shutdown_rx,
        }
    }

    /// Handle the connection until the client leaves, authentication fails,
    /// the session is killed or the gateway shuts down.
    pub async fn handle(mut self) -> Result<()> {
        let mut machine = HandshakeMachine::new(
            self.ctx.settings.clone(),
            Some(self.client_addr),
            self.stream.local_addr().ok(),
        );
        let greeting = machine.greet()?;
        let span = tracing::info_span!(
            target: "ddal_gateway",
            "connection",
            client = %self.client_addr,
            connection_id = machine.connection_id().unwrap_or_default(),
        );

        let result = self
            .serve(&mut machine, greeting)
            .instrument(span.clone())
            .await;

        if let Some(session) = machine.deactivate().instrument(span.clone()).await {
            self.ctx.registry.unregister(session.connection_id());
        }

        match result {
            Err(e) if is_disconnect(&e) => {
                span.in_scope(|| debug!("Client disconnected"));
                Ok(())
            }
            other => other,
        }
    }

    async fn serve(&mut self, machine: &mut HandshakeMachine, greeting: Packet) -> Result<()> {
        debug!("New connection");
        write_packet(&mut self.stream, &greeting).await?;

        let dispatcher = CommandDispatcher::new(Arc::clone(&self.ctx));
        let connect_timeout = Duration::from_secs(self.ctx.config.server.connect_timeout_secs);

        loop {
            let packet = match machine.session().cloned() {
                Some(session) => {
                    tokio::select! {
                        read = read_packet(&mut self.stream) => read?,
                        _ = session.terminated() => {
                            info!(user = %session.user(), "Connection killed");
                            return Ok(());
                        }
                        _ = self.shutdown_rx.recv() => {
                            debug!("Shutdown signal received, closing connection");
                            return Ok(());
                        }
                    }
                }
                None => {
                    tokio::select! {
                        read = timeout(
                            connect_timeout,
                            read_packet_limited(&mut self.stream, MAX_HANDSHAKE_PAYLOAD),
                        ) => {
                            read.map_err(|_| {
                                GatewayError::Timeout("client did not send a handshake response".into())
                            })??
                        }
                        _ = self.shutdown_rx.recv() => {
                            debug!("Shutdown signal received during handshake");
                            return Ok(());
                        }
                    }
                }
            };

            match machine.on_frame(packet) {
                FrameDisposition::Authenticate { pending, packet } => {
                    if !self.authenticate(machine, pending, packet).await? {
                        return Ok(());
                    }
                }
                FrameDisposition::Forward(packet) => {
                    let Some(session) = machine.session().cloned() else {
                        return Err(GatewayError::Internal("bound state without a session".into()));
                    };
                    match dispatcher.dispatch(&session, packet).await {
                        DispatchOutcome::Reply(frames) => {
                            write_packets(&mut self.stream, &frames).await?
                        }
                        DispatchOutcome::Close => return Ok(()),
                    }
                }
                FrameDisposition::Reject(reply) => {
                    write_packet(&mut self.stream, &reply).await?;
                    if machine.state() == HandshakeState::Rejected {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run the authentication task on the pool and answer the client.
    /// Returns whether a session was bound.
    async fn authenticate(
        &mut self,
        machine: &mut HandshakeMachine,
        pending: crate::session::PendingSession,
        packet: Packet,
    ) -> Result<bool> {
        let reply_seq = packet.sequence_id.wrapping_add(1);
        let task = AuthTask::from_context(&self.ctx);

        let outcome = match self.ctx.pool.submit(task.run(pending, packet)) {
            Ok(handle) => handle.await,
            Err(e) => {
                self.ctx.metrics.pool_rejected();
                warn!("Authentication rejected: {}", e);
                self.reject(machine, reply_seq, &e).await?;
                return Ok(false);
            }
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Authentication task failed");
                let err = GatewayError::Internal(e.to_string());
                self.reject(machine, reply_seq, &err).await?;
                return Ok(false);
            }
        };

        write_packet(&mut self.stream, &outcome.response).await?;
        match outcome.session {
            Some(session) => {
                self.ctx.registry.register(&session);
                info!(user = %session.user(), "Session bound");
                machine.bound(session)?;
                Ok(true)
            }
            None => {
                machine.rejected();
                Ok(false)
            }
        }
    }

    async fn reject(
        &mut self,
        machine: &mut HandshakeMachine,
        sequence_id: u8,
        err: &GatewayError,
    ) -> Result<()> {
        machine.rejected();
        let frame = ErrPacket::new(err.mysql_error_code(), err.client_message());
        write_packet(&mut self.stream, &Packet::new(sequence_id, build_err_packet(&frame))).await
    }
}

/// Whether `err` is the client going away rather than a fault
fn is_disconnect(err: &GatewayError) -> bool {
    matches!(
        err,
        GatewayError::Io(e) if matches!(
            e.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
        )
    )
}
