//! Handshake state machine.
//!
//! One machine per transport connection. It owns the pending session from
//! the greeting until exactly one authentication task takes it, and the bound
//! session afterwards.
//!
//! ```text
//! New --greet--> Greeted --first frame--> AuthPending --bound--> Bound
//!  |                |                          |
//!  +----------------+--------------------------+--rejected--> Rejected
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::protocol::mysql::{
    build_err_packet, build_handshake, charset, Challenge, ErrPacket, Handshake, Packet,
    ER_HANDSHAKE_ERROR, GATEWAY_CAPABILITIES,
};
use crate::session::{PendingSession, Session};

static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-unique connection id
pub fn next_connection_id() -> u32 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Values advertised in every greeting
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    /// Server version string
    pub server_version: String,
    /// Character set index
    pub charset_index: u8,
}

impl ProtocolSettings {
    /// Resolve the greeting values from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let charset_index = charset::index_of(&config.protocol.charset).ok_or_else(|| {
            GatewayError::Config(format!("unknown charset '{}'", config.protocol.charset))
        })?;
        Ok(Self {
            server_version: config.protocol.server_version.clone(),
            charset_index,
        })
    }
}

/// Handshake progress of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet
    New,
    /// Greeting sent, waiting for the client's response
    Greeted,
    /// Authentication task running
    AuthPending,
    /// Session bound; frames go to statement execution
    Bound,
    /// Authentication failed; the caller closes the transport
    Rejected,
}

/// What the connection loop must do with an inbound frame
#[derive(Debug)]
pub enum FrameDisposition {
    /// Run the authentication task on this frame
    Authenticate {
        /// Detached pending session
        pending: PendingSession,
        /// The client's handshake response
        packet: Packet,
    },
    /// Hand the frame to the command dispatcher
    Forward(Packet),
    /// Answer with this error frame; the frame is not executed
    Reject(Packet),
}

/// Per-connection handshake state
pub struct HandshakeMachine {
    state: HandshakeState,
    settings: ProtocolSettings,
    remote_address: Option<SocketAddr>,
    local_address: Option<SocketAddr>,
    connection_id: Option<u32>,
    pending: Option<PendingSession>,
    session: Option<Arc<Session>>,
}

impl HandshakeMachine {
    /// Machine for a freshly accepted connection
    pub fn new(
        settings: ProtocolSettings,
        remote_address: Option<SocketAddr>,
        local_address: Option<SocketAddr>,
    ) -> Self {
        Self {
            state: HandshakeState::New,
            settings,
            remote_address,
            local_address,
            connection_id: None,
            pending: None,
            session: None,
        }
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Connection id, once greeted
    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    /// Bound session, if any
    pub fn session(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// Whether a session is bound
    pub fn is_bound(&self) -> bool {
        self.state == HandshakeState::Bound
    }

    /// Produce the greeting with a fresh connection id and challenge.
    pub fn greet(&mut self) -> Result<Packet> {
        self.greet_with(next_connection_id(), Challenge::generate())
    }

    /// Produce the greeting for a given connection id and challenge.
    pub fn greet_with(&mut self, connection_id: u32, challenge: Challenge) -> Result<Packet> {
        if self.state != HandshakeState::New {
            return Err(GatewayError::ProtocolViolation(format!(
                "greeting requested in state {:?}",
                self.state
            )));
        }
        let handshake = Handshake::new(
            self.settings.server_version.clone(),
            connection_id,
            &challenge,
            self.settings.charset_index,
        );
        self.pending = Some(PendingSession {
            connection_id,
            charset_index: self.settings.charset_index,
            server_capabilities: GATEWAY_CAPABILITIES,
            challenge,
            remote_address: self.remote_address,
            local_address: self.local_address,
        });
        self.connection_id = Some(connection_id);
        self.state = HandshakeState::Greeted;
        trace!(connection_id, "Greeting prepared");
        Ok(build_handshake(&handshake))
    }

    /// Decide what happens with an inbound frame.
    pub fn on_frame(&mut self, packet: Packet) -> FrameDisposition {
        match self.state {
            HandshakeState::Bound => FrameDisposition::Forward(packet),
            HandshakeState::Greeted => {
                self.state = HandshakeState::AuthPending;
                match self.pending.take() {
                    Some(pending) => FrameDisposition::Authenticate { pending, packet },
                    None => {
                        self.state = HandshakeState::Rejected;
                        FrameDisposition::Reject(handshake_error(&packet))
                    }
                }
            }
            HandshakeState::New | HandshakeState::AuthPending | HandshakeState::Rejected => {
                debug!(state = ?self.state, "Frame received before session was bound");
                FrameDisposition::Reject(handshake_error(&packet))
            }
        }
    }

    /// Authentication succeeded: bind `session`.
    pub fn bound(&mut self, session: Arc<Session>) -> Result<()> {
        if self.state != HandshakeState::AuthPending {
            return Err(GatewayError::ProtocolViolation(format!(
                "bind attempted in state {:?}",
                self.state
            )));
        }
        self.session = Some(session);
        self.state = HandshakeState::Bound;
        Ok(())
    }

    /// Authentication failed.
    pub fn rejected(&mut self) {
        self.pending = None;
        self.state = HandshakeState::Rejected;
    }

    /// Transport closed: drop pending state and close a bound session.
    ///
    /// Returns the session that was bound, if any.
    pub async fn deactivate(&mut self) -> Option<Arc<Session>> {
        self.pending = None;
        let session = self.session.take()?;
        session.close().await;
        Some(session)
    }
}

fn handshake_error(packet: &Packet) -> Packet {
    Packet::new(
        packet.sequence_id.wrapping_add(1),
        build_err_packet(&ErrPacket::new(ER_HANDSHAKE_ERROR, "Bad handshake")),
    )
}
