//! Authentication task.
//!
//! Runs on the worker pool with the client's handshake response and the
//! pending session detached from the handshake machine. Always produces
//! exactly one response frame.

use std::sync::Arc;

use crate::auth::Privilege;
use crate::backend::{EngineConnector, EngineLogin};
use crate::error::{GatewayError, Result};
use crate::protocol::mysql::{
    build_err_packet, build_ok_packet, parse_handshake_response41, ErrPacket,
    HandshakeResponse41, OkPacket, Packet, ER_ACCESS_DENIED_ERROR, ER_DBACCESS_DENIED_ERROR,
    ER_NOT_SUPPORTED_AUTH_MODE, MYSQL_NATIVE_PASSWORD,
};
use crate::session::{PendingSession, Session, Transaction};

use super::{GatewayContext, GatewayMetrics};

/// Result of one authentication attempt
#[derive(Debug)]
pub struct AuthOutcome {
    /// OK or ERR frame to write to the client
    pub response: Packet,
    /// Bound session on success
    pub session: Option<Arc<Session>>,
}

/// Verifies a handshake response and binds a session.
#[derive(Clone)]
pub struct AuthTask {
    privilege: Arc<dyn Privilege>,
    engine: Arc<dyn EngineConnector>,
    metrics: Arc<GatewayMetrics>,
    query_timeout_ms: u64,
}

impl AuthTask {
    /// Create a task over explicit collaborators
    pub fn new(
        privilege: Arc<dyn Privilege>,
        engine: Arc<dyn EngineConnector>,
        metrics: Arc<GatewayMetrics>,
        query_timeout_ms: u64,
    ) -> Self {
        Self {
            privilege,
            engine,
            metrics,
            query_timeout_ms,
        }
    }

    /// Create a task from the shared gateway context
    pub fn from_context(ctx: &GatewayContext) -> Self {
        Self::new(
            Arc::clone(&ctx.privilege),
            Arc::clone(&ctx.engine),
            Arc::clone(&ctx.metrics),
            ctx.config.session.query_timeout_ms,
        )
    }

    /// Authenticate `packet` against `pending`.
    ///
    /// The packet is consumed and dropped when the task ends, on every path.
    pub async fn run(self, pending: PendingSession, packet: Packet) -> AuthOutcome {
        let sequence_id = packet.sequence_id.wrapping_add(1);
        let connection_id = pending.connection_id;

        match self.authenticate(&pending, &packet.payload).await {
            Ok((response, transaction)) => {
                let session = Arc::new(Session::bind(
                    pending,
                    response,
                    transaction,
                    self.query_timeout_ms,
                ));
                self.metrics.auth_success();
                info!(
                    connection_id,
                    user = %session.user(),
                    schema = ?session.schema(),
                    "Session bound"
                );
                AuthOutcome {
                    response: Packet::new(sequence_id, build_ok_packet(&OkPacket::default())),
                    session: Some(session),
                }
            }
            Err(err) => {
                self.metrics.auth_failure();
                let frame = ErrPacket::new(err.mysql_error_code(), err.client_message());
                AuthOutcome {
                    response: Packet::new(sequence_id, build_err_packet(&frame)),
                    session: None,
                }
            }
        }
    }

    async fn authenticate(
        &self,
        pending: &PendingSession,
        payload: &[u8],
    ) -> Result<(HandshakeResponse41, Transaction)> {
        let connection_id = pending.connection_id;
        let response = parse_handshake_response41(payload).map_err(|e| {
            info!(connection_id, error = %e, "Malformed handshake response");
            GatewayError::AuthenticationDenied {
                code: ER_DBACCESS_DENIED_ERROR,
                message: e.to_string(),
            }
        })?;
        let user = response.username.as_str();
        let schema = response.schema();

        if !response.supports_protocol_41() {
            info!(connection_id, user = %user, "Client lacks protocol 4.1 support");
            return Err(unsupported_auth_mode());
        }
        if let Some(plugin) = response.auth_plugin_name.as_deref() {
            if !plugin.is_empty() && plugin != MYSQL_NATIVE_PASSWORD {
                info!(connection_id, user = %user, plugin = %plugin, "Unsupported auth plugin");
                return Err(unsupported_auth_mode());
            }
        }

        let host = pending
            .remote_address
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|| "localhost".to_string());

        let exists = self
            .privilege
            .user_exists(user)
            .await
            .map_err(|e| collaborator_fault(connection_id, user, schema, e))?;
        if !exists {
            info!(connection_id, user = %user, "Unknown user");
            return Err(access_denied(user, &host));
        }

        if let Some(schema) = schema {
            let allowed = self
                .privilege
                .schema_exists(user, schema)
                .await
                .map_err(|e| collaborator_fault(connection_id, user, Some(schema), e))?;
            if !allowed {
                info!(connection_id, user = %user, schema = %schema, "Schema access denied");
                let frame = ErrPacket::db_access_denied(user, schema);
                return Err(GatewayError::AuthenticationDenied {
                    code: ER_DBACCESS_DENIED_ERROR,
                    message: frame.error_message,
                });
            }
        }

        let challenge = pending.challenge.as_bytes();
        let password_ok = self
            .privilege
            .check_password(user, &response.auth_response, &challenge)
            .await
            .map_err(|e| collaborator_fault(connection_id, user, schema, e))?;
        if !password_ok {
            info!(connection_id, user = %user, "Password mismatch");
            return Err(access_denied(user, &host));
        }

        let login = EngineLogin {
            user,
            credential: &response.auth_response,
            schema,
        };
        let transaction = self
            .engine
            .connect(&login)
            .await
            .map_err(|e| collaborator_fault(connection_id, user, schema, e))?;

        Ok((response, transaction))
    }
}

fn unsupported_auth_mode() -> GatewayError {
    GatewayError::AuthenticationDenied {
        code: ER_NOT_SUPPORTED_AUTH_MODE,
        message: "Client does not support authentication protocol requested by server; \
                  consider upgrading MySQL client"
            .to_string(),
    }
}

fn access_denied(user: &str, host: &str) -> GatewayError {
    GatewayError::AuthenticationDenied {
        code: ER_ACCESS_DENIED_ERROR,
        message: ErrPacket::access_denied(user, host).error_message,
    }
}

/// Log a privilege-store or engine failure and turn it into a 1044 denial.
fn collaborator_fault(
    connection_id: u32,
    user: &str,
    schema: Option<&str>,
    err: GatewayError,
) -> GatewayError {
    error!(
        connection_id,
        user = %user,
        schema = ?schema,
        error = %err,
        "Authentication collaborator failed"
    );
    GatewayError::AuthenticationDenied {
        code: ER_DBACCESS_DENIED_ERROR,
        message: ErrPacket::db_access_denied(user, schema.unwrap_or("")).error_message,
    }
}
