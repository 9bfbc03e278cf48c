//! Error types for ddal-gateway

use thiserror::Error;

use crate::protocol::mysql::{
    ER_CON_COUNT_ERROR, ER_DBACCESS_DENIED_ERROR, ER_HANDSHAKE_ERROR, ER_QUERY_INTERRUPTED,
    ER_UNKNOWN_ERROR,
};

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed frame or unsupported capability; the connection is not bound
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Unknown user, bad password or schema access denied
    #[error("{message}")]
    AuthenticationDenied {
        /// Wire error code reported to the client
        code: u16,
        /// Client-visible message (never contains credentials)
        message: String,
    },

    /// Engine or backend unreachable while binding a session
    #[error("Backend connect failed: {0}")]
    BackendConnect(String),

    /// A backend statement failed; carries the full execution context
    #[error("Error while {operation} on shard '{shard}': {cause} (SQL: {sql})")]
    Execution {
        /// Operation that failed (e.g. "executing update")
        operation: String,
        /// Shard the statement was sent to
        shard: String,
        /// Original statement text
        sql: String,
        /// Backend's native error text
        cause: String,
    },

    /// Pool exhausted or backend down when acquiring a connection
    #[error("No connection available for shard '{shard}': {reason}")]
    ConnectionUnavailable {
        /// Shard that was requested
        shard: String,
        /// Why the provider could not hand out a connection
        reason: String,
    },

    /// Failure closing a cursor, statement or connection
    #[error("Failed to close {resource}: {cause}")]
    ResourceTeardown {
        /// Which resource failed to close
        resource: &'static str,
        /// Backend's error text
        cause: String,
    },

    /// A cancel request could not be delivered
    #[error("Cancel failed: {0}")]
    Cancellation(String),

    /// Worker pool queue is full
    #[error("Gateway overloaded: {0}")]
    Overloaded(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Task failure that is not attributable to the client or a backend
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// MySQL error code used when this error is reported in an ERR frame.
    pub fn mysql_error_code(&self) -> u16 {
        match self {
            Self::AuthenticationDenied { code, .. } => *code,
            Self::ProtocolViolation(_) => ER_HANDSHAKE_ERROR,
            // Reported as access denied so clients cannot probe backend topology
            Self::BackendConnect(_) => ER_DBACCESS_DENIED_ERROR,
            Self::Overloaded(_) => ER_CON_COUNT_ERROR,
            Self::Timeout(_) | Self::Cancellation(_) => ER_QUERY_INTERRUPTED,
            Self::Io(_)
            | Self::Config(_)
            | Self::Execution { .. }
            | Self::ConnectionUnavailable { .. }
            | Self::ResourceTeardown { .. }
            | Self::Internal(_) => ER_UNKNOWN_ERROR,
        }
    }

    /// Text placed in the ERR frame sent to the client.
    ///
    /// Local faults (I/O, configuration, internal) are not described to the
    /// client; they are logged instead.
    pub fn client_message(&self) -> String {
        match self {
            Self::Io(_) | Self::Config(_) | Self::Internal(_) => {
                "Internal gateway error".to_string()
            }
            Self::Overloaded(_) => "Too many connections".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error was raised by an authentication decision rather
    /// than a collaborator fault.
    pub fn is_denial(&self) -> bool {
        matches!(self, Self::AuthenticationDenied { .. })
    }
}

/// Result type alias for GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::Config(err.to_string())
    }
}
