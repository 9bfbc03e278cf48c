//! MySQL packet structures
//!
//! This module defines the wire protocol structures exchanged with clients.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use super::auth::Challenge;

/// Maximum payload size of a single frame (2^24 - 1)
pub const MAX_PAYLOAD_LENGTH: usize = 0xFF_FF_FF;

/// A framed MySQL packet: sequence id plus payload, without the 4-byte header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence ID (1 byte)
    pub sequence_id: u8,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a new packet
    pub fn new(sequence_id: u8, payload: Vec<u8>) -> Self {
        Self {
            sequence_id,
            payload,
        }
    }

    /// First payload byte (the command byte for client packets)
    pub fn command(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// Server greeting (HandshakeV10)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_v10.html>
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Sequence ID of the greeting frame (always 0)
    pub sequence_id: u8,
    /// Protocol version (always 10)
    pub protocol_version: u8,
    /// Server version string (null-terminated)
    pub server_version: String,
    /// Connection ID
    pub connection_id: u32,
    /// First 8 bytes of the challenge
    pub challenge_1: [u8; 8],
    /// Last 12 bytes of the challenge
    pub challenge_2: [u8; 12],
    /// Character set index
    pub character_set: u8,
    /// Status flags
    pub status_flags: u16,
    /// Capability flags (both words)
    pub capability_flags: u32,
    /// Length of auth plugin data (20 challenge bytes + NUL)
    pub auth_plugin_data_length: u8,
    /// Auth plugin name
    pub auth_plugin_name: String,
}

impl Handshake {
    /// Build the greeting for a new connection.
    pub fn new(
        server_version: impl Into<String>,
        connection_id: u32,
        challenge: &Challenge,
        character_set: u8,
    ) -> Self {
        Self {
            sequence_id: 0,
            protocol_version: 10,
            server_version: server_version.into(),
            connection_id,
            challenge_1: challenge.part_1,
            challenge_2: challenge.part_2,
            character_set,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            capability_flags: GATEWAY_CAPABILITIES,
            auth_plugin_data_length: 21,
            auth_plugin_name: MYSQL_NATIVE_PASSWORD.to_string(),
        }
    }

    /// The 20-byte challenge carried by this greeting
    pub fn challenge(&self) -> Challenge {
        Challenge::from_parts(self.challenge_1, self.challenge_2)
    }

    /// Capability flags lower word
    pub fn capability_flags_lower(&self) -> u16 {
        (self.capability_flags & 0xFFFF) as u16
    }

    /// Capability flags upper word
    pub fn capability_flags_upper(&self) -> u16 {
        (self.capability_flags >> 16) as u16
    }
}

/// MySQL Handshake Response 41 packet (client -> server)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_response.html>
#[derive(Debug, Clone)]
pub struct HandshakeResponse41 {
    /// Capability flags (4 bytes)
    pub capability_flags: u32,
    /// Max packet size
    pub max_packet_size: u32,
    /// Character set
    pub character_set: u8,
    /// Username (null-terminated)
    pub username: String,
    /// Auth response (challenge-hashed credential)
    pub auth_response: Vec<u8>,
    /// Database name (if CLIENT_CONNECT_WITH_DB)
    pub database: Option<String>,
    /// Auth plugin name (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_name: Option<String>,
    /// Connection attributes (if CLIENT_CONNECT_ATTRS)
    pub connect_attrs: Option<Vec<(String, String)>>,
}

impl Default for HandshakeResponse41 {
    fn default() -> Self {
        Self {
            capability_flags: 0,
            max_packet_size: MAX_PAYLOAD_LENGTH as u32,
            character_set: 0x21, // utf8_general_ci
            username: String::new(),
            auth_response: Vec::new(),
            database: None,
            auth_plugin_name: None,
            connect_attrs: None,
        }
    }
}

impl HandshakeResponse41 {
    /// Whether the client speaks the 4.1 protocol
    pub fn supports_protocol_41(&self) -> bool {
        self.capability_flags & CLIENT_PROTOCOL_41 != 0
    }

    /// Requested schema, treating an empty name as none
    pub fn schema(&self) -> Option<&str> {
        self.database.as_deref().filter(|db| !db.is_empty())
    }

    /// Get any connect attribute by key.
    pub fn connect_attr(&self, key: &str) -> Option<&str> {
        self.connect_attrs.as_ref().and_then(|attrs| {
            attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, value)| value.as_str())
        })
    }
}

/// MySQL OK Packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_ok_packet.html>
#[derive(Debug, Clone)]
pub struct OkPacket {
    /// Affected rows (length-encoded int)
    pub affected_rows: u64,
    /// Last insert ID (length-encoded int)
    pub last_insert_id: u64,
    /// Status flags
    pub status_flags: u16,
    /// Warnings
    pub warnings: u16,
    /// Human readable info
    pub info: String,
}

impl Default for OkPacket {
    fn default() -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }
}

impl OkPacket {
    /// OK reporting a number of affected rows
    pub fn with_affected_rows(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Self::default()
        }
    }
}

/// MySQL ERR Packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_err_packet.html>
#[derive(Debug, Clone)]
pub struct ErrPacket {
    /// Error code
    pub error_code: u16,
    /// SQL state (5 characters)
    pub sql_state: [u8; 5],
    /// Error message
    pub error_message: String,
}

impl ErrPacket {
    /// Create a new error packet with the given code and message.
    ///
    /// The SQL state is derived from the error code.
    pub fn new(error_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            sql_state: sql_state_for(error_code),
            error_message: error_message.into(),
        }
    }

    /// Access denied error (1045)
    pub fn access_denied(user: &str, host: &str) -> Self {
        Self::new(
            ER_ACCESS_DENIED_ERROR,
            format!(
                "Access denied for user '{}'@'{}' (using password: YES)",
                user, host
            ),
        )
    }

    /// Schema access denied error (1044)
    pub fn db_access_denied(user: &str, schema: &str) -> Self {
        Self::new(
            ER_DBACCESS_DENIED_ERROR,
            format!("Access denied for user '{}' to database '{}'", user, schema),
        )
    }

    /// SQL state as text
    pub fn sql_state_str(&self) -> &str {
        std::str::from_utf8(&self.sql_state).unwrap_or("HY000")
    }
}

/// SQL state reported alongside an error code
pub fn sql_state_for(error_code: u16) -> [u8; 5] {
    match error_code {
        ER_ACCESS_DENIED_ERROR => *b"28000",
        ER_DBACCESS_DENIED_ERROR => *b"42000",
        ER_NOT_SUPPORTED_AUTH_MODE | ER_CON_COUNT_ERROR => *b"08004",
        ER_HANDSHAKE_ERROR | ER_UNKNOWN_COM_ERROR => *b"08S01",
        ER_QUERY_INTERRUPTED => *b"70100",
        ER_BAD_DB_ERROR => *b"42000",
        _ => *b"HY000",
    }
}

/// Column definition sent in a text result set
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response_text_resultset_column_definition.html>
#[derive(Debug, Clone)]
pub struct ColumnDefinition41 {
    /// Schema the column belongs to
    pub schema: String,
    /// Virtual table name
    pub table: String,
    /// Column alias
    pub name: String,
    /// Character set index of the column
    pub character_set: u16,
    /// Maximum column length
    pub column_length: u32,
    /// Column type
    pub column_type: u8,
    /// Column flags
    pub flags: u16,
    /// Decimals
    pub decimals: u8,
}

impl ColumnDefinition41 {
    /// A VAR_STRING column as used by text result sets
    pub fn text(name: impl Into<String>, character_set: u16) -> Self {
        Self {
            schema: String::new(),
            table: String::new(),
            name: name.into(),
            character_set,
            column_length: 0xFFFF,
            column_type: MYSQL_TYPE_VAR_STRING,
            flags: 0,
            decimals: 0x1F,
        }
    }
}

// ============================================================================
// Capability Flags
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/group__group__cs__capabilities__flags.html
// ============================================================================

/// Client can handle long passwords
pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
/// Found instead of affected rows
pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;
/// Get all column flags
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
/// Can specify db on connect
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
/// Can use compression protocol
pub const CLIENT_COMPRESS: u32 = 0x0000_0020;
/// ODBC client
pub const CLIENT_ODBC: u32 = 0x0000_0040;
/// Can use LOAD DATA LOCAL
pub const CLIENT_LOCAL_FILES: u32 = 0x0000_0080;
/// Ignore spaces before '('
pub const CLIENT_IGNORE_SPACE: u32 = 0x0000_0100;
/// New 4.1 protocol
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
/// This is an interactive client
pub const CLIENT_INTERACTIVE: u32 = 0x0000_0400;
/// Switch to SSL after handshake
pub const CLIENT_SSL: u32 = 0x0000_0800;
/// Ignore sigpipes
pub const CLIENT_IGNORE_SIGPIPE: u32 = 0x0000_1000;
/// Client knows about transactions
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
/// New 4.1 authentication
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
/// Client supports plugin authentication
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
/// Client supports connection attributes
pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
/// Length of auth response can be > 255
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
/// Client no longer needs EOF packet
pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;

/// Capabilities advertised in every greeting.
///
/// Never includes compression, TLS or LOCAL INFILE.
pub const GATEWAY_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_ODBC
    | CLIENT_IGNORE_SPACE
    | CLIENT_PROTOCOL_41
    | CLIENT_INTERACTIVE
    | CLIENT_IGNORE_SIGPIPE
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_PLUGIN_AUTH;

/// The only authentication plugin the gateway accepts
pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";

// ============================================================================
// Status Flags
// ============================================================================

/// Server status: in transaction
pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
/// Server status: auto-commit enabled
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

// ============================================================================
// Column Types
// ============================================================================

/// VAR_STRING column type
pub const MYSQL_TYPE_VAR_STRING: u8 = 0xFD;

// ============================================================================
// MySQL Command Types
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/my__command_8h.html
// ============================================================================

/// Quit connection (COM_QUIT)
pub const COM_QUIT: u8 = 0x01;
/// Switch database (COM_INIT_DB)
pub const COM_INIT_DB: u8 = 0x02;
/// Execute SQL query (COM_QUERY)
pub const COM_QUERY: u8 = 0x03;
/// Ping server (COM_PING)
pub const COM_PING: u8 = 0x0e;

// ============================================================================
// Error Codes
// Reference: https://dev.mysql.com/doc/mysql-errors/8.0/en/server-error-reference.html
// ============================================================================

/// Too many connections
pub const ER_CON_COUNT_ERROR: u16 = 1040;
/// Bad handshake
pub const ER_HANDSHAKE_ERROR: u16 = 1043;
/// Access denied for user to database
pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
/// Access denied for user (wrong user or password)
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
/// Unknown command
pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
/// Unknown database
pub const ER_BAD_DB_ERROR: u16 = 1049;
/// Unknown thread id
pub const ER_NO_SUCH_THREAD: u16 = 1094;
/// Not owner of thread
pub const ER_KILL_DENIED_ERROR: u16 = 1095;
/// Unknown error
pub const ER_UNKNOWN_ERROR: u16 = 1105;
/// Client does not support authentication protocol requested by server
pub const ER_NOT_SUPPORTED_AUTH_MODE: u16 = 1251;
/// Query execution was interrupted
pub const ER_QUERY_INTERRUPTED: u16 = 1317;
