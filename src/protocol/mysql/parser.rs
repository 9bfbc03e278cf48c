//! MySQL packet parser
//!
//! This module provides functions to read and write MySQL protocol packets.
//! Every parse path is bounds-checked: client payloads are untrusted.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

use super::packets::*;
use crate::error::{GatewayError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ============================================================================
// Packet Reading
// ============================================================================

/// Read a complete MySQL packet from a stream
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet> {
    read_packet_limited(reader, MAX_PAYLOAD_LENGTH).await
}

/// Read one packet whose payload may not exceed `max_payload` bytes.
///
/// The size is checked before the payload buffer is allocated. A full
/// `0xFFFFFF` frame announces a continuation frame; split payloads are
/// not reassembled and are rejected.
pub async fn read_packet_limited<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Packet> {
    // 3 bytes length (little-endian) + 1 byte sequence ID
    let mut header_buf = [0u8; 4];
    reader.read_exact(&mut header_buf).await?;

    let payload_length =
        u32::from_le_bytes([header_buf[0], header_buf[1], header_buf[2], 0]) as usize;
    let sequence_id = header_buf[3];

    if payload_length >= MAX_PAYLOAD_LENGTH {
        return Err(GatewayError::ProtocolViolation(
            "Payloads split across several frames are not supported".into(),
        ));
    }
    if payload_length > max_payload {
        return Err(GatewayError::ProtocolViolation(format!(
            "Frame of {} bytes exceeds the {} byte limit",
            payload_length, max_payload
        )));
    }

    let mut payload = vec![0u8; payload_length];
    reader.read_exact(&mut payload).await?;

    Ok(Packet::new(sequence_id, payload))
}

/// Write a MySQL packet to a stream
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, packet: &Packet) -> Result<()> {
    let len = packet.payload.len();
    if len >= MAX_PAYLOAD_LENGTH {
        return Err(GatewayError::ProtocolViolation(format!(
            "Payload of {} bytes exceeds a single frame",
            len
        )));
    }
    let header = [
        (len & 0xFF) as u8,
        ((len >> 8) & 0xFF) as u8,
        ((len >> 16) & 0xFF) as u8,
        packet.sequence_id,
    ];

    writer.write_all(&header).await?;
    writer.write_all(&packet.payload).await?;
    writer.flush().await?;

    Ok(())
}

/// Write several packets and flush once
pub async fn write_packets<W: AsyncWrite + Unpin>(writer: &mut W, packets: &[Packet]) -> Result<()> {
    let mut buf = Vec::with_capacity(packets.iter().map(|p| p.payload.len() + 4).sum());
    for packet in packets {
        let len = packet.payload.len();
        if len >= MAX_PAYLOAD_LENGTH {
            return Err(GatewayError::ProtocolViolation(format!(
                "Payload of {} bytes exceeds a single frame",
                len
            )));
        }
        buf.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
        buf.push(packet.sequence_id);
        buf.extend_from_slice(&packet.payload);
    }
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Bounds-checked payload reader
// ============================================================================

/// Cursor over a packet payload that fails instead of panicking on short input
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    /// Start reading at the beginning of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the payload is fully consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read exactly `n` bytes
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(GatewayError::ProtocolViolation(format!(
                "Packet truncated: needed {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Skip `n` bytes
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    /// Read one byte
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    /// Read a little-endian u16
    pub fn u16_le(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u32
    pub fn u32_le(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a null-terminated string
    pub fn null_terminated_string(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let null_pos = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| GatewayError::ProtocolViolation("Missing null terminator".into()))?;
        let s = String::from_utf8_lossy(&rest[..null_pos]).to_string();
        self.pos += null_pos + 1;
        Ok(s)
    }

    /// Read a length-encoded integer
    pub fn length_encoded_int(&mut self) -> Result<u64> {
        match self.u8()? {
            0xFC => Ok(self.u16_le()? as u64),
            0xFD => {
                let b = self.bytes(3)?;
                Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64)
            }
            0xFE => {
                let b = self.bytes(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Ok(u64::from_le_bytes(raw))
            }
            0xFB | 0xFF => Err(GatewayError::ProtocolViolation(
                "Invalid length-encoded int marker".into(),
            )),
            n => Ok(n as u64),
        }
    }

    /// Read a length-encoded byte string
    pub fn length_encoded_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.length_encoded_int()?;
        let len = usize::try_from(len)
            .map_err(|_| GatewayError::ProtocolViolation("Length out of range".into()))?;
        self.bytes(len)
    }

    /// Everything left in the payload
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse a HandshakeResponse41 packet from payload bytes
pub fn parse_handshake_response41(payload: &[u8]) -> Result<HandshakeResponse41> {
    let mut r = PayloadReader::new(payload);

    let capability_flags = r.u32_le()?;
    let max_packet_size = r.u32_le()?;
    let character_set = r.u8()?;
    r.skip(23)?;
    let username = r.null_terminated_string()?;

    let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        r.length_encoded_bytes()?.to_vec()
    } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
        let len = r.u8()? as usize;
        r.bytes(len)?.to_vec()
    } else {
        r.null_terminated_string()?.into_bytes()
    };

    let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && !r.is_empty() {
        Some(r.null_terminated_string()?)
    } else {
        None
    };

    let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !r.is_empty() {
        Some(r.null_terminated_string()?)
    } else {
        None
    };

    let connect_attrs = if capability_flags & CLIENT_CONNECT_ATTRS != 0 && !r.is_empty() {
        match parse_connect_attrs(&mut r) {
            Ok(attrs) => {
                debug!(attrs_count = attrs.len(), "Parsed MySQL connect_attrs");
                Some(attrs)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse MySQL connect_attrs");
                None
            }
        }
    } else {
        None
    };

    Ok(HandshakeResponse41 {
        capability_flags,
        max_packet_size,
        character_set,
        username,
        auth_response,
        database,
        auth_plugin_name,
        connect_attrs,
    })
}

/// Parse connection attributes: a length-encoded total followed by
/// length-encoded key/value pairs.
fn parse_connect_attrs(r: &mut PayloadReader<'_>) -> Result<Vec<(String, String)>> {
    let block = r.length_encoded_bytes()?;
    let mut inner = PayloadReader::new(block);
    let mut attrs = Vec::new();
    while !inner.is_empty() {
        let key = String::from_utf8_lossy(inner.length_encoded_bytes()?).to_string();
        let value = String::from_utf8_lossy(inner.length_encoded_bytes()?).to_string();
        attrs.push((key, value));
    }
    Ok(attrs)
}

/// Parse a server greeting. Used by clients of the gateway.
pub fn parse_handshake(packet: &Packet) -> Result<Handshake> {
    let mut r = PayloadReader::new(&packet.payload);

    let protocol_version = r.u8()?;
    if protocol_version != 10 {
        return Err(GatewayError::ProtocolViolation(format!(
            "Unsupported protocol version: {}",
            protocol_version
        )));
    }
    let server_version = r.null_terminated_string()?;
    let connection_id = r.u32_le()?;
    let mut challenge_1 = [0u8; 8];
    challenge_1.copy_from_slice(r.bytes(8)?);
    r.skip(1)?;
    let caps_lower = r.u16_le()?;
    let character_set = r.u8()?;
    let status_flags = r.u16_le()?;
    let caps_upper = r.u16_le()?;
    let auth_plugin_data_length = r.u8()?;
    r.skip(10)?;
    let mut challenge_2 = [0u8; 12];
    challenge_2.copy_from_slice(r.bytes(12)?);
    r.skip(1)?;
    let auth_plugin_name = r.null_terminated_string()?;

    Ok(Handshake {
        sequence_id: packet.sequence_id,
        protocol_version,
        server_version,
        connection_id,
        challenge_1,
        challenge_2,
        character_set,
        status_flags,
        capability_flags: (caps_upper as u32) << 16 | caps_lower as u32,
        auth_plugin_data_length,
        auth_plugin_name,
    })
}

/// Parse an OK packet from payload bytes
pub fn parse_ok_packet(payload: &[u8]) -> Result<OkPacket> {
    let mut r = PayloadReader::new(payload);
    let header = r.u8()?;
    if header != 0x00 {
        return Err(GatewayError::ProtocolViolation(format!(
            "Invalid OK packet header: 0x{:02X}",
            header
        )));
    }
    let affected_rows = r.length_encoded_int()?;
    let last_insert_id = r.length_encoded_int()?;
    let status_flags = r.u16_le()?;
    let warnings = r.u16_le()?;
    let info = String::from_utf8_lossy(r.rest()).to_string();

    Ok(OkPacket {
        affected_rows,
        last_insert_id,
        status_flags,
        warnings,
        info,
    })
}

/// Parse an ERR packet from payload bytes
pub fn parse_err_packet(payload: &[u8]) -> Result<ErrPacket> {
    let mut r = PayloadReader::new(payload);
    let header = r.u8()?;
    if header != 0xFF {
        return Err(GatewayError::ProtocolViolation(format!(
            "Invalid ERR packet header: 0x{:02X}",
            header
        )));
    }
    let error_code = r.u16_le()?;
    let mut sql_state = *b"HY000";
    if r.remaining() >= 6 && payload.get(3) == Some(&b'#') {
        r.skip(1)?;
        sql_state.copy_from_slice(r.bytes(5)?);
    }
    let error_message = String::from_utf8_lossy(r.rest()).to_string();

    Ok(ErrPacket {
        error_code,
        sql_state,
        error_message,
    })
}

/// Check if a packet is an OK packet
pub fn is_ok_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0x00)
}

/// Check if a packet is an EOF packet
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&0xFE) && payload.len() < 9
}

// ============================================================================
// Building
// ============================================================================

/// Build the greeting frame
pub fn build_handshake(handshake: &Handshake) -> Packet {
    let mut payload = Vec::with_capacity(128);

    payload.push(handshake.protocol_version);
    payload.extend_from_slice(handshake.server_version.as_bytes());
    payload.push(0);
    payload.extend_from_slice(&handshake.connection_id.to_le_bytes());
    payload.extend_from_slice(&handshake.challenge_1);
    // Filler
    payload.push(0);
    payload.extend_from_slice(&handshake.capability_flags_lower().to_le_bytes());
    payload.push(handshake.character_set);
    payload.extend_from_slice(&handshake.status_flags.to_le_bytes());
    payload.extend_from_slice(&handshake.capability_flags_upper().to_le_bytes());
    payload.push(handshake.auth_plugin_data_length);
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(&handshake.challenge_2);
    payload.push(0);
    payload.extend_from_slice(handshake.auth_plugin_name.as_bytes());
    payload.push(0);

    Packet::new(handshake.sequence_id, payload)
}

/// Build a HandshakeResponse41 packet payload
pub fn build_handshake_response41(response: &HandshakeResponse41) -> Vec<u8> {
    let mut payload = Vec::with_capacity(128);

    payload.extend_from_slice(&response.capability_flags.to_le_bytes());
    payload.extend_from_slice(&response.max_packet_size.to_le_bytes());
    payload.push(response.character_set);
    payload.extend_from_slice(&[0u8; 23]);
    payload.extend_from_slice(response.username.as_bytes());
    payload.push(0);

    if response.capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        write_length_encoded_bytes(&mut payload, &response.auth_response);
    } else if response.capability_flags & CLIENT_SECURE_CONNECTION != 0 {
        payload.push(response.auth_response.len() as u8);
        payload.extend_from_slice(&response.auth_response);
    } else {
        payload.extend_from_slice(&response.auth_response);
        payload.push(0);
    }

    // The flag promises a schema field, so an absent schema is sent empty
    if response.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
        if let Some(ref db) = response.database {
            payload.extend_from_slice(db.as_bytes());
        }
        payload.push(0);
    }

    if response.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
        if let Some(ref name) = response.auth_plugin_name {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
        }
    }

    if response.capability_flags & CLIENT_CONNECT_ATTRS != 0 {
        if let Some(ref attrs) = response.connect_attrs {
            let mut block = Vec::new();
            for (key, value) in attrs {
                write_length_encoded_bytes(&mut block, key.as_bytes());
                write_length_encoded_bytes(&mut block, value.as_bytes());
            }
            write_length_encoded_bytes(&mut payload, &block);
        }
    }

    payload
}

/// Build an OK packet payload
pub fn build_ok_packet(ok: &OkPacket) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + ok.info.len());
    payload.push(0x00);
    write_length_encoded_int(&mut payload, ok.affected_rows);
    write_length_encoded_int(&mut payload, ok.last_insert_id);
    payload.extend_from_slice(&ok.status_flags.to_le_bytes());
    payload.extend_from_slice(&ok.warnings.to_le_bytes());
    payload.extend_from_slice(ok.info.as_bytes());
    payload
}

/// Build an ERR packet payload
pub fn build_err_packet(err: &ErrPacket) -> Vec<u8> {
    let mut payload = Vec::with_capacity(9 + err.error_message.len());
    payload.push(0xFF);
    payload.extend_from_slice(&err.error_code.to_le_bytes());
    payload.push(b'#');
    payload.extend_from_slice(&err.sql_state);
    payload.extend_from_slice(err.error_message.as_bytes());
    payload
}

/// Build an EOF packet payload
pub fn build_eof_packet(status_flags: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(5);
    payload.push(0xFE);
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.extend_from_slice(&status_flags.to_le_bytes());
    payload
}

/// Build a ColumnDefinition41 payload
pub fn build_column_definition(column: &ColumnDefinition41) -> Vec<u8> {
    let mut payload = Vec::with_capacity(32 + column.name.len() * 2);
    write_length_encoded_bytes(&mut payload, b"def");
    write_length_encoded_bytes(&mut payload, column.schema.as_bytes());
    write_length_encoded_bytes(&mut payload, column.table.as_bytes());
    write_length_encoded_bytes(&mut payload, column.table.as_bytes());
    write_length_encoded_bytes(&mut payload, column.name.as_bytes());
    write_length_encoded_bytes(&mut payload, column.name.as_bytes());
    // Length of the fixed-length fields that follow
    payload.push(0x0C);
    payload.extend_from_slice(&column.character_set.to_le_bytes());
    payload.extend_from_slice(&column.column_length.to_le_bytes());
    payload.push(column.column_type);
    payload.extend_from_slice(&column.flags.to_le_bytes());
    payload.push(column.decimals);
    payload.extend_from_slice(&[0u8; 2]);
    payload
}

/// Build a text-protocol row; `None` cells are sent as NULL (0xFB)
pub fn build_text_row(cells: &[Option<Vec<u8>>]) -> Vec<u8> {
    let mut payload = Vec::new();
    for cell in cells {
        match cell {
            Some(bytes) => write_length_encoded_bytes(&mut payload, bytes),
            None => payload.push(0xFB),
        }
    }
    payload
}

/// Write a length-encoded integer
pub fn write_length_encoded_int(buf: &mut Vec<u8>, value: u64) {
    if value < 251 {
        buf.push(value as u8);
    } else if value < 65536 {
        buf.push(0xFC);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value < 16777216 {
        buf.push(0xFD);
        buf.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
    } else {
        buf.push(0xFE);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

/// Write a length-encoded byte string
pub fn write_length_encoded_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_length_encoded_int(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mysql::auth::Challenge;

    #[test]
    fn test_read_length_encoded_int() {
        let read = |data: &[u8]| PayloadReader::new(data).length_encoded_int();
        assert_eq!(read(&[0x00]).unwrap(), 0);
        assert_eq!(read(&[0xFA]).unwrap(), 250);
        assert_eq!(read(&[0xFC, 0x01, 0x02]).unwrap(), 0x0201);
        assert_eq!(read(&[0xFD, 0x01, 0x02, 0x03]).unwrap(), 0x030201);
        assert_eq!(
            read(&[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]).unwrap(),
            0x0807060504030201
        );
        assert!(read(&[0xFF]).is_err());
        assert!(read(&[0xFC, 0x01]).is_err());
        assert!(read(&[]).is_err());
    }

    #[test]
    fn test_write_length_encoded_int() {
        let mut buf = Vec::new();
        write_length_encoded_int(&mut buf, 100);
        assert_eq!(buf, vec![100]);

        buf.clear();
        write_length_encoded_int(&mut buf, 1000);
        assert_eq!(buf, vec![0xFC, 0xE8, 0x03]);

        buf.clear();
        write_length_encoded_int(&mut buf, 100000);
        assert_eq!(buf, vec![0xFD, 0xA0, 0x86, 0x01]);

        buf.clear();
        write_length_encoded_int(&mut buf, 0x1_0000_0000);
        assert_eq!(buf[0], 0xFE);
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_null_terminated_string() {
        let mut r = PayloadReader::new(b"hello\x00world");
        assert_eq!(r.null_terminated_string().unwrap(), "hello");
        assert_eq!(r.rest(), b"world");

        assert!(PayloadReader::new(b"no null")
            .null_terminated_string()
            .is_err());
    }

    #[test]
    fn test_handshake_wire_layout() {
        let challenge = Challenge::from_parts(*b"AbCdEfGh", *b"IjKlMnOpQrSt");
        let handshake = Handshake::new("5.7.0-ddal-gateway", 42, &challenge, 33);
        let packet = build_handshake(&handshake);
        assert_eq!(packet.sequence_id, 0);

        let p = &packet.payload;
        assert_eq!(p[0], 10);
        let version_end = 1 + "5.7.0-ddal-gateway".len();
        assert_eq!(&p[1..version_end], b"5.7.0-ddal-gateway");
        assert_eq!(p[version_end], 0);
        let mut at = version_end + 1;
        assert_eq!(&p[at..at + 4], &42u32.to_le_bytes());
        at += 4;
        assert_eq!(&p[at..at + 8], b"AbCdEfGh");
        at += 8;
        assert_eq!(p[at], 0);
        at += 1 + 2;
        assert_eq!(p[at], 33);
        at += 1 + 2 + 2;
        assert_eq!(p[at], 21);
        at += 1;
        assert_eq!(&p[at..at + 10], &[0u8; 10]);
        at += 10;
        assert_eq!(&p[at..at + 12], b"IjKlMnOpQrSt");
        at += 12;
        assert_eq!(p[at], 0);
        at += 1;
        assert_eq!(&p[at..], b"mysql_native_password\x00");

        let parsed = parse_handshake(&packet).unwrap();
        assert_eq!(parsed.connection_id, 42);
        assert_eq!(parsed.capability_flags, GATEWAY_CAPABILITIES);
        assert_eq!(parsed.status_flags, SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(parsed.challenge(), challenge);
    }

    #[test]
    fn test_parse_handshake_response41() {
        let response = HandshakeResponse41 {
            capability_flags: CLIENT_PROTOCOL_41
                | CLIENT_SECURE_CONNECTION
                | CLIENT_CONNECT_WITH_DB
                | CLIENT_PLUGIN_AUTH
                | CLIENT_CONNECT_ATTRS,
            username: "testuser".to_string(),
            auth_response: (1..=20).collect(),
            database: Some("testdb".to_string()),
            auth_plugin_name: Some(MYSQL_NATIVE_PASSWORD.to_string()),
            connect_attrs: Some(vec![("_client_name".into(), "libmysql".into())]),
            ..HandshakeResponse41::default()
        };

        let parsed = parse_handshake_response41(&build_handshake_response41(&response)).unwrap();
        assert_eq!(parsed.username, "testuser");
        assert_eq!(parsed.auth_response, (1..=20).collect::<Vec<u8>>());
        assert_eq!(parsed.schema(), Some("testdb"));
        assert_eq!(parsed.auth_plugin_name.as_deref(), Some(MYSQL_NATIVE_PASSWORD));
        assert_eq!(parsed.connect_attr("_client_name"), Some("libmysql"));
        assert!(parsed.supports_protocol_41());
    }

    #[test]
    fn test_parse_handshake_response41_lenenc_auth() {
        let response = HandshakeResponse41 {
            capability_flags: CLIENT_PROTOCOL_41 | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA,
            username: "u".to_string(),
            auth_response: vec![7u8; 20],
            ..HandshakeResponse41::default()
        };
        let parsed = parse_handshake_response41(&build_handshake_response41(&response)).unwrap();
        assert_eq!(parsed.auth_response, vec![7u8; 20]);
        assert_eq!(parsed.database, None);
    }

    #[test]
    fn test_parse_handshake_response41_truncated() {
        // Too short for the fixed header
        assert!(parse_handshake_response41(&[0x00, 0x02, 0x00]).is_err());

        // Auth response length claims more bytes than present
        let mut payload = Vec::new();
        payload.extend_from_slice(&(CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION).to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.push(33);
        payload.extend_from_slice(&[0u8; 23]);
        payload.extend_from_slice(b"root\x00");
        payload.push(20);
        payload.extend_from_slice(&[1, 2, 3]);
        let err = parse_handshake_response41(&payload).unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
    }

    #[test]
    fn test_ok_packet_layout() {
        let ok = OkPacket {
            affected_rows: 5,
            last_insert_id: 100,
            warnings: 1,
            info: "Records: 5".to_string(),
            ..OkPacket::default()
        };
        let payload = build_ok_packet(&ok);
        assert!(is_ok_packet(&payload));
        let parsed = parse_ok_packet(&payload).unwrap();
        assert_eq!(parsed.affected_rows, 5);
        assert_eq!(parsed.last_insert_id, 100);
        assert_eq!(parsed.status_flags, SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(parsed.warnings, 1);
        assert_eq!(parsed.info, "Records: 5");
    }

    #[test]
    fn test_err_packet_layout() {
        let err = ErrPacket::access_denied("test", "localhost");
        let payload = build_err_packet(&err);
        assert_eq!(payload[0], 0xFF);
        assert_eq!(&payload[1..3], &1045u16.to_le_bytes());
        assert_eq!(payload[3], b'#');
        assert_eq!(&payload[4..9], b"28000");

        let parsed = parse_err_packet(&payload).unwrap();
        assert_eq!(parsed.error_code, 1045);
        assert_eq!(
            parsed.error_message,
            "Access denied for user 'test'@'localhost' (using password: YES)"
        );
    }

    #[test]
    fn test_text_row_null_marker() {
        let row = build_text_row(&[Some(b"5".to_vec()), None, Some(Vec::new())]);
        assert_eq!(row, vec![1, b'5', 0xFB, 0]);
    }

    #[test]
    fn test_eof_packet() {
        let eof = build_eof_packet(SERVER_STATUS_AUTOCOMMIT);
        assert!(is_eof_packet(&eof));
        assert_eq!(eof, vec![0xFE, 0, 0, 0x02, 0]);
    }

    #[test]
    fn test_schema_terminator_without_schema() {
        let response = HandshakeResponse41 {
            capability_flags: CLIENT_PROTOCOL_41
                | CLIENT_SECURE_CONNECTION
                | CLIENT_CONNECT_WITH_DB
                | CLIENT_PLUGIN_AUTH,
            username: "app".to_string(),
            auth_response: vec![9u8; 20],
            database: None,
            auth_plugin_name: Some(MYSQL_NATIVE_PASSWORD.to_string()),
            ..HandshakeResponse41::default()
        };

        let payload = build_handshake_response41(&response);
        let parsed = parse_handshake_response41(&payload).unwrap();
        assert_eq!(parsed.schema(), None);
        assert_eq!(parsed.auth_plugin_name.as_deref(), Some(MYSQL_NATIVE_PASSWORD));
        assert!(payload.ends_with(b"\x00mysql_native_password\x00"));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Header only: 4096 byte payload announced, none sent
        client.write_all(&[0x00, 0x10, 0x00, 1]).await.unwrap();
        let err = read_packet_limited(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_continuation_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0xFF, 0xFF, 0xFF, 0]).await.unwrap();
        let err = read_packet(&mut server).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_frame_at_limit_is_read() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_packet(&mut client, &Packet::new(3, vec![7u8; 16])).await.unwrap();
        let packet = read_packet_limited(&mut server, 16).await.unwrap();
        assert_eq!(packet.sequence_id, 3);
        assert_eq!(packet.payload, vec![7u8; 16]);
    }

    #[tokio::test]
    async fn test_packet_stream_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = vec![
            Packet::new(1, vec![COM_PING]),
            Packet::new(2, b"\x03SELECT 1".to_vec()),
        ];
        write_packets(&mut client, &sent).await.unwrap();
        assert_eq!(read_packet(&mut server).await.unwrap(), sent[0]);
        assert_eq!(read_packet(&mut server).await.unwrap(), sent[1]);
    }
}
