//! PostgreSQL wire protocol message encoding and decoding.
//!
//! Only the v3 messages the engine needs. Parameters and results always use
//! the text format.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::error::{PgError, PgResult};
use crate::engine::TransactionStatus;

// ============================================================================
// Protocol Constants
// ============================================================================

/// PostgreSQL protocol version 3.0
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// The Bind message counts parameters with an unsigned 16-bit field.
pub const MAX_PARAMETERS: usize = u16::MAX as usize;

/// Largest backend message accepted, length field included (1 GiB).
pub const MAX_MESSAGE_LEN: i32 = 1 << 30;

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            _ => TransactionStatus::Idle,
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Trait for encoding frontend messages
pub trait FrontendMessage {
    fn encode(&self) -> BytesMut;
}

/// Frame a typed message: tag byte, then length (self-inclusive), then body.
fn frame(tag: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(5 + body.len());
    buf.put_u8(tag);
    buf.put_i32(body.len() as i32 + 4);
    buf.put_slice(body);
    buf
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Startup message sent at connection start
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub user: String,
    pub database: Option<String>,
    pub options: Vec<(String, String)>,
}

impl FrontendMessage for StartupMessage {
    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        // Placeholder for length (filled in at the end)
        buf.put_i32(0);
        buf.put_i32(PROTOCOL_VERSION);

        put_cstring(&mut buf, "user");
        put_cstring(&mut buf, &self.user);
        if let Some(ref db) = self.database {
            put_cstring(&mut buf, "database");
            put_cstring(&mut buf, db);
        }
        for (key, value) in &self.options {
            put_cstring(&mut buf, key);
            put_cstring(&mut buf, value);
        }
        buf.put_u8(0);

        let len = buf.len() as i32;
        buf[0..4].copy_from_slice(&len.to_be_bytes());
        buf
    }
}

/// Password message (for MD5 or plaintext auth)
#[derive(Debug, Clone)]
pub struct PasswordMessage {
    pub password: String,
}

impl FrontendMessage for PasswordMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.password);
        frame(b'p', &body)
    }
}

/// Simple query message ('Q')
#[derive(Debug, Clone)]
pub struct QueryMessage {
    pub query: String,
}

impl FrontendMessage for QueryMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.query);
        frame(b'Q', &body)
    }
}

/// Parse message ('P'). An empty name targets the unnamed statement.
/// No parameter types are sent; the server infers them.
#[derive(Debug, Clone)]
pub struct ParseMessage {
    pub name: String,
    pub query: String,
}

impl FrontendMessage for ParseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.name);
        put_cstring(&mut body, &self.query);
        body.put_i16(0);
        frame(b'P', &body)
    }
}

/// Bind message ('B') with text-format parameters and results.
#[derive(Debug, Clone)]
pub struct BindMessage<'a> {
    pub portal: &'a str,
    pub statement: &'a str,
    /// `None` is SQL NULL
    pub params: &'a [Option<String>],
}

impl FrontendMessage for BindMessage<'_> {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, self.portal);
        put_cstring(&mut body, self.statement);

        // Zero parameter format codes: every parameter is text
        body.put_i16(0);

        body.put_u16(self.params.len() as u16);
        for param in self.params {
            match param {
                Some(text) => {
                    body.put_i32(text.len() as i32);
                    body.put_slice(text.as_bytes());
                }
                None => body.put_i32(-1),
            }
        }

        // Zero result format codes: every column comes back as text
        body.put_i16(0);
        frame(b'B', &body)
    }
}

/// Execute message ('E') - Executes a bound portal
#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal: String,
    /// 0 = no limit
    pub max_rows: i32,
}

impl FrontendMessage for ExecuteMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.portal);
        body.put_i32(self.max_rows);
        frame(b'E', &body)
    }
}

/// Describe message ('D') - Request description of statement or portal
#[derive(Debug, Clone)]
pub struct DescribeMessage {
    /// 'S' for statement, 'P' for portal
    pub kind: u8,
    pub name: String,
}

impl FrontendMessage for DescribeMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(self.kind);
        put_cstring(&mut body, &self.name);
        frame(b'D', &body)
    }
}

/// Close message ('C') - Destroys a portal or a prepared statement
#[derive(Debug, Clone)]
pub struct CloseMessage {
    /// 'S' for statement, 'P' for portal
    pub kind: u8,
    pub name: String,
}

impl FrontendMessage for CloseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u8(self.kind);
        put_cstring(&mut body, &self.name);
        frame(b'C', &body)
    }
}

/// Sync message ('S') - Marks end of an extended query
#[derive(Debug, Clone, Copy)]
pub struct SyncMessage;

impl FrontendMessage for SyncMessage {
    fn encode(&self) -> BytesMut {
        frame(b'S', &[])
    }
}

/// Terminate message ('X') - Close the connection
#[derive(Debug, Clone, Copy)]
pub struct TerminateMessage;

impl FrontendMessage for TerminateMessage {
    fn encode(&self) -> BytesMut {
        frame(b'X', &[])
    }
}

/// CopyFail message ('f') - Abort a COPY FROM STDIN
#[derive(Debug, Clone)]
pub struct CopyFailMessage {
    pub reason: String,
}

impl FrontendMessage for CopyFailMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.reason);
        frame(b'f', &body)
    }
}

/// SASL Initial Response message ('p') - First SCRAM message
#[derive(Debug, Clone)]
pub struct SaslInitialResponseMessage {
    /// SASL mechanism name (e.g., "SCRAM-SHA-256")
    pub mechanism: String,
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslInitialResponseMessage {
    fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        put_cstring(&mut body, &self.mechanism);
        body.put_i32(self.data.len() as i32);
        body.put_slice(&self.data);
        frame(b'p', &body)
    }
}

/// SASL Response message ('p') - Subsequent SCRAM messages
#[derive(Debug, Clone)]
pub struct SaslResponseMessage {
    pub data: Vec<u8>,
}

impl FrontendMessage for SaslResponseMessage {
    fn encode(&self) -> BytesMut {
        frame(b'p', &self.data)
    }
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Backend message types
#[derive(Debug, Clone)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password { salt: [u8; 4] },
    AuthenticationSASL { mechanisms: Vec<String> },
    AuthenticationSASLContinue { data: Bytes },
    AuthenticationSASLFinal { data: Bytes },

    // Query responses
    /// Column names of the rows that follow
    RowDescription { columns: Vec<String> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription,

    // COPY
    CopyInResponse,
    CopyOutResponse,
    CopyBothResponse,
    CopyData,
    CopyDone,

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },

    // Errors and notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },
    NotificationResponse,
}

impl BackendMessage {
    /// Decode one complete backend message.
    ///
    /// The input buffer should start with the message type byte.
    pub fn decode(buf: &mut Bytes) -> PgResult<Self> {
        if buf.remaining() < 5 {
            return Err(PgError::Protocol("Incomplete message header".to_string()));
        }

        let msg_type = buf.get_u8();
        let len = buf.get_i32();
        if len < 4 || buf.remaining() < len as usize - 4 {
            return Err(PgError::Protocol("Incomplete message body".to_string()));
        }
        let body = buf.split_to(len as usize - 4);

        match msg_type {
            b'R' => Self::decode_auth(body),
            b'T' => Self::decode_row_description(body),
            b'D' => Self::decode_data_row(body),
            b'C' => Ok(BackendMessage::CommandComplete {
                tag: read_cstring(&mut body.clone())?,
            }),
            b'Z' => {
                need(&body, 1)?;
                Ok(BackendMessage::ReadyForQuery {
                    status: TransactionStatus::from(body[0]),
                })
            }
            b'E' => Ok(BackendMessage::ErrorResponse {
                fields: read_error_fields(body)?,
            }),
            b'N' => Ok(BackendMessage::NoticeResponse {
                fields: read_error_fields(body)?,
            }),
            b'S' => {
                let mut body = body;
                let name = read_cstring(&mut body)?;
                let value = read_cstring(&mut body)?;
                Ok(BackendMessage::ParameterStatus { name, value })
            }
            b'K' => {
                let mut body = body;
                need(&body, 8)?;
                Ok(BackendMessage::BackendKeyData {
                    process_id: body.get_i32(),
                    secret_key: body.get_i32(),
                })
            }
            b'1' => Ok(BackendMessage::ParseComplete),
            b'2' => Ok(BackendMessage::BindComplete),
            b'3' => Ok(BackendMessage::CloseComplete),
            b'I' => Ok(BackendMessage::EmptyQueryResponse),
            b'n' => Ok(BackendMessage::NoData),
            b's' => Ok(BackendMessage::PortalSuspended),
            b't' => Ok(BackendMessage::ParameterDescription),
            b'G' => Ok(BackendMessage::CopyInResponse),
            b'H' => Ok(BackendMessage::CopyOutResponse),
            b'W' => Ok(BackendMessage::CopyBothResponse),
            b'd' => Ok(BackendMessage::CopyData),
            b'c' => Ok(BackendMessage::CopyDone),
            b'A' => Ok(BackendMessage::NotificationResponse),
            _ => Err(PgError::Protocol(format!(
                "Unknown message type: {}",
                msg_type as char
            ))),
        }
    }

    fn decode_auth(mut body: Bytes) -> PgResult<Self> {
        need(&body, 4)?;
        let auth_type = body.get_i32();

        match auth_type {
            0 => Ok(BackendMessage::AuthenticationOk),
            3 => Ok(BackendMessage::AuthenticationCleartextPassword),
            5 => {
                need(&body, 4)?;
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&body[..4]);
                Ok(BackendMessage::AuthenticationMD5Password { salt })
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.has_remaining() {
                    let mech = read_cstring(&mut body)?;
                    if mech.is_empty() {
                        break;
                    }
                    mechanisms.push(mech);
                }
                Ok(BackendMessage::AuthenticationSASL { mechanisms })
            }
            11 => Ok(BackendMessage::AuthenticationSASLContinue { data: body }),
            12 => Ok(BackendMessage::AuthenticationSASLFinal { data: body }),
            _ => Err(PgError::Protocol(format!(
                "Unsupported authentication type: {}",
                auth_type
            ))),
        }
    }

    fn decode_row_description(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2)?;
        let num_fields = column_count(&mut body)?;
        let mut columns = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            columns.push(read_cstring(&mut body)?);
            // table oid, column attr, type oid, type size, type modifier, format
            need(&body, 18)?;
            body.advance(18);
        }

        Ok(BackendMessage::RowDescription { columns })
    }

    fn decode_data_row(mut body: Bytes) -> PgResult<Self> {
        need(&body, 2)?;
        let num_cols = column_count(&mut body)?;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            need(&body, 4)?;
            let len = body.get_i32();
            if len < 0 {
                values.push(None);
            } else {
                need(&body, len as usize)?;
                values.push(Some(body.split_to(len as usize)));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn need(body: &Bytes, n: usize) -> PgResult<()> {
    if body.remaining() < n {
        return Err(PgError::Protocol("Truncated message body".to_string()));
    }
    Ok(())
}

fn column_count(body: &mut Bytes) -> PgResult<usize> {
    let count = body.get_i16();
    usize::try_from(count)
        .map_err(|_| PgError::Protocol(format!("negative column count {}", count)))
}

/// Read a null-terminated string from the buffer.
fn read_cstring(buf: &mut Bytes) -> PgResult<String> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| PgError::Protocol("Missing null terminator in string".to_string()))?;

    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(end + 1);
    Ok(s)
}

/// Read error/notice response fields
fn read_error_fields(mut body: Bytes) -> PgResult<HashMap<u8, String>> {
    let mut fields = HashMap::new();

    while body.has_remaining() {
        let field_type = body.get_u8();
        if field_type == 0 {
            break;
        }
        let value = read_cstring(&mut body)?;
        fields.insert(field_type, value);
    }

    Ok(fields)
}

/// Length of the first complete message in `buf`, if one has fully arrived.
///
/// A length field below 4 or above [`MAX_MESSAGE_LEN`] is a protocol error.
pub fn complete_message_len(buf: &[u8]) -> PgResult<Option<usize>> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let length = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
    if !(4..=MAX_MESSAGE_LEN).contains(&length) {
        return Err(PgError::Protocol(format!(
            "invalid length {} for message '{}'",
            length, buf[0] as char
        )));
    }
    let total_len = 1 + length as usize;
    Ok((buf.len() >= total_len).then_some(total_len))
}
