//! Error types for the PostgreSQL wire engine.

use std::collections::HashMap;
use std::fmt;
use std::io;

use crate::error::Error;

/// Result type for wire-level operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors raised while talking to the server.
#[derive(Debug)]
pub enum PgError {
    /// I/O error during communication.
    Io(io::Error),

    /// Protocol error (unexpected message, invalid format, etc.).
    Protocol(String),

    /// Authentication failed.
    Auth(String),

    /// Server returned an error.
    Server {
        severity: String,
        code: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    /// Connection is closed or in invalid state.
    ConnectionClosed,
}

impl PgError {
    /// Build a server error from ErrorResponse fields.
    pub fn from_fields(fields: &HashMap<u8, String>) -> Self {
        PgError::Server {
            severity: fields.get(&b'S').cloned().unwrap_or_default(),
            code: fields.get(&b'C').cloned().unwrap_or_default(),
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
        }
    }
}

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgError::Io(e) => write!(f, "I/O error: {}", e),
            PgError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            PgError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            PgError::Server {
                severity,
                code,
                message,
                detail,
                hint,
            } => {
                write!(f, "{}: {} ({})", severity, message, code)?;
                if let Some(d) = detail {
                    write!(f, "\nDetail: {}", d)?;
                }
                if let Some(h) = hint {
                    write!(f, "\nHint: {}", h)?;
                }
                Ok(())
            }
            PgError::ConnectionClosed => write!(f, "Connection is closed"),
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PgError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PgError {
    fn from(e: io::Error) -> Self {
        PgError::Io(e)
    }
}

/// Failures on an established session. Server errors never take this path:
/// they are reported as failed results.
impl From<PgError> for Error {
    fn from(e: PgError) -> Self {
        match e {
            PgError::Io(e) => Error::Io(e),
            other => Error::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let mut fields = HashMap::new();
        fields.insert(b'S', "ERROR".to_string());
        fields.insert(b'C', "42P01".to_string());
        fields.insert(b'M', "relation \"nope\" does not exist".to_string());
        fields.insert(b'H', "check the name".to_string());

        let err = PgError::from_fields(&fields);
        assert_eq!(
            err.to_string(),
            "ERROR: relation \"nope\" does not exist (42P01)\nHint: check the name"
        );
    }

    #[test]
    fn test_conversion_into_crate_error() {
        let err: Error = PgError::ConnectionClosed.into();
        assert!(matches!(err, Error::Protocol(_)));

        let err: Error = PgError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).into();
        assert!(matches!(err, Error::Io(_)));
    }
}
