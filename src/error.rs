//! Error types for pqkit.
//!
//! Every failure surfaces at the call that triggered it. Nothing is retried.

use thiserror::Error;

use crate::engine::ExecStatus;

#[derive(Error, Debug)]
pub enum Error {
    /// The engine could not establish a session.
    #[error("could not establish session: {0}")]
    ConnectionEstablish(String),

    /// The engine answered with a status other than command-complete,
    /// tuples-available or copy-in.
    #[error("statement failed ({status}): {message}")]
    Execution { status: ExecStatus, message: String },

    /// Missing or out-of-range positional bindings, detected client-side.
    #[error("binding error: {0}")]
    Binding(String),

    /// Column or row access on a result set that has no current row.
    #[error("result access error: {0}")]
    ResultAccess(String),

    /// A non-null column value that cannot be read as the requested type.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from the server rejecting a statement.
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::Execution { .. })
    }

    /// Whether this error is a client-side binding failure.
    pub fn is_binding(&self) -> bool {
        matches!(self, Error::Binding(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
