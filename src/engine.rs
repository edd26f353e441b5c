//! Boundary to the protocol engine that owns the actual database sessions.
//!
//! The core never speaks the wire protocol. It asks an [`Engine`] for
//! sessions and hands SQL text to a [`Session`], which answers with an
//! [`ExecResult`]: a status, the command tag and a buffer of text-format rows.
//! The default engine is [`crate::pg::PgEngine`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use smallvec::SmallVec;

use crate::error::{Error, Result};

// ============================================================================
// Engine traits
// ============================================================================

/// Factory for sessions.
pub trait Engine: Send + Sync + 'static {
    type Session: Session;

    /// Establish one session. `info` is passed through untouched.
    fn connect(&self, info: &str) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// One established, stateful session.
///
/// Server-side failures come back as an [`ExecResult`] with a failing
/// [`ExecStatus`]; `Err` is reserved for transport failures.
pub trait Session: Send + 'static {
    /// Run SQL text as-is. Scripts with several statements are allowed; the
    /// result of the last one is returned.
    fn execute(&mut self, sql: &str) -> impl Future<Output = Result<ExecResult>> + Send;

    /// Run a single statement with out-of-band, text-format parameters.
    /// `None` is SQL NULL.
    fn execute_params(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> impl Future<Output = Result<ExecResult>> + Send;

    /// Register a named server-side plan for `sql`.
    fn prepare(&mut self, name: &str, sql: &str)
        -> impl Future<Output = Result<ExecResult>> + Send;

    /// Run a previously registered plan with new parameter values.
    fn execute_prepared(
        &mut self,
        name: &str,
        params: &[Option<String>],
    ) -> impl Future<Output = Result<ExecResult>> + Send;

    /// Bind `params` to the plan `statement` as the named portal `portal`
    /// without running it. The portal lives until it is closed or the
    /// enclosing transaction ends. The result carries the column names and
    /// no rows.
    fn bind_portal(
        &mut self,
        portal: &str,
        statement: &str,
        params: &[Option<String>],
    ) -> impl Future<Output = Result<ExecResult>> + Send;

    /// Run `portal` for at most `max_rows` more rows; 0 runs it to the end.
    fn execute_portal(
        &mut self,
        portal: &str,
        max_rows: u32,
    ) -> impl Future<Output = Result<ExecResult>> + Send;

    fn close_portal(&mut self, portal: &str) -> impl Future<Output = Result<ExecResult>> + Send;

    /// Quote `text` so it can be embedded in SQL as an identifier.
    fn escape_identifier(&self, text: &str) -> String {
        format!("\"{}\"", text.replace('"', "\"\""))
    }

    fn transaction_status(&self) -> TransactionStatus;

    fn is_closed(&self) -> bool;

    /// Close the session. Further calls fail.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

// ============================================================================
// Statuses
// ============================================================================

/// Outcome status of one engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    EmptyQuery,
    CommandOk,
    TuplesOk,
    CopyOut,
    CopyIn,
    CopyBoth,
    BadResponse,
    NonfatalError,
    FatalError,
}

impl ExecStatus {
    /// Statuses the core accepts as success.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ExecStatus::CommandOk | ExecStatus::TuplesOk | ExecStatus::CopyIn
        )
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecStatus::EmptyQuery => "EMPTY_QUERY",
            ExecStatus::CommandOk => "COMMAND_OK",
            ExecStatus::TuplesOk => "TUPLES_OK",
            ExecStatus::CopyOut => "COPY_OUT",
            ExecStatus::CopyIn => "COPY_IN",
            ExecStatus::CopyBoth => "COPY_BOTH",
            ExecStatus::BadResponse => "BAD_RESPONSE",
            ExecStatus::NonfatalError => "NONFATAL_ERROR",
            ExecStatus::FatalError => "FATAL_ERROR",
        };
        f.write_str(name)
    }
}

/// Transaction state of a session, as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
}

// ============================================================================
// Results
// ============================================================================

/// Cells of one row. `None` is SQL NULL.
pub type Row = SmallVec<[Option<Bytes>; 16]>;

/// Text-format rows returned by one engine call.
#[derive(Debug, Clone, Default)]
pub struct RowBuffer {
    columns: Arc<Vec<String>>,
    rows: Vec<Row>,
}

impl RowBuffer {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = Option<Bytes>>,
    {
        self.rows.push(cells.into_iter().collect());
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.columns.get(col).map(String::as_str)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// `None` when the cell does not exist.
    pub fn is_null(&self, row: usize, col: usize) -> Option<bool> {
        self.cell(row, col).map(Option::is_none)
    }

    /// Raw text of a cell; `None` for SQL NULL or a missing cell.
    pub fn value(&self, row: usize, col: usize) -> Option<&[u8]> {
        self.cell(row, col).and_then(|c| c.as_deref())
    }

    /// Byte length of a cell (0 for NULL).
    pub fn length(&self, row: usize, col: usize) -> usize {
        self.value(row, col).map_or(0, <[u8]>::len)
    }

    /// Release all rows, keeping the column names.
    pub fn clear(&mut self) {
        self.rows = Vec::new();
    }

    fn cell(&self, row: usize, col: usize) -> Option<&Option<Bytes>> {
        self.rows.get(row).and_then(|r| r.get(col))
    }
}

/// Everything one engine call reports back.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub status: ExecStatus,
    /// Command tag, e.g. `INSERT 0 3` or `SELECT 2`.
    pub command_tag: String,
    pub rows: RowBuffer,
    pub error_message: Option<String>,
}

impl ExecResult {
    pub fn new(status: ExecStatus) -> Self {
        Self {
            status,
            command_tag: String::new(),
            rows: RowBuffer::default(),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(ExecStatus::FatalError)
        }
    }

    /// Turn a rejected status into [`Error::Execution`]. The row buffer is
    /// dropped before the error is returned.
    pub fn check(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        let ExecResult {
            status,
            error_message,
            ..
        } = self;
        Err(Error::Execution {
            status,
            message: error_message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("unexpected status {}", status)),
        })
    }

    /// Rows written by the command; reads report 0.
    pub fn affected_rows(&self) -> u64 {
        affected_rows(&self.command_tag)
    }
}

/// Parse rows affected from a PostgreSQL command tag.
pub fn affected_rows(tag: &str) -> u64 {
    // - "INSERT 0 5" -> 5 rows
    // - "UPDATE 3" -> 3 rows
    // - "SELECT 10" -> 0, a read
    let parts: Vec<&str> = tag.split_whitespace().collect();
    match parts.as_slice() {
        ["INSERT", _, n] | ["UPDATE", n] | ["DELETE", n] | ["MERGE", n] | ["COPY", n] => {
            n.parse().unwrap_or(0)
        }
        _ => 0,
    }
}
