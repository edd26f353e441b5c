//! Forward-only row reader.
//!
//! A [`ResultSet`] either streams rows from a server-side cursor (a declared
//! cursor for plain statements, a named portal for prepared plans), one batch
//! of `fetch_size` rows at a time, or walks a result that was returned in
//! full (writes with `RETURNING`). It holds its connection
//! mutably borrowed for as long as it is open.
//!
//! Column access requires a current row: call [`ResultSet::next`] first.
//! SQL NULL reads as the type's zero value (`""`, `0`, `false`, empty bytes);
//! use [`ResultSet::is_null`] to tell the two apart.

use std::str::FromStr;

use crate::connection::{Connection, CursorKind};
use crate::engine::{ExecResult, RowBuffer, Session};
use crate::error::{Error, Result};
use crate::pg::PgSession;
use crate::value::decode_bytea;

/// Column lookup by 0-based position or by name.
pub trait ColumnIndex {
    fn resolve(&self, rows: &RowBuffer) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, rows: &RowBuffer) -> Result<usize> {
        if *self < rows.column_count() {
            Ok(*self)
        } else {
            Err(Error::ResultAccess(format!(
                "column index {} out of range ({} columns)",
                self,
                rows.column_count()
            )))
        }
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, rows: &RowBuffer) -> Result<usize> {
        rows.column_index(self)
            .ok_or_else(|| Error::ResultAccess(format!("no column named {:?}", self)))
    }
}

impl ColumnIndex for String {
    fn resolve(&self, rows: &RowBuffer) -> Result<usize> {
        self.as_str().resolve(rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

enum Source {
    Cursor {
        name: String,
        kind: CursorKind,
        owns_transaction: bool,
    },
    Buffered,
}

/// Rows produced by a query.
pub struct ResultSet<'c, S: Session = PgSession> {
    conn: &'c mut Connection<S>,
    source: Source,
    batch: RowBuffer,
    position: Position,
    exhausted: bool,
    rows: Option<u64>,
}

impl<'c, S: Session> ResultSet<'c, S> {
    /// Declare a cursor over `sql` and fetch the first batch.
    ///
    /// If that fetch fails the cursor (and its transaction) is closed before
    /// the error is returned.
    pub(crate) async fn open(
        conn: &'c mut Connection<S>,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<Self> {
        let (name, owns_transaction) = conn.open_cursor(sql, params).await?;
        Self::start(conn, name, CursorKind::Declared, owns_transaction).await
    }

    /// Bind the prepared plan `plan` to a portal and fetch the first batch.
    pub(crate) async fn open_portal(
        conn: &'c mut Connection<S>,
        plan: &str,
        params: &[Option<String>],
    ) -> Result<Self> {
        let (name, owns_transaction) = conn.open_portal(plan, params).await?;
        Self::start(conn, name, CursorKind::Portal, owns_transaction).await
    }

    async fn start(
        conn: &'c mut Connection<S>,
        name: String,
        kind: CursorKind,
        owns_transaction: bool,
    ) -> Result<Self> {
        let mut result_set = Self {
            conn,
            source: Source::Cursor {
                name,
                kind,
                owns_transaction,
            },
            batch: RowBuffer::default(),
            position: Position::BeforeFirst,
            exhausted: false,
            rows: None,
        };

        if let Err(e) = result_set.fetch_batch().await {
            if let Err(close_err) = result_set.close().await {
                tracing::warn!(error = %close_err, "failed to close cursor after fetch error");
            }
            return Err(e);
        }
        Ok(result_set)
    }

    /// Wrap a result that already holds every row.
    pub(crate) fn buffered(conn: &'c mut Connection<S>, result: ExecResult) -> Self {
        Self {
            conn,
            rows: Some(result.affected_rows()),
            source: Source::Buffered,
            batch: result.rows,
            position: Position::BeforeFirst,
            exhausted: true,
        }
    }

    /// Advance to the next row, fetching another batch when the current one
    /// is used up. Once this returns `false` it keeps returning `false`.
    pub async fn next(&mut self) -> Result<bool> {
        let next = match self.position {
            Position::BeforeFirst => 0,
            Position::At(i) => i + 1,
            Position::AfterLast => return Ok(false),
        };

        if next < self.batch.len() {
            self.position = Position::At(next);
            return Ok(true);
        }

        if !self.exhausted {
            self.fetch_batch().await?;
            if !self.batch.is_empty() {
                self.position = Position::At(0);
                return Ok(true);
            }
        }

        self.position = Position::AfterLast;
        self.batch.clear();
        Ok(false)
    }

    async fn fetch_batch(&mut self) -> Result<()> {
        let Source::Cursor { name, kind, .. } = &self.source else {
            self.exhausted = true;
            return Ok(());
        };
        let fetch_size = self.conn.fetch_size();
        let batch = self.conn.fetch(name, *kind, fetch_size).await?;

        // A short batch means the cursor has nothing more.
        self.exhausted = match fetch_size {
            Some(n) => batch.len() < n as usize,
            None => true,
        };
        self.batch = batch;
        self.position = Position::BeforeFirst;
        Ok(())
    }

    /// Affected-row count reported for the statement. Available once;
    /// `None` for cursor-backed reads.
    pub fn rows(&mut self) -> Option<u64> {
        self.rows.take()
    }

    pub fn column_count(&self) -> usize {
        self.batch.column_count()
    }

    pub fn column_name(&self, col: usize) -> Option<&str> {
        self.batch.column_name(col)
    }

    /// Close the result set: release rows, close the cursor and end the
    /// transaction opened for it.
    pub async fn close(mut self) -> Result<()> {
        self.batch.clear();
        match std::mem::replace(&mut self.source, Source::Buffered) {
            Source::Cursor {
                name,
                kind,
                owns_transaction,
            } => self.conn.close_cursor(&name, kind, owns_transaction).await,
            Source::Buffered => Ok(()),
        }
    }

    // ========================================================================
    // Column access
    // ========================================================================

    /// Raw text of a column in the current row; `None` for SQL NULL.
    fn raw(&self, col: impl ColumnIndex) -> Result<Option<&[u8]>> {
        let row = match self.position {
            Position::At(row) => row,
            Position::BeforeFirst => {
                return Err(Error::ResultAccess(
                    "no current row: call next() first".to_string(),
                ))
            }
            Position::AfterLast => {
                return Err(Error::ResultAccess("result set is exhausted".to_string()))
            }
        };
        let col = col.resolve(&self.batch)?;
        Ok(self.batch.value(row, col))
    }

    fn text(&self, col: impl ColumnIndex) -> Result<Option<&str>> {
        self.raw(col)?
            .map(|bytes| {
                std::str::from_utf8(bytes)
                    .map_err(|_| Error::Decode("column value is not valid UTF-8".to_string()))
            })
            .transpose()
    }

    fn parse<T: FromStr + Default>(&self, col: impl ColumnIndex, type_name: &str) -> Result<T> {
        match self.text(col)? {
            None => Ok(T::default()),
            Some(text) => text
                .trim()
                .parse()
                .map_err(|_| Error::Decode(format!("cannot read {:?} as {}", text, type_name))),
        }
    }

    pub fn is_null(&self, col: impl ColumnIndex) -> Result<bool> {
        Ok(self.raw(col)?.is_none())
    }

    pub fn get_string(&self, col: impl ColumnIndex) -> Result<String> {
        Ok(self.text(col)?.unwrap_or_default().to_string())
    }

    /// Accepts the server's `t`/`f` as well as `true`, `yes`, `on`, `1` and
    /// their negatives.
    pub fn get_boolean(&self, col: impl ColumnIndex) -> Result<bool> {
        match self.text(col)? {
            None => Ok(false),
            Some(text) => match text.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
                _ => Err(Error::Decode(format!("cannot read {:?} as boolean", text))),
            },
        }
    }

    pub fn get_byte(&self, col: impl ColumnIndex) -> Result<i8> {
        self.parse(col, "byte")
    }

    pub fn get_short(&self, col: impl ColumnIndex) -> Result<i16> {
        self.parse(col, "short")
    }

    pub fn get_int(&self, col: impl ColumnIndex) -> Result<i32> {
        self.parse(col, "int")
    }

    pub fn get_long(&self, col: impl ColumnIndex) -> Result<i64> {
        self.parse(col, "long")
    }

    pub fn get_float(&self, col: impl ColumnIndex) -> Result<f32> {
        self.parse(col, "float")
    }

    pub fn get_double(&self, col: impl ColumnIndex) -> Result<f64> {
        self.parse(col, "double")
    }

    /// Decode a `bytea` column (`\x` hex or escape format).
    pub fn get_bytes(&self, col: impl ColumnIndex) -> Result<Vec<u8>> {
        match self.raw(col)? {
            None => Ok(Vec::new()),
            Some(payload) => decode_bytea(payload),
        }
    }

    /// Parse a `json`/`jsonb` column. NULL reads as `Value::Null`.
    pub fn get_json(&self, col: impl ColumnIndex) -> Result<serde_json::Value> {
        match self.raw(col)? {
            None => Ok(serde_json::Value::Null),
            Some(payload) => serde_json::from_slice(payload)
                .map_err(|e| Error::Decode(format!("invalid JSON column value: {}", e))),
        }
    }
}

impl<S: Session> Drop for ResultSet<'_, S> {
    fn drop(&mut self) {
        if let Source::Cursor {
            name,
            kind,
            owns_transaction,
        } = std::mem::replace(&mut self.source, Source::Buffered)
        {
            self.conn.defer_cursor_close(name, kind, owns_transaction);
        }
    }
}
