//! In-memory engine for tests.
//!
//! Sessions answer transaction control, cursor statements (DECLARE, FETCH,
//! CLOSE), named plans and portals, and `pg_prepared_statements` lookups
//! themselves, with the same state rules as the server. Everything else goes to a handler
//! supplied by the test. All sessions of one engine share a call log.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::engine::{Engine, ExecResult, ExecStatus, Row, RowBuffer, Session, TransactionStatus};
use crate::error::{Error, Result};

/// Executing this text breaks the session as if the socket had died.
pub(crate) const DISCONNECT: &str = "-- mock: disconnect";

type Handler = dyn Fn(&str, &[Option<String>]) -> ExecResult + Send + Sync;

struct Shared {
    handler: Box<Handler>,
    log: Mutex<Vec<String>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    /// Connect attempts numbered at or above this fail
    connect_limit: AtomicUsize,
}

#[derive(Clone)]
pub(crate) struct MockEngine {
    shared: Arc<Shared>,
}

impl MockEngine {
    /// Engine whose handler answers every statement with `COMMAND_OK`.
    pub(crate) fn new() -> Self {
        Self::with_handler(|_, _| command("OK"))
    }

    pub(crate) fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str, &[Option<String>]) -> ExecResult + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                handler: Box::new(handler),
                log: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                connect_limit: AtomicUsize::new(usize::MAX),
            }),
        }
    }

    pub(crate) fn fail_connects_after(&self, successful: usize) {
        self.shared.connect_limit.store(successful, Ordering::SeqCst);
    }

    pub(crate) fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in order.
    pub(crate) fn log(&self) -> Vec<String> {
        self.shared.log.lock().clone()
    }

    pub(crate) fn clear_log(&self) {
        self.shared.log.lock().clear();
    }
}

impl Engine for MockEngine {
    type Session = MockSession;

    async fn connect(&self, _info: &str) -> Result<MockSession> {
        let attempt = self.shared.connects.load(Ordering::SeqCst);
        if attempt >= self.shared.connect_limit.load(Ordering::SeqCst) {
            return Err(Error::ConnectionEstablish(
                "mock: connection refused".to_string(),
            ));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            shared: Arc::clone(&self.shared),
            status: TransactionStatus::Idle,
            closed: false,
            plans: HashMap::new(),
            cursors: HashMap::new(),
        })
    }
}

struct MockCursor {
    columns: Vec<String>,
    rows: VecDeque<Row>,
}

pub(crate) struct MockSession {
    shared: Arc<Shared>,
    status: TransactionStatus,
    closed: bool,
    plans: HashMap<String, String>,
    cursors: HashMap<String, MockCursor>,
}

impl MockSession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "mock: session closed",
            )));
        }
        Ok(())
    }

    fn record(&self, entry: String) {
        self.shared.log.lock().push(entry);
    }

    /// Apply the transaction state rules to a statement's outcome.
    fn run(&mut self, sql: &str, params: &[Option<String>]) -> ExecResult {
        let upper = sql.trim().to_ascii_uppercase();

        match upper.as_str() {
            "BEGIN" => {
                self.status = TransactionStatus::InTransaction;
                return command("BEGIN");
            }
            "END" | "COMMIT" => {
                let tag = if self.status == TransactionStatus::Failed {
                    "ROLLBACK"
                } else {
                    "COMMIT"
                };
                self.close_transaction();
                return command(tag);
            }
            "ROLLBACK" => {
                self.close_transaction();
                return command("ROLLBACK");
            }
            _ => {}
        }

        if self.status == TransactionStatus::Failed {
            return ExecResult::failed(
                "ERROR: current transaction is aborted, commands ignored until end of transaction block (25P02)",
            );
        }

        let result = if upper.starts_with("DECLARE ") {
            self.declare(sql, params)
        } else if upper.starts_with("FETCH ") {
            self.fetch(sql)
        } else if upper.starts_with("CLOSE ") {
            match self.cursors.remove(&unquote(&sql["CLOSE ".len()..])) {
                Some(_) => command("CLOSE CURSOR"),
                None => ExecResult::failed("ERROR: cursor does not exist (34000)"),
            }
        } else if upper.starts_with("DEALLOCATE ") {
            match self.plans.remove(&unquote(&sql["DEALLOCATE ".len()..])) {
                Some(_) => command("DEALLOCATE"),
                None => ExecResult::failed("ERROR: prepared statement does not exist (26000)"),
            }
        } else if upper.contains("FROM PG_PREPARED_STATEMENTS") {
            let name = params.first().cloned().flatten().unwrap_or_default();
            let found = usize::from(self.plans.contains_key(&name));
            rows(&["?column?"], vec![vec![Some("1")]; found])
        } else {
            (self.shared.handler)(sql, params)
        };

        self.track(result)
    }

    /// A failure inside a transaction aborts it.
    fn track(&mut self, result: ExecResult) -> ExecResult {
        if !result.status.is_success() && self.status == TransactionStatus::InTransaction {
            self.status = TransactionStatus::Failed;
        }
        result
    }

    /// Run `sql` through the handler and keep its rows as cursor `name`.
    /// Returns the column names on success.
    fn open_cursor(&mut self, name: String, sql: &str, params: &[Option<String>]) -> ExecResult {
        let result = (self.shared.handler)(sql, params);
        if !result.status.is_success() {
            return result;
        }
        let ExecResult { rows: buffer, .. } = result;
        let columns: Vec<String> = (0..buffer.column_count())
            .filter_map(|c| buffer.column_name(c).map(str::to_string))
            .collect();
        let rows = (0..buffer.len())
            .map(|r| {
                (0..buffer.column_count())
                    .map(|c| buffer.value(r, c).map(Bytes::copy_from_slice))
                    .collect()
            })
            .collect();
        self.cursors.insert(
            name,
            MockCursor {
                columns: columns.clone(),
                rows,
            },
        );
        let mut described = ExecResult::new(ExecStatus::TuplesOk);
        described.rows = RowBuffer::new(columns);
        described
    }

    fn take_rows(&mut self, name: &str, count: usize) -> ExecResult {
        let Some(cursor) = self.cursors.get_mut(name) else {
            return ExecResult::failed("ERROR: cursor does not exist (34000)");
        };
        let mut result = ExecResult::new(ExecStatus::TuplesOk);
        result.rows = RowBuffer::new(cursor.columns.clone());
        let take = count.min(cursor.rows.len());
        for row in cursor.rows.drain(..take) {
            result.rows.push_row(row);
        }
        result.command_tag = format!("FETCH {}", take);
        result
    }

    fn close_transaction(&mut self) {
        self.status = TransactionStatus::Idle;
        self.cursors.clear();
    }

    fn declare(&mut self, sql: &str, params: &[Option<String>]) -> ExecResult {
        if self.status != TransactionStatus::InTransaction {
            return ExecResult::failed(
                "ERROR: DECLARE CURSOR can only be used in transaction blocks (25P01)",
            );
        }
        let rest = &sql["DECLARE ".len()..];
        let Some((name, query)) = rest.split_once(" NO SCROLL CURSOR FOR ") else {
            return ExecResult::failed("ERROR: syntax error at or near \"DECLARE\" (42601)");
        };

        let result = self.open_cursor(unquote(name), query, params);
        if !result.status.is_success() {
            return result;
        }
        command("DECLARE CURSOR")
    }

    fn fetch(&mut self, sql: &str) -> ExecResult {
        let words: Vec<&str> = sql.split_whitespace().collect();
        let (count, name) = match words.as_slice() {
            ["FETCH", "ALL", "FROM", name] => (usize::MAX, *name),
            ["FETCH", "FORWARD", n, "FROM", name] => match n.parse() {
                Ok(n) => (n, *name),
                Err(_) => return ExecResult::failed("ERROR: bad fetch count (42601)"),
            },
            _ => return ExecResult::failed("ERROR: syntax error at or near \"FETCH\" (42601)"),
        };
        self.take_rows(&unquote(name), count)
    }
}

impl Session for MockSession {
    async fn execute(&mut self, sql: &str) -> Result<ExecResult> {
        self.ensure_open()?;
        self.record(sql.to_string());
        if sql == DISCONNECT {
            self.closed = true;
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "mock: connection reset",
            )));
        }
        Ok(self.run(sql, &[]))
    }

    async fn execute_params(&mut self, sql: &str, params: &[Option<String>]) -> Result<ExecResult> {
        self.ensure_open()?;
        self.record(format!("{} {:?}", sql, params));
        Ok(self.run(sql, params))
    }

    async fn prepare(&mut self, name: &str, sql: &str) -> Result<ExecResult> {
        self.ensure_open()?;
        self.record(format!("PREPARE {} AS {}", name, sql));
        if self.status == TransactionStatus::Failed {
            return Ok(ExecResult::failed("ERROR: current transaction is aborted (25P02)"));
        }
        if self.plans.contains_key(name) {
            return Ok(ExecResult::failed(format!(
                "ERROR: prepared statement \"{}\" already exists (42P05)",
                name
            )));
        }
        self.plans.insert(name.to_string(), sql.to_string());
        Ok(command(""))
    }

    async fn execute_prepared(
        &mut self,
        name: &str,
        params: &[Option<String>],
    ) -> Result<ExecResult> {
        self.ensure_open()?;
        self.record(format!("EXECUTE {} {:?}", name, params));
        match self.plans.get(name).cloned() {
            Some(sql) => Ok(self.run(&sql, params)),
            None => Ok(ExecResult::failed(format!(
                "ERROR: prepared statement \"{}\" does not exist (26000)",
                name
            ))),
        }
    }

    async fn bind_portal(
        &mut self,
        portal: &str,
        statement: &str,
        params: &[Option<String>],
    ) -> Result<ExecResult> {
        self.ensure_open()?;
        self.record(format!("BIND {} TO {} {:?}", portal, statement, params));
        let result = match self.status {
            TransactionStatus::Failed => {
                ExecResult::failed("ERROR: current transaction is aborted (25P02)")
            }
            // Outside a transaction the portal would not survive the Sync
            TransactionStatus::Idle => {
                ExecResult::failed("ERROR: portal requires a transaction block (25P01)")
            }
            TransactionStatus::InTransaction => match self.plans.get(statement).cloned() {
                Some(sql) => self.open_cursor(portal.to_string(), &sql, params),
                None => ExecResult::failed(format!(
                    "ERROR: prepared statement \"{}\" does not exist (26000)",
                    statement
                )),
            },
        };
        Ok(self.track(result))
    }

    async fn execute_portal(&mut self, portal: &str, max_rows: u32) -> Result<ExecResult> {
        self.ensure_open()?;
        self.record(format!("EXECUTE PORTAL {} {}", portal, max_rows));
        if self.status == TransactionStatus::Failed {
            return Ok(ExecResult::failed("ERROR: current transaction is aborted (25P02)"));
        }
        let count = if max_rows == 0 {
            usize::MAX
        } else {
            max_rows as usize
        };
        let result = self.take_rows(portal, count);
        Ok(self.track(result))
    }

    async fn close_portal(&mut self, portal: &str) -> Result<ExecResult> {
        self.ensure_open()?;
        self.record(format!("CLOSE PORTAL {}", portal));
        // Closing a missing portal is not an error on the server
        self.cursors.remove(portal);
        Ok(command(""))
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn unquote(name: &str) -> String {
    let name = name.trim();
    match name.strip_prefix('"').and_then(|n| n.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => name.to_string(),
    }
}

/// A `COMMAND_OK` result with `tag`.
pub(crate) fn command(tag: &str) -> ExecResult {
    let mut result = ExecResult::new(ExecStatus::CommandOk);
    result.command_tag = tag.to_string();
    result
}

/// A `TUPLES_OK` result holding text cells.
pub(crate) fn rows(columns: &[&str], data: Vec<Vec<Option<&str>>>) -> ExecResult {
    let mut result = ExecResult::new(ExecStatus::TuplesOk);
    result.rows = RowBuffer::new(columns.iter().map(|c| c.to_string()).collect());
    result.command_tag = format!("SELECT {}", data.len());
    for row in data {
        result
            .rows
            .push_row(row.into_iter().map(|c| c.map(|s| Bytes::copy_from_slice(s.as_bytes()))));
    }
    result
}
