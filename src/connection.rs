//! A single session leased from the pool.
//!
//! A [`Connection`] owns one engine session together with the per-session
//! state the statement layer needs: the plan cache, the plan and cursor name
//! counters, and cursors left open by result sets that were dropped without
//! being closed. Every engine call made through a connection goes through
//! [`Connection::call`], which logs and status-checks it.

use crate::engine::{ExecResult, RowBuffer, Session, TransactionStatus};
use crate::error::Result;
use crate::pg::PgSession;
use crate::plan_cache::{NameGenerator, PlanCache};
use crate::pool::PoolConfig;
use crate::sql;
use crate::statement::{PreparedStatement, Statement};

/// One engine request.
#[derive(Clone, Copy)]
enum Call<'a> {
    Simple(&'a str),
    Params(&'a str, &'a [Option<String>]),
    Prepare(&'a str, &'a str),
    Prepared(&'a str, &'a [Option<String>]),
    BindPortal(&'a str, &'a str, &'a [Option<String>]),
    ExecutePortal(&'a str, u32),
    ClosePortal(&'a str),
}

impl Call<'_> {
    /// SQL text (or plan name) for logging.
    fn text(&self) -> &str {
        match self {
            Call::Simple(sql) | Call::Params(sql, _) | Call::Prepare(_, sql) => sql,
            Call::Prepared(name, _)
            | Call::BindPortal(name, _, _)
            | Call::ExecutePortal(name, _)
            | Call::ClosePortal(name) => name,
        }
    }
}

/// How rows of an open result set are pulled from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CursorKind {
    /// SQL cursor from `DECLARE`, read with `FETCH`
    Declared,
    /// Named protocol portal over a prepared plan
    Portal,
}

/// What a new cursor reads from.
enum Opening<'a> {
    Declare(&'a str, &'a [Option<String>]),
    Portal(&'a str, &'a [Option<String>]),
}

/// A cursor whose result set was dropped while still open.
#[derive(Debug)]
struct PendingCursor {
    name: String,
    kind: CursorKind,
    owns_transaction: bool,
}

/// A database session plus its connection-scoped state.
pub struct Connection<S: Session = PgSession> {
    id: usize,
    session: S,
    plans: PlanCache,
    plan_names: NameGenerator,
    cursor_names: NameGenerator,
    pending: Vec<PendingCursor>,
    fetch_size: Option<u32>,
    log_statements: bool,
}

impl<S: Session> Connection<S> {
    pub(crate) fn new(id: usize, session: S, config: &PoolConfig) -> Self {
        Self {
            id,
            session,
            plans: PlanCache::new(config.plan_cache_capacity),
            plan_names: NameGenerator::new("__pq_plan"),
            cursor_names: NameGenerator::new("__pq_cursor"),
            pending: Vec::new(),
            fetch_size: config.fetch_size,
            log_statements: config.log_statements,
        }
    }

    /// Position of this connection in its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// A statement over `sql`, bound to this connection.
    pub fn statement(&mut self, sql: impl Into<String>) -> Statement<'_, S> {
        Statement::new(self, sql.into())
    }

    /// A prepared statement over `sql`.
    ///
    /// If a plan for the same SQL text is already registered on this
    /// connection it is reused and the statement starts out prepared.
    /// Otherwise a fresh plan name is generated and the server-side prepare
    /// is deferred until [`PreparedStatement::prepare`] or the first execute.
    pub fn prepare_statement(&mut self, sql: impl Into<String>) -> PreparedStatement<'_, S> {
        let sql = sql.into();
        match self.plans.get(&sql) {
            Some(name) => PreparedStatement::new(self, sql, name, true),
            None => {
                let name = self.plan_names.next_name();
                PreparedStatement::new(self, sql, name, false)
            }
        }
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.transaction_status()
    }

    /// Number of plans registered through the plan cache.
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Whether the underlying session has failed or been closed.
    pub fn is_broken(&self) -> bool {
        self.session.is_closed()
    }

    pub(crate) fn fetch_size(&self) -> Option<u32> {
        self.fetch_size
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    // ========================================================================
    // Statement execution
    // ========================================================================

    /// Run `sql`, with out-of-band parameters when there are any.
    pub(crate) async fn execute_with(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<ExecResult> {
        self.reclaim().await;
        if params.is_empty() {
            self.call(Call::Simple(sql)).await
        } else {
            self.call(Call::Params(sql, params)).await
        }
    }

    /// Register `sql` as the plan `name` and record it in the plan cache.
    pub(crate) async fn register_plan(&mut self, name: &str, sql: &str) -> Result<()> {
        self.reclaim().await;
        self.call(Call::Prepare(name, sql)).await?;

        if let Some(stale) = self.plans.insert(sql.to_string(), name.to_string()) {
            self.deallocate(&stale).await;
        }
        Ok(())
    }

    pub(crate) async fn execute_plan(
        &mut self,
        name: &str,
        params: &[Option<String>],
    ) -> Result<ExecResult> {
        self.reclaim().await;
        self.call(Call::Prepared(name, params)).await
    }

    /// Whether the session currently has a plan registered under `name`.
    pub(crate) async fn plan_exists(&mut self, name: &str) -> Result<bool> {
        let params = [Some(name.to_string())];
        let result = self
            .execute_with(
                "SELECT 1 FROM pg_prepared_statements WHERE name = $1",
                &params,
            )
            .await?;
        Ok(!result.rows.is_empty())
    }

    async fn deallocate(&mut self, name: &str) {
        let sql = format!("DEALLOCATE {}", self.session.escape_identifier(name));
        if let Err(e) = self.call(Call::Simple(&sql)).await {
            tracing::warn!(connection = self.id, plan = name, error = %e, "failed to deallocate plan");
        }
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// Declare a cursor over `sql`, opening a transaction for it when the
    /// session is not already in one.
    ///
    /// Returns the cursor name and whether the transaction belongs to the
    /// cursor.
    pub(crate) async fn open_cursor(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<(String, bool)> {
        self.open(Opening::Declare(sql, params)).await
    }

    /// Bind `params` to the registered plan `plan` as a named portal, with
    /// the same transaction rules as [`Connection::open_cursor`].
    pub(crate) async fn open_portal(
        &mut self,
        plan: &str,
        params: &[Option<String>],
    ) -> Result<(String, bool)> {
        self.open(Opening::Portal(plan, params)).await
    }

    async fn open(&mut self, opening: Opening<'_>) -> Result<(String, bool)> {
        self.reclaim().await;

        let owns_transaction = self.session.transaction_status() == TransactionStatus::Idle;
        if owns_transaction {
            self.call(Call::Simple("BEGIN")).await?;
        }

        let name = self.cursor_names.next_name();
        let opened = match opening {
            Opening::Declare(sql, params) => {
                let declare = format!(
                    "DECLARE {} NO SCROLL CURSOR FOR {}",
                    self.session.escape_identifier(&name),
                    sql::strip_terminator(sql)
                );
                if params.is_empty() {
                    self.call(Call::Simple(&declare)).await
                } else {
                    self.call(Call::Params(&declare, params)).await
                }
            }
            Opening::Portal(plan, params) => self.call(Call::BindPortal(&name, plan, params)).await,
        };

        if let Err(e) = opened {
            if owns_transaction {
                if let Err(end) = self.call(Call::Simple("END")).await {
                    tracing::warn!(connection = self.id, error = %end, "failed to end transaction");
                }
            }
            return Err(e);
        }

        Ok((name, owns_transaction))
    }

    /// Next batch from `cursor`; `None` fetches everything that is left.
    pub(crate) async fn fetch(
        &mut self,
        cursor: &str,
        kind: CursorKind,
        count: Option<u32>,
    ) -> Result<RowBuffer> {
        let result = match kind {
            CursorKind::Declared => {
                let cursor = self.session.escape_identifier(cursor);
                let sql = match count {
                    Some(n) => format!("FETCH FORWARD {} FROM {}", n, cursor),
                    None => format!("FETCH ALL FROM {}", cursor),
                };
                self.call(Call::Simple(&sql)).await?
            }
            CursorKind::Portal => {
                self.call(Call::ExecutePortal(cursor, count.unwrap_or(0)))
                    .await?
            }
        };
        Ok(result.rows)
    }

    /// Close `cursor` and end its transaction if it owns one. Both steps are
    /// attempted; the first failure is returned.
    pub(crate) async fn close_cursor(
        &mut self,
        cursor: &str,
        kind: CursorKind,
        owns_transaction: bool,
    ) -> Result<()> {
        let closed = match kind {
            CursorKind::Declared => {
                let sql = format!("CLOSE {}", self.session.escape_identifier(cursor));
                self.call(Call::Simple(&sql)).await.map(drop)
            }
            CursorKind::Portal => self.call(Call::ClosePortal(cursor)).await.map(drop),
        };
        if !owns_transaction {
            return closed;
        }
        let ended = self.call(Call::Simple("END")).await.map(drop);
        closed.and(ended)
    }

    /// Record a cursor to be closed before the next engine call.
    pub(crate) fn defer_cursor_close(
        &mut self,
        cursor: String,
        kind: CursorKind,
        owns_transaction: bool,
    ) {
        tracing::debug!(connection = self.id, cursor = %cursor, "result set dropped while open");
        self.pending.push(PendingCursor {
            name: cursor,
            kind,
            owns_transaction,
        });
    }

    /// Close cursors left behind by dropped result sets.
    pub(crate) async fn reclaim(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        for cursor in std::mem::take(&mut self.pending) {
            if let Err(e) = self
                .close_cursor(&cursor.name, cursor.kind, cursor.owns_transaction)
                .await
            {
                tracing::warn!(
                    connection = self.id,
                    cursor = %cursor.name,
                    error = %e,
                    "failed to reclaim cursor"
                );
            }
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Swap in a freshly established session. Server-side state of the old
    /// one is gone, so cached plans and pending cursors are forgotten.
    pub(crate) fn replace_session(&mut self, session: S) {
        self.session = session;
        self.plans.clear();
        self.pending.clear();
    }

    pub(crate) async fn close_session(&mut self) {
        self.pending.clear();
        self.session.close().await;
    }

    /// The single path to the engine: log, dispatch, check.
    async fn call(&mut self, call: Call<'_>) -> Result<ExecResult> {
        if self.log_statements {
            tracing::debug!(connection = self.id, sql = call.text(), "executing");
        }

        let result = match call {
            Call::Simple(sql) => self.session.execute(sql).await?,
            Call::Params(sql, params) => self.session.execute_params(sql, params).await?,
            Call::Prepare(name, sql) => self.session.prepare(name, sql).await?,
            Call::Prepared(name, params) => self.session.execute_prepared(name, params).await?,
            Call::BindPortal(portal, plan, params) => {
                self.session.bind_portal(portal, plan, params).await?
            }
            Call::ExecutePortal(portal, max_rows) => {
                self.session.execute_portal(portal, max_rows).await?
            }
            Call::ClosePortal(portal) => self.session.close_portal(portal).await?,
        };

        if self.log_statements {
            match &result.error_message {
                Some(message) => tracing::debug!(
                    connection = self.id,
                    status = %result.status,
                    error = %message,
                    "statement failed"
                ),
                None => tracing::debug!(
                    connection = self.id,
                    status = %result.status,
                    tag = %result.command_tag,
                    rows = result.rows.len(),
                    "statement complete"
                ),
            }
        }

        result.check()
    }
}

impl<S: Session> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("cached_plans", &self.plans.len())
            .field("pending_cursors", &self.pending.len())
            .field("closed", &self.session.is_closed())
            .finish()
    }
}
