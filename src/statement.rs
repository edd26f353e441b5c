//! Statements and prepared statements.
//!
//! Both carry SQL text with `$n` placeholders and a set of 1-based positional
//! bindings. Values are sent to the server out-of-band in text format; they
//! never become part of the SQL text.

use std::collections::BTreeMap;

use crate::connection::Connection;
use crate::engine::Session;
use crate::error::{Error, Result};
use crate::pg::PgSession;
use crate::result_set::ResultSet;
use crate::sql;
use crate::value::Value;

// ============================================================================
// Bindings
// ============================================================================

/// Positional parameter values for one statement.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    parameters: usize,
    values: BTreeMap<usize, Value>,
}

impl Bindings {
    fn for_sql(sql: &str) -> Self {
        Self {
            parameters: sql::parameter_count(sql),
            values: BTreeMap::new(),
        }
    }

    /// Number of parameters the SQL text references.
    pub fn parameters(&self) -> usize {
        self.parameters
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(&position)
    }

    fn set(&mut self, position: usize, value: Value) {
        self.values.insert(position, value);
    }

    fn clear(&mut self) {
        self.values.clear();
    }

    /// Text form of every parameter in position order.
    ///
    /// Fails if a position in `1..=parameters` is unbound or if a value was
    /// bound outside that range.
    fn render(&self) -> Result<Vec<Option<String>>> {
        if let Some(&position) = self
            .values
            .keys()
            .find(|&&p| p == 0 || p > self.parameters)
        {
            return Err(Error::Binding(format!(
                "parameter position {} is out of range (statement has {} parameters)",
                position, self.parameters
            )));
        }

        (1..=self.parameters)
            .map(|position| {
                self.values
                    .get(&position)
                    .map(Value::to_text)
                    .ok_or_else(|| {
                        Error::Binding(format!(
                            "parameter ${} is not bound (statement has {} parameters)",
                            position, self.parameters
                        ))
                    })
            })
            .collect()
    }
}

/// Typed setters shared by [`Statement`] and [`PreparedStatement`].
///
/// Setters take and return the statement so bindings can be chained; a later
/// call for the same position replaces the earlier value. Positions are
/// checked when the statement is executed.
pub trait Bind: Sized {
    fn bindings_mut(&mut self) -> &mut Bindings;

    /// Bind any convertible value without consuming the statement.
    fn bind(&mut self, position: usize, value: impl Into<Value>) -> &mut Self {
        self.bindings_mut().set(position, value.into());
        self
    }

    /// Drop every binding.
    fn clear_parameters(&mut self) {
        self.bindings_mut().clear();
    }

    fn set_null(mut self, position: usize) -> Self {
        self.bind(position, Value::Null);
        self
    }

    fn set_boolean(mut self, position: usize, value: bool) -> Self {
        self.bind(position, value);
        self
    }

    fn set_short(mut self, position: usize, value: i16) -> Self {
        self.bind(position, value);
        self
    }

    fn set_int(mut self, position: usize, value: i32) -> Self {
        self.bind(position, value);
        self
    }

    fn set_long(mut self, position: usize, value: i64) -> Self {
        self.bind(position, value);
        self
    }

    fn set_float(mut self, position: usize, value: f32) -> Self {
        self.bind(position, value);
        self
    }

    fn set_double(mut self, position: usize, value: f64) -> Self {
        self.bind(position, value);
        self
    }

    fn set_string(mut self, position: usize, value: impl Into<String>) -> Self {
        self.bind(position, Value::Text(value.into()));
        self
    }

    /// Sent as `\x` hex, so every byte arrives unchanged.
    fn set_bytes(mut self, position: usize, value: impl Into<Vec<u8>>) -> Self {
        self.bind(position, Value::Bytes(value.into()));
        self
    }

    /// Sent as an array literal, e.g. `{1,2,3}` or `{"a","b"}`.
    fn set_array<I, T>(mut self, position: usize, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        self.bind(position, Value::array(items));
        self
    }

    fn set_json(mut self, position: usize, value: serde_json::Value) -> Self {
        self.bind(position, Value::Json(value));
        self
    }
}

// ============================================================================
// Statement
// ============================================================================

/// One-shot SQL with positional parameters.
pub struct Statement<'c, S: Session = PgSession> {
    conn: &'c mut Connection<S>,
    sql: String,
    bindings: Bindings,
}

impl<'c, S: Session> Statement<'c, S> {
    pub(crate) fn new(conn: &'c mut Connection<S>, sql: String) -> Self {
        let bindings = Bindings::for_sql(&sql);
        Self {
            conn,
            sql,
            bindings,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Highest `$n` referenced by the SQL text.
    pub fn parameters(&self) -> usize {
        self.bindings.parameters()
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Run the statement and return the number of rows it wrote (0 for reads).
    pub async fn execute(self) -> Result<u64> {
        let params = self.bindings.render()?;
        let result = self.conn.execute_with(&self.sql, &params).await?;
        Ok(result.affected_rows())
    }

    /// Run a query and stream its rows through a server-side cursor.
    ///
    /// The cursor lives in a transaction opened for it unless the session is
    /// already inside one; [`ResultSet::close`] releases both.
    pub async fn execute_query(self) -> Result<ResultSet<'c, S>> {
        let params = self.bindings.render()?;
        ResultSet::open(self.conn, &self.sql, &params).await
    }

    /// Run a write with a `RETURNING` clause; the result set carries both the
    /// returned rows and the affected-row count.
    pub async fn execute_returning(self) -> Result<ResultSet<'c, S>> {
        let params = self.bindings.render()?;
        let result = self.conn.execute_with(&self.sql, &params).await?;
        Ok(ResultSet::buffered(self.conn, result))
    }
}

impl<S: Session> Bind for Statement<'_, S> {
    fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }
}

// ============================================================================
// PreparedStatement
// ============================================================================

/// SQL registered once as a named server-side plan and executed many times
/// with different bindings. Only parameter values travel on each execute.
pub struct PreparedStatement<'c, S: Session = PgSession> {
    conn: &'c mut Connection<S>,
    sql: String,
    name: String,
    prepared: bool,
    bindings: Bindings,
}

impl<'c, S: Session> PreparedStatement<'c, S> {
    pub(crate) fn new(
        conn: &'c mut Connection<S>,
        sql: String,
        name: String,
        prepared: bool,
    ) -> Self {
        let bindings = Bindings::for_sql(&sql);
        Self {
            conn,
            sql,
            name,
            prepared,
            bindings,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Plan name on the server.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> usize {
        self.bindings.parameters()
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Whether the plan has been registered by this connection.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Register the plan under its generated name. No-op once prepared.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        self.conn.register_plan(&self.name, &self.sql).await?;
        self.prepared = true;
        Ok(())
    }

    /// Register the plan under `name`. No-op once prepared; the existing
    /// name is kept.
    pub async fn prepare_as(&mut self, name: impl Into<String>) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        self.name = name.into();
        self.prepare().await
    }

    /// Ask the server whether the plan is currently registered.
    pub async fn prepared_statement_exists(&mut self) -> Result<bool> {
        self.conn.plan_exists(&self.name).await
    }

    /// Execute the plan (preparing it first if needed) and return the number
    /// of rows written.
    pub async fn execute(&mut self) -> Result<u64> {
        let result = self.run().await?;
        Ok(result.affected_rows())
    }

    /// Execute the plan and stream its rows through a named portal, in
    /// batches of `fetch_size`. The portal lives in a transaction opened for
    /// it unless the session is already inside one.
    pub async fn execute_query(&mut self) -> Result<ResultSet<'_, S>> {
        let params = self.bindings.render()?;
        self.prepare().await?;
        ResultSet::open_portal(&mut *self.conn, &self.name, &params).await
    }

    /// Execute a plan with a `RETURNING` clause; the result set carries both
    /// the returned rows and the affected-row count.
    pub async fn execute_returning(&mut self) -> Result<ResultSet<'_, S>> {
        let result = self.run().await?;
        Ok(ResultSet::buffered(&mut *self.conn, result))
    }

    async fn run(&mut self) -> Result<crate::engine::ExecResult> {
        let params = self.bindings.render()?;
        self.prepare().await?;
        self.conn.execute_plan(&self.name, &params).await
    }
}

impl<S: Session> Bind for PreparedStatement<'_, S> {
    fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }
}
