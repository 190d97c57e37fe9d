//! The driver contract between the ORM core and a backend adapter
//!
//! A [`Driver`] is the per-backend strategy object. Most hooks have a
//! default body delegating to [`crate::executor`]; backends override only
//! what differs (statement filter, commit semantics, insert strategy,
//! catalog queries, type mapping).

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::capability::{Capabilities, Operation};
use crate::connection::{Connection, ConnectionConfig, DatabaseType, PreparedStatement, Transaction};
use crate::convert;
use crate::dialect::SqlDialect;
use crate::error::{Error, Result};
use crate::executor;
use crate::types::{FieldDescriptor, LocalType, Param, Record, Row, TableFields, Value};

/// Per-statement flags the ORM core and drivers pass down a call chain
#[derive(Debug, Clone, Default)]
pub struct StatementContext {
    /// Statement was generated by the ORM's update/delete path
    pub orm_generated: bool,
    /// Primary key of the target table, when known
    pub primary_key: Option<FieldDescriptor>,
    /// Rows-affected of the statement is meaningless and reported as 0
    pub ignore_result: bool,
}

impl StatementContext {
    /// Empty context for raw statements
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the statement as ORM-generated
    pub fn orm_generated(mut self) -> Self {
        self.orm_generated = true;
        self
    }

    /// Attach the target table's primary key
    pub fn with_primary_key(mut self, field: FieldDescriptor) -> Self {
        self.primary_key = Some(field);
        self
    }

    /// Discard the backend's rows-affected figure
    pub fn ignoring_result(mut self) -> Self {
        self.ignore_result = true;
        self
    }
}

/// Last-insert-id state of an execution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InsertId {
    /// The statement produced no id
    #[default]
    Unavailable,
    /// Generated id
    Value(i64),
    /// An id exists but cannot be reported as an integer
    Unsupported(String),
}

/// Outcome of a data-modifying statement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    /// Rows affected
    pub rows_affected: u64,
    /// Last insert id state
    pub insert_id: InsertId,
}

impl ExecResult {
    /// Result with a rows-affected figure and no id
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            insert_id: InsertId::Unavailable,
        }
    }

    /// Attach an insert id state
    pub fn with_insert_id(mut self, insert_id: InsertId) -> Self {
        self.insert_id = insert_id;
        self
    }

    /// The generated id, or a not-supported error carrying the reason
    pub fn last_insert_id(&self) -> Result<i64> {
        match &self.insert_id {
            InsertId::Value(id) => Ok(*id),
            InsertId::Unsupported(reason) => Err(Error::not_supported(reason.clone())),
            InsertId::Unavailable => Err(Error::not_supported(
                "LastInsertId is not available for this statement",
            )),
        }
    }
}

/// How an insert treats conflicting rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertOption {
    /// Plain insert
    #[default]
    Default,
    /// Skip conflicting rows
    Ignore,
    /// Delete-then-insert on conflict
    Replace,
    /// Upsert
    Save,
}

impl InsertOption {
    /// Canonical operation gated by the capability table
    pub const fn operation(self) -> Operation {
        match self {
            Self::Default => Operation::Insert,
            Self::Ignore => Operation::InsertIgnore,
            Self::Replace => Operation::Replace,
            Self::Save => Operation::Save,
        }
    }
}

/// Where a statement runs: a plain connection or an open transaction
#[derive(Clone, Copy)]
pub enum Link<'a> {
    /// Autocommit connection
    Conn(&'a dyn Connection),
    /// Open transaction
    Tx(&'a dyn Transaction),
}

impl fmt::Debug for Link<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conn(_) => f.write_str("Link::Conn"),
            Self::Tx(_) => f.write_str("Link::Tx"),
        }
    }
}

impl<'a> Link<'a> {
    /// Execute a query that returns rows
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self {
            Self::Conn(conn) => conn.query(sql, params).await,
            Self::Tx(tx) => tx.query(sql, params).await,
        }
    }

    /// Execute a statement, returns affected row count
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        match self {
            Self::Conn(conn) => conn.execute(sql, params).await,
            Self::Tx(tx) => tx.execute(sql, params).await,
        }
    }

    /// Prepare a statement on whichever side this link points to
    pub async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        match self {
            Self::Conn(conn) => conn.prepare(sql).await,
            Self::Tx(tx) => tx.prepare(sql).await,
        }
    }

    /// Whether statements run inside a transaction
    #[inline]
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Tx(_))
    }
}

/// Whether the commit expects rows back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    /// Row-returning query
    Query,
    /// Data-modifying statement
    Exec,
}

/// A fully rewritten, converted statement ready for the round trip
#[derive(Debug)]
pub struct CommitInput<'a> {
    /// Where to run
    pub link: Link<'a>,
    /// Backend-syntax SQL
    pub sql: String,
    /// Bound values, already converted
    pub params: Vec<Value>,
    /// Query or exec
    pub kind: CommitKind,
}

/// Raw outcome of a round trip
#[derive(Debug, Clone, Default)]
pub struct CommitOutput {
    /// Returned rows (query)
    pub rows: Vec<Row>,
    /// Rows affected (exec)
    pub rows_affected: u64,
}

/// Future returned by a transaction body
pub type TxFuture<'t> = Pin<Box<dyn Future<Output = Result<()>> + Send + 't>>;

/// Closure run inside [`Driver::transaction`]
pub type TxBody = Box<dyn for<'t> FnOnce(&'t dyn Transaction) -> TxFuture<'t> + Send>;

/// Box a closure as a transaction body
///
/// ```rust,ignore
/// let body = tx_body(|tx| Box::pin(async move {
///     tx.execute("UPDATE accounts SET balance = balance - 10 WHERE id = $1", &[Value::Int64(1)]).await?;
///     Ok(())
/// }));
/// driver.transaction(conn.as_ref(), body).await?;
/// ```
pub fn tx_body<F>(f: F) -> TxBody
where
    F: for<'t> FnOnce(&'t dyn Transaction) -> TxFuture<'t> + Send + 'static,
{
    Box::new(f)
}

/// Backend adapter driven by the ORM core
#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry name
    fn name(&self) -> &'static str;

    /// Backend kind
    fn database_type(&self) -> DatabaseType;

    /// Connection settings this driver was created with
    fn config(&self) -> &ConnectionConfig;

    /// Static capability table
    fn capabilities(&self) -> Capabilities {
        Capabilities::of(self.database_type())
    }

    /// Statement generator for ORM-built statements
    fn dialect(&self) -> &dyn SqlDialect;

    /// Open a connection
    async fn open(&self) -> Result<Arc<dyn Connection>>;

    /// Round-trip check over an open connection
    async fn ping(&self, conn: &dyn Connection) -> Result<()> {
        conn.ping().await
    }

    /// Rewrite canonical SQL and parameters to backend form
    fn do_filter(
        &self,
        sql: &str,
        params: Vec<Param>,
        ctx: &StatementContext,
    ) -> Result<(String, Vec<Param>)>;

    /// Perform the round trip of a rewritten statement
    async fn do_commit(
        &self,
        input: CommitInput<'_>,
        ctx: &StatementContext,
    ) -> Result<CommitOutput> {
        executor::commit(self.config(), input, ctx).await
    }

    /// Run a row-returning statement
    async fn do_select(
        &self,
        link: Link<'_>,
        sql: &str,
        params: Vec<Param>,
        ctx: &StatementContext,
    ) -> Result<Vec<Row>> {
        executor::select(self, link, sql, params, ctx).await
    }

    /// Run a data-modifying statement
    async fn do_exec(
        &self,
        link: Link<'_>,
        sql: &str,
        params: Vec<Param>,
        ctx: &StatementContext,
    ) -> Result<ExecResult> {
        executor::exec(self, link, sql, params, ctx).await
    }

    /// Insert records into a table
    async fn do_insert(
        &self,
        link: Link<'_>,
        table: &str,
        records: Vec<Record>,
        option: InsertOption,
        ctx: &StatementContext,
    ) -> Result<ExecResult> {
        executor::insert(self, link, table, records, option, ctx).await
    }

    /// Update rows matching `condition`
    async fn do_update(
        &self,
        link: Link<'_>,
        table: &str,
        data: Record,
        condition: &str,
        args: Vec<Param>,
        ctx: &StatementContext,
    ) -> Result<ExecResult> {
        executor::update(self, link, table, data, condition, args, ctx).await
    }

    /// Delete rows matching `condition`
    async fn do_delete(
        &self,
        link: Link<'_>,
        table: &str,
        condition: &str,
        args: Vec<Param>,
        ctx: &StatementContext,
    ) -> Result<ExecResult> {
        executor::delete(self, link, table, condition, args, ctx).await
    }

    /// Table names of a schema (the connection's default when `None`)
    async fn tables(&self, link: Link<'_>, schema: Option<&str>) -> Result<Vec<String>>;

    /// Columns of a table, in catalog order
    async fn table_fields(
        &self,
        link: Link<'_>,
        table: &str,
        schema: Option<&str>,
    ) -> Result<TableFields>;

    /// Plain insert
    async fn insert(&self, link: Link<'_>, table: &str, records: Vec<Record>) -> Result<ExecResult> {
        self.do_insert(link, table, records, InsertOption::Default, &StatementContext::new())
            .await
    }

    /// Insert, skipping conflicting rows
    async fn insert_ignore(
        &self,
        link: Link<'_>,
        table: &str,
        records: Vec<Record>,
    ) -> Result<ExecResult> {
        self.capabilities().check(Operation::InsertIgnore)?;
        self.do_insert(link, table, records, InsertOption::Ignore, &StatementContext::new())
            .await
    }

    /// Insert one record and return its generated id
    async fn insert_and_get_id(&self, link: Link<'_>, table: &str, record: Record) -> Result<i64> {
        self.capabilities().check(Operation::InsertAndGetId)?;
        let result = self
            .do_insert(
                link,
                table,
                vec![record],
                InsertOption::Default,
                &StatementContext::new(),
            )
            .await?;
        result.last_insert_id()
    }

    /// Delete-then-insert on conflict
    async fn replace(&self, link: Link<'_>, table: &str, records: Vec<Record>) -> Result<ExecResult> {
        self.capabilities().check(Operation::Replace)?;
        self.do_insert(link, table, records, InsertOption::Replace, &StatementContext::new())
            .await
    }

    /// Upsert
    async fn save(&self, link: Link<'_>, table: &str, records: Vec<Record>) -> Result<ExecResult> {
        self.capabilities().check(Operation::Save)?;
        self.do_insert(link, table, records, InsertOption::Save, &StatementContext::new())
            .await
    }

    /// Open a transaction on a connection
    async fn begin(&self, conn: &dyn Connection) -> Result<Box<dyn Transaction>> {
        self.capabilities().check(Operation::Begin)?;
        executor::with_timeout(self.config().exec_timeout(), "begin", conn.begin()).await
    }

    /// Run `body` in a transaction; commit on `Ok`, roll back on `Err`
    async fn transaction(&self, conn: &dyn Connection, body: TxBody) -> Result<()> {
        self.capabilities().check(Operation::Transaction)?;
        let limit = self.config().exec_timeout();
        let tx = executor::with_timeout(limit, "begin", conn.begin()).await?;

        let outcome = body(tx.as_ref()).await;
        match outcome {
            Ok(()) => executor::with_timeout(limit, "commit", tx.commit()).await,
            Err(e) => {
                debug!(driver = self.name(), error = %e, "Rolling back transaction");
                match executor::with_timeout(limit, "rollback", tx.rollback()).await {
                    Ok(()) => Err(e),
                    Err(rb) => Err(Error::transaction(format!(
                        "{}; rollback failed: {}",
                        e, rb
                    ))),
                }
            }
        }
    }

    /// Local kind for a backend column type
    fn check_local_type(&self, field_type: &str) -> LocalType;

    /// Normalize an outbound parameter
    fn convert_value_for_field(&self, field_type: &str, param: &Param) -> Result<Value> {
        convert::convert_value_for_field(field_type, param)
    }

    /// Coerce an inbound value to the column's local kind
    fn convert_value_for_local(&self, field_type: &str, value: Value) -> Result<Value> {
        convert::coerce(self.check_local_type(field_type), value)
    }
}
