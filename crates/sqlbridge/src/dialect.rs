//! SQL dialect abstraction for sqlbridge
//!
//! Generates the canonical data-modifying statements the ORM core hands to
//! a driver, using sea-query for identifier quoting:
//! - ClickHouse renders through the MySQL builder (backtick identifiers)
//! - PostgreSQL renders through the PostgreSQL builder
//!
//! Every value slot is a `?` placeholder; backend placeholder syntax is the
//! statement rewriter's job, not the dialect's.

use sea_query::{
    Alias, Expr, IntoIden, MysqlQueryBuilder, PostgresQueryBuilder, Query, QueryBuilder,
    SimpleExpr, TableRef,
};

use crate::connection::DatabaseType;
use crate::error::{Error, Result};
use crate::security::split_table_reference;

// ---------------------------------------------------------------------------
// Helper: build a sea-query TableRef from optional schema + table name
// ---------------------------------------------------------------------------

fn sea_table_ref(schema: Option<&str>, table: &str) -> TableRef {
    match schema {
        Some(s) => TableRef::SchemaTable(Alias::new(s).into_iden(), Alias::new(table).into_iden()),
        None => TableRef::Table(Alias::new(table).into_iden()),
    }
}

fn parse_table(table: &str) -> Result<TableRef> {
    let (schema, name) = split_table_reference(table)?;
    Ok(sea_table_ref(schema.as_deref(), &name))
}

fn placeholder() -> SimpleExpr {
    Expr::cust("?")
}

fn build_insert<B: QueryBuilder>(
    builder: B,
    table: &str,
    columns: &[&str],
    rows: usize,
) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::query(format!("insert into {} without columns", table)));
    }
    if rows == 0 {
        return Err(Error::query(format!("insert into {} without rows", table)));
    }

    let col_idens: Vec<_> = columns.iter().map(|c| Alias::new(*c).into_iden()).collect();

    let mut stmt = Query::insert();
    stmt.into_table(parse_table(table)?).columns(col_idens);
    for _ in 0..rows {
        stmt.values_panic(columns.iter().map(|_| placeholder()));
    }

    Ok(stmt.to_string(builder))
}

fn build_update<B: QueryBuilder>(
    builder: B,
    table: &str,
    columns: &[&str],
    condition: &str,
) -> Result<String> {
    if columns.is_empty() {
        return Err(Error::query(format!("update of {} without columns", table)));
    }

    let values: Vec<_> = columns
        .iter()
        .map(|c| (Alias::new(*c), placeholder()))
        .collect();

    let mut stmt = Query::update();
    stmt.table(parse_table(table)?).values(values);
    if !condition.trim().is_empty() {
        stmt.and_where(Expr::cust(condition.trim()));
    }

    Ok(stmt.to_string(builder))
}

fn build_delete<B: QueryBuilder>(builder: B, table: &str, condition: &str) -> Result<String> {
    let mut stmt = Query::delete();
    stmt.from_table(parse_table(table)?);
    if !condition.trim().is_empty() {
        stmt.and_where(Expr::cust(condition.trim()));
    }

    Ok(stmt.to_string(builder))
}

/// SQL dialect for vendor-specific statement generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// `INSERT INTO t (cols) VALUES (?, ..), ..` with `rows` value tuples
    fn insert_sql(&self, table: &str, columns: &[&str], rows: usize) -> Result<String>;

    /// `UPDATE t SET c = ?, .. [WHERE condition]`
    fn update_sql(&self, table: &str, columns: &[&str], condition: &str) -> Result<String>;

    /// `DELETE FROM t [WHERE condition]`
    fn delete_sql(&self, table: &str, condition: &str) -> Result<String>;
}

// ===========================================================================
// ClickHouse
// ===========================================================================

/// ClickHouse dialect
///
/// Mutations require a WHERE clause, so an empty condition becomes
/// `1 = 1` for updates and deletes.
#[derive(Debug, Clone, Default)]
pub struct ClickHouseDialect;

impl ClickHouseDialect {
    fn condition(condition: &str) -> &str {
        if condition.trim().is_empty() {
            "1 = 1"
        } else {
            condition
        }
    }
}

impl SqlDialect for ClickHouseDialect {
    fn name(&self) -> &'static str {
        "ClickHouse"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "\\`"))
    }

    fn insert_sql(&self, table: &str, columns: &[&str], rows: usize) -> Result<String> {
        build_insert(MysqlQueryBuilder, table, columns, rows)
    }

    fn update_sql(&self, table: &str, columns: &[&str], condition: &str) -> Result<String> {
        build_update(MysqlQueryBuilder, table, columns, Self::condition(condition))
    }

    fn delete_sql(&self, table: &str, condition: &str) -> Result<String> {
        build_delete(MysqlQueryBuilder, table, Self::condition(condition))
    }
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn insert_sql(&self, table: &str, columns: &[&str], rows: usize) -> Result<String> {
        build_insert(PostgresQueryBuilder, table, columns, rows)
    }

    fn update_sql(&self, table: &str, columns: &[&str], condition: &str) -> Result<String> {
        build_update(PostgresQueryBuilder, table, columns, condition)
    }

    fn delete_sql(&self, table: &str, condition: &str) -> Result<String> {
        build_delete(PostgresQueryBuilder, table, condition)
    }
}

/// Get dialect for a database type
pub fn dialect_for(db_type: DatabaseType) -> Box<dyn SqlDialect> {
    match db_type {
        DatabaseType::ClickHouse => Box::new(ClickHouseDialect),
        DatabaseType::PostgreSQL => Box::new(PostgresDialect),
    }
}
