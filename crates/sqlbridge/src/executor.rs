//! Shared execution pipeline behind the [`Driver`] default hooks
//!
//! filter -> convert parameters -> commit (under the exec timeout) ->
//! convert result columns. Insert, update and delete build their canonical
//! statement through the driver's dialect and then re-enter
//! [`Driver::do_exec`], so backend overrides of exec apply to them too.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};

use crate::connection::{ConnectionConfig, Transaction};
use crate::driver::{
    CommitInput, CommitKind, CommitOutput, Driver, ExecResult, InsertOption, Link,
    StatementContext,
};
use crate::error::{Error, Result};
use crate::types::{Param, Record, Row, Value};

/// Records per multi-row INSERT statement
pub const INSERT_BATCH_SIZE: usize = 10;

/// Run one round trip under the configured exec timeout
pub async fn with_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::timeout(format!("{} exceeded {:?}", what, limit)))?,
        None => fut.await,
    }
}

/// Default round trip
///
/// With `ignore_result` set, the rows-affected figure is reported as 0.
pub async fn commit(
    config: &ConnectionConfig,
    input: CommitInput<'_>,
    ctx: &StatementContext,
) -> Result<CommitOutput> {
    let limit = config.exec_timeout();
    let CommitInput {
        link,
        sql,
        params,
        kind,
    } = input;

    match kind {
        CommitKind::Query => {
            let rows = with_timeout(limit, "query", link.query(&sql, &params)).await?;
            Ok(CommitOutput {
                rows,
                rows_affected: 0,
            })
        }
        CommitKind::Exec => {
            let affected = with_timeout(limit, "exec", link.execute(&sql, &params)).await?;
            Ok(CommitOutput {
                rows: Vec::new(),
                rows_affected: if ctx.ignore_result { 0 } else { affected },
            })
        }
    }
}

/// Convert every parameter through the driver's outbound hook
pub fn bind_values<D: Driver + ?Sized>(driver: &D, params: &[Param]) -> Result<Vec<Value>> {
    params
        .iter()
        .map(|p| driver.convert_value_for_field("", p))
        .collect()
}

/// Coerce every typed column of a row through the driver's inbound hook
pub fn convert_row<D: Driver + ?Sized>(driver: &D, mut row: Row) -> Result<Row> {
    for idx in 0..row.len() {
        let Some(field_type) = row.column_type(idx).map(str::to_string) else {
            continue;
        };
        let raw = row.get(idx).cloned().unwrap_or(Value::Null);
        row.set(idx, driver.convert_value_for_local(&field_type, raw)?);
    }
    Ok(row)
}

/// Default select pipeline
pub async fn select<D: Driver + ?Sized>(
    driver: &D,
    link: Link<'_>,
    sql: &str,
    params: Vec<Param>,
    ctx: &StatementContext,
) -> Result<Vec<Row>> {
    let (sql, params) = driver.do_filter(sql, params, ctx)?;
    let params = bind_values(driver, &params)?;

    let output = driver
        .do_commit(
            CommitInput {
                link,
                sql,
                params,
                kind: CommitKind::Query,
            },
            ctx,
        )
        .await?;

    output
        .rows
        .into_iter()
        .map(|row| convert_row(driver, row))
        .collect()
}

/// Default exec pipeline
pub async fn exec<D: Driver + ?Sized>(
    driver: &D,
    link: Link<'_>,
    sql: &str,
    params: Vec<Param>,
    ctx: &StatementContext,
) -> Result<ExecResult> {
    let (sql, params) = driver.do_filter(sql, params, ctx)?;
    let params = bind_values(driver, &params)?;

    let output = driver
        .do_commit(
            CommitInput {
                link,
                sql,
                params,
                kind: CommitKind::Exec,
            },
            ctx,
        )
        .await?;

    Ok(ExecResult::new(output.rows_affected))
}

/// Column order of a record batch: the first record's keys
///
/// Later records may omit columns but not introduce new ones.
fn record_columns(table: &str, records: &[Record]) -> Result<Vec<String>> {
    let first = records
        .first()
        .ok_or_else(|| Error::query(format!("no records to insert into {}", table)))?;
    if first.is_empty() {
        return Err(Error::query(format!("empty record for {}", table)));
    }
    for (i, record) in records.iter().enumerate().skip(1) {
        if let Some(extra) = record.keys().find(|k| !first.contains_key(*k)) {
            return Err(Error::query(format!(
                "record {} for {} has column '{}' missing from the first record",
                i + 1,
                table,
                extra
            )));
        }
    }
    Ok(first.keys().cloned().collect())
}

/// Parameters of one record in column order; missing columns bind NULL
fn record_params(columns: &[String], record: &Record) -> Vec<Param> {
    columns
        .iter()
        .map(|c| {
            record
                .get(c)
                .cloned()
                .unwrap_or(Param::Value(Value::Null))
        })
        .collect()
}

/// Default insert: gated by the option, multi-row statements of
/// [`INSERT_BATCH_SIZE`] records
pub async fn insert<D: Driver + ?Sized>(
    driver: &D,
    link: Link<'_>,
    table: &str,
    records: Vec<Record>,
    option: InsertOption,
    ctx: &StatementContext,
) -> Result<ExecResult> {
    driver.capabilities().check(option.operation())?;
    let columns = record_columns(table, &records)?;
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();

    let mut result = ExecResult::default();
    for chunk in records.chunks(INSERT_BATCH_SIZE) {
        let sql = driver
            .dialect()
            .insert_sql(table, &column_refs, chunk.len())?;
        let params: Vec<Param> = chunk
            .iter()
            .flat_map(|record| record_params(&columns, record))
            .collect();

        let chunk_result = driver.do_exec(link, &sql, params, ctx).await?;
        result.rows_affected += chunk_result.rows_affected;
        result.insert_id = chunk_result.insert_id;
    }

    Ok(result)
}

/// Insert emulated as one prepared statement executed per record, inside a
/// single-use transaction
///
/// Prepare happens once, before any row. The first failing row stops the
/// batch: the transaction is rolled back and the error names the row. On a
/// [`Link::Tx`] the caller's transaction is used and left open.
pub async fn insert_per_row<D: Driver + ?Sized>(
    driver: &D,
    link: Link<'_>,
    table: &str,
    records: Vec<Record>,
    ctx: &StatementContext,
) -> Result<ExecResult> {
    let columns = record_columns(table, &records)?;
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    let rows: Vec<Vec<Param>> = records
        .iter()
        .map(|record| record_params(&columns, record))
        .collect();

    let canonical = driver.dialect().insert_sql(table, &column_refs, 1)?;
    let (sql, _) = driver.do_filter(&canonical, rows[0].clone(), ctx)?;

    let limit = driver.config().exec_timeout();
    let affected = match link {
        Link::Tx(tx) => execute_rows(driver, tx, &sql, &rows).await?,
        Link::Conn(conn) => {
            let tx = with_timeout(limit, "begin", conn.begin()).await?;
            let outcome = execute_rows(driver, tx.as_ref(), &sql, &rows).await;
            match outcome {
                Ok(affected) => {
                    with_timeout(limit, "commit", tx.commit()).await?;
                    affected
                }
                Err(e) => {
                    debug!(table, error = %e, "Rolling back batch insert");
                    if let Err(rb) = with_timeout(limit, "rollback", tx.rollback()).await {
                        return Err(Error::transaction(format!(
                            "{}; rollback failed: {}",
                            e, rb
                        )));
                    }
                    return Err(e);
                }
            }
        }
    };

    debug!(table, rows = rows.len(), affected, "Batch insert committed");
    Ok(ExecResult::new(affected))
}

async fn execute_rows<D: Driver + ?Sized>(
    driver: &D,
    tx: &dyn Transaction,
    sql: &str,
    rows: &[Vec<Param>],
) -> Result<u64> {
    let limit = driver.config().exec_timeout();
    let stmt = with_timeout(limit, "prepare", tx.prepare(sql)).await?;
    let total = rows.len();
    let mut affected = 0;

    for (i, params) in rows.iter().enumerate() {
        let outcome = match bind_values(driver, params) {
            Ok(values) => with_timeout(limit, "insert", stmt.execute(&values)).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(n) => affected += n,
            Err(e) => {
                return Err(Error::Query {
                    message: format!("insert row {} of {} failed: {}", i + 1, total, e),
                    sql: Some(sql.to_string()),
                    source: Some(Box::new(e)),
                });
            }
        }
        trace!(row = i + 1, total, "Row executed");
    }

    Ok(affected)
}

/// Default update: data parameters first, then condition arguments
pub async fn update<D: Driver + ?Sized>(
    driver: &D,
    link: Link<'_>,
    table: &str,
    data: Record,
    condition: &str,
    args: Vec<Param>,
    ctx: &StatementContext,
) -> Result<ExecResult> {
    if data.is_empty() {
        return Err(Error::query(format!("update of {} without data", table)));
    }
    let columns: Vec<&str> = data.keys().map(String::as_str).collect();
    let sql = driver.dialect().update_sql(table, &columns, condition)?;
    let params: Vec<Param> = data.values().cloned().chain(args).collect();

    driver.do_exec(link, &sql, params, ctx).await
}

/// Default delete
pub async fn delete<D: Driver + ?Sized>(
    driver: &D,
    link: Link<'_>,
    table: &str,
    condition: &str,
    args: Vec<Param>,
    ctx: &StatementContext,
) -> Result<ExecResult> {
    let sql = driver.dialect().delete_sql(table, condition)?;
    driver.do_exec(link, &sql, args, ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let err = with_timeout(Some(Duration::from_millis(10)), "query", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let value = with_timeout(None, "query", async { Ok::<_, Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_record_params_fill_missing_with_null() {
        let mut first = Record::new();
        first.insert("a".into(), Param::from(1i64));
        first.insert("b".into(), Param::from("x"));
        let mut second = Record::new();
        second.insert("a".into(), Param::from(2i64));

        let columns = record_columns("t", &[first, second.clone()]).unwrap();
        assert_eq!(columns, vec!["a".to_string(), "b".to_string()]);

        let params = record_params(&columns, &second);
        assert_eq!(params[0].as_value(), Some(&Value::Int64(2)));
        assert_eq!(params[1].as_value(), Some(&Value::Null));

        assert!(record_columns("t", &[]).is_err());
    }

    #[test]
    fn test_record_columns_rejects_new_column() {
        let mut first = Record::new();
        first.insert("a".into(), Param::from(1i64));
        let mut second = Record::new();
        second.insert("a".into(), Param::from(2i64));
        second.insert("c".into(), Param::from(3i64));

        let err = record_columns("t", &[first, second]).unwrap_err();
        assert!(err
            .to_string()
            .contains("record 2 for t has column 'c' missing from the first record"));
    }
}
