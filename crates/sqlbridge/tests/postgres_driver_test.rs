//! PostgreSQL driver behaviour over an in-memory connection

#![cfg(feature = "postgres")]

mod common;

use common::{record, row, Calls, MockConnection};
use sqlbridge::postgres::PgDriver;
use sqlbridge::prelude::*;

fn driver() -> PgDriver {
    PgDriver::new(
        ConnectionConfig::new("localhost", "5432")
            .with_credentials("app", "secret")
            .with_name("orders"),
    )
}

fn catalog_column(name: &str, ty: &str, not_null: bool, key: &str) -> Row {
    row(&[
        ("field", Value::from(name)),
        ("type", Value::from(ty)),
        ("null", Value::Bool(not_null)),
        ("key", Value::from(key)),
        ("default_value", Value::Null),
        ("comment", Value::from("")),
    ])
}

// ==================== Statement filter ====================

#[tokio::test]
async fn test_select_numbers_placeholders_and_limit() {
    let conn = MockConnection::new();
    driver()
        .do_select(
            Link::Conn(&conn),
            "SELECT * FROM users WHERE id > ? AND name <> '?' LIMIT 10, 5",
            vec![Param::from(100i64)],
            &StatementContext::new(),
        )
        .await
        .unwrap();

    let (sql, params) = conn.statements().remove(0);
    assert_eq!(
        sql,
        "SELECT * FROM users WHERE id > $1 AND name <> '?' LIMIT 5 OFFSET 10"
    );
    assert_eq!(params, vec![Value::Int64(100)]);
}

#[tokio::test]
async fn test_zero_timestamp_binds_null() {
    let conn = MockConnection::new();
    let zero = sqlbridge::types::zero_datetime();
    driver()
        .do_exec(
            Link::Conn(&conn),
            "UPDATE users SET deleted_at = ? WHERE id = ?",
            vec![Param::from(zero), Param::from(1i64)],
            &StatementContext::new(),
        )
        .await
        .unwrap();

    let (sql, params) = conn.statements().remove(0);
    assert_eq!(sql, "UPDATE users SET deleted_at = $1 WHERE id = $2");
    assert_eq!(params, vec![Value::Null, Value::Int64(1)]);
}

#[tokio::test]
async fn test_update_is_never_a_mutation() {
    let conn = MockConnection::new();
    let result = driver()
        .do_update(
            Link::Conn(&conn),
            "public.users",
            record(&[("name", Value::from("ann"))]),
            "id = ?",
            vec![Param::from(3i64)],
            &StatementContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        conn.last_sql().unwrap(),
        r#"UPDATE "public"."users" SET "name" = $1 WHERE id = $2"#
    );
    assert_eq!(result.rows_affected, 1);
}

// ==================== Insert ====================

#[tokio::test]
async fn test_insert_and_get_id_uses_returning() {
    let conn = MockConnection::new();
    conn.reply(vec![
        catalog_column("id", "int8", true, "pri"),
        catalog_column("name", "varchar", false, ""),
    ]);
    conn.reply(vec![row(&[("id", Value::Int64(42))])]);

    let id = driver()
        .insert_and_get_id(
            Link::Conn(&conn),
            "users",
            record(&[("name", Value::from("ann"))]),
        )
        .await
        .unwrap();

    assert_eq!(id, 42);
    assert_eq!(
        conn.last_sql().unwrap(),
        r#"INSERT INTO "users" ("name") VALUES ($1) RETURNING "id""#
    );
    assert_eq!(Calls::get(&conn.calls().execute), 0);
}

#[tokio::test]
async fn test_non_integer_primary_key_reports_unsupported_id() {
    let conn = MockConnection::new();
    conn.reply(vec![catalog_column("id", "uuid", true, "pri")]);
    conn.reply(vec![row(&[("id", Value::from("5f0c..."))])]);

    let result = driver()
        .insert(
            Link::Conn(&conn),
            "users",
            vec![record(&[("name", Value::from("ann"))])],
        )
        .await
        .unwrap();

    assert_eq!(result.rows_affected, 1);
    let err = result.last_insert_id().unwrap_err();
    assert!(err.is_unsupported());
    assert!(err
        .to_string()
        .contains("LastInsertId is not supported by primary key type: uuid"));
}

#[tokio::test]
async fn test_insert_without_primary_key_executes_plainly() {
    let conn = MockConnection::new();
    conn.reply(vec![catalog_column("name", "text", false, "")]);

    let records = (0..12)
        .map(|i| record(&[("name", Value::from(format!("n{}", i)))]))
        .collect();
    let result = driver()
        .insert(Link::Conn(&conn), "logs", records)
        .await
        .unwrap();

    // 12 records -> one statement of 10 rows and one of 2
    assert_eq!(Calls::get(&conn.calls().execute), 2);
    assert_eq!(result.rows_affected, 2);
    let statements = conn.statements();
    assert_eq!(statements[1].1.len(), 10);
    assert_eq!(statements[2].1.len(), 2);
    assert!(statements[2].0.ends_with("VALUES ($1), ($2)"));
}

#[tokio::test]
async fn test_unsupported_insert_options() {
    let conn = MockConnection::new();
    let driver = driver();

    let err = driver
        .insert_ignore(Link::Conn(&conn), "users", vec![record(&[("id", Value::Int64(1))])])
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
    assert!(err
        .to_string()
        .contains("Insert ignore operation is not supported by pgsql driver"));

    let err = driver
        .save(Link::Conn(&conn), "users", vec![record(&[("id", Value::Int64(1))])])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Save operation is not supported"));

    assert_eq!(conn.calls().total(), 0);
}

// ==================== Transactions ====================

#[tokio::test]
async fn test_transaction_commits_on_success() {
    let conn = MockConnection::new();
    let body = tx_body(|tx| {
        Box::pin(async move {
            tx.execute("UPDATE accounts SET balance = 0", &[]).await?;
            Ok::<(), Error>(())
        })
    });

    driver().transaction(&conn, body).await.unwrap();
    assert_eq!(Calls::get(&conn.calls().commit), 1);
    assert_eq!(Calls::get(&conn.calls().rollback), 0);
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let conn = MockConnection::new();
    let body = tx_body(|_tx| Box::pin(async { Err::<(), Error>(Error::query("boom")) }));

    let err = driver().transaction(&conn, body).await.unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(Calls::get(&conn.calls().commit), 0);
    assert_eq!(Calls::get(&conn.calls().rollback), 1);
}

// ==================== Introspection ====================

#[tokio::test]
async fn test_tables_exclude_partitions_on_modern_servers() {
    let conn = MockConnection::new();
    conn.reply(vec![row(&[(
        "version",
        Value::from("PostgreSQL 14.5 on x86_64-pc-linux-gnu"),
    )])]);
    conn.reply(vec![
        row(&[("relname", Value::from("orders"))]),
        row(&[("relname", Value::from("users"))]),
    ]);

    let tables = driver().tables(Link::Conn(&conn), None).await.unwrap();
    assert_eq!(tables, vec!["orders".to_string(), "users".to_string()]);

    let statements = conn.statements();
    assert_eq!(statements[0].0, "SELECT version();");
    assert!(statements[1].0.contains("n.nspname = 'public'"));
    assert!(statements[1].0.contains("AND c.relpartbound IS NULL"));
}

#[tokio::test]
async fn test_tables_on_old_server_or_failed_probe() {
    let conn = MockConnection::new();
    conn.reply(vec![row(&[("version", Value::from("PostgreSQL 9.6.2"))])]);

    let driver = PgDriver::new(ConnectionConfig::new("h", "5432").with_namespace("sales"));
    driver.tables(Link::Conn(&conn), None).await.unwrap();

    let statements = conn.statements();
    assert!(statements[1].0.contains("n.nspname = 'sales'"));
    assert!(!statements[1].0.contains("relpartbound"));
}

#[tokio::test]
async fn test_table_fields_dedup_and_sequential_index() {
    let conn = MockConnection::new();
    conn.reply(vec![
        catalog_column("id", "int8", true, "pri"),
        catalog_column("id", "int8", true, ""),
        catalog_column("tags", "_int4", false, ""),
    ]);

    let fields = driver()
        .table_fields(Link::Conn(&conn), "public.items", None)
        .await
        .unwrap();

    assert_eq!(fields.len(), 2);
    assert!(fields["id"].is_primary_key());
    assert!(!fields["id"].nullable);
    assert_eq!(fields["id"].index, 0);
    assert_eq!(fields["tags"].index, 1);
    assert!(fields["tags"].nullable);
    assert!(conn.last_sql().unwrap().contains("nspname = 'public'"));
}

#[tokio::test]
async fn test_table_fields_default_to_configured_namespace() {
    let conn = MockConnection::new();
    conn.reply(vec![catalog_column("id", "int8", true, "pri")]);

    let driver = PgDriver::new(ConnectionConfig::new("h", "5432").with_namespace("sales"));
    driver
        .table_fields(Link::Conn(&conn), "items", None)
        .await
        .unwrap();
    assert!(conn.last_sql().unwrap().contains("nspname = 'sales'"));

    driver
        .table_fields(Link::Conn(&conn), "items", Some("archive"))
        .await
        .unwrap();
    assert!(conn.last_sql().unwrap().contains("nspname = 'archive'"));
}

#[tokio::test]
async fn test_select_coerces_postgres_arrays() {
    let conn = MockConnection::new();
    conn.reply(vec![common::typed_row(&[
        ("tags", "_int4", Value::from("{1,2,3}")),
        ("n", "int4", Value::Int32(5)),
    ])]);

    let rows = driver()
        .do_select(Link::Conn(&conn), "SELECT tags, n FROM items", Vec::new(), &StatementContext::new())
        .await
        .unwrap();

    assert_eq!(
        rows[0].get(0),
        Some(&Value::Array(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]))
    );
    assert_eq!(rows[0].get(1), Some(&Value::Int64(5)));
}
