//! PostgreSQL backend for sqlbridge
//!
//! Built on `tokio-postgres`:
//! - Bound values adapt to the parameter types the server inferred, so an
//!   `Int64` binds cleanly to an `int4` column and text binds to `uuid`
//! - Rows carry declared type names; enums and citext are read as text,
//!   money and interval are decoded explicitly, and any other unmapped type
//!   fails the read instead of yielding raw bytes
//! - Insert-and-get-id appends `RETURNING <pk>` once the primary key is known

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::{NoExpand, Regex};
use rust_decimal::Decimal;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::NoTls;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::connection::{
    redact_dsn, Connection, ConnectionConfig, DatabaseType, PreparedStatement, Transaction,
};
use crate::convert::{postgres_local_type, to_json_value};
use crate::dialect::{PostgresDialect, SqlDialect};
use crate::driver::{Driver, ExecResult, InsertId, InsertOption, Link, StatementContext};
use crate::error::{Error, ErrorCode, Result};
use crate::executor;
use crate::registry::DriverFactory;
use crate::rewrite::rewrite_postgres;
use crate::schema::{
    compare_version, normalize_fields, parse_server_version, postgres_catalog_column,
    postgres_columns_sql, postgres_tables_sql, OrdinalBase, POSTGRES_PARTITION_VERSION,
    POSTGRES_VERSION_SQL,
};
use crate::security::split_table_reference;
use crate::types::{FieldDescriptor, LocalType, Param, Record, Row, TableFields, Value};

/// Registry name of this driver
pub const DRIVER_NAME: &str = "pgsql";

/// Schema listed when neither the caller nor the config names one
const DEFAULT_SCHEMA: &str = "public";

type BoxError = Box<dyn std::error::Error + Sync + Send>;

// ---------------------------------------------------------------------------
// DSN
// ---------------------------------------------------------------------------

static LINK_DBNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"dbname=([\w\.\-]+)+").unwrap());

/// Quote a key/value DSN value when libpq-style parsing would split it
fn dsn_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value.contains(|c: char| c.is_whitespace() || c == '\'' || c == '\\');
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Assemble the key/value connection string
///
/// A legacy link is used verbatim, except that a configured database name
/// replaces its `dbname=..` pair.
pub fn build_dsn(config: &ConnectionConfig) -> String {
    if config.uses_link() {
        if config.name.is_empty() {
            return config.link.clone();
        }
        let replacement = format!("dbname={}", config.name);
        return LINK_DBNAME
            .replace_all(&config.link, NoExpand(&replacement))
            .into_owned();
    }

    let mut pairs = vec![
        format!("user={}", dsn_value(&config.user)),
        format!("password={}", dsn_value(&config.pass)),
        format!("host={}", dsn_value(&config.host)),
        format!("port={}", dsn_value(&config.port)),
    ];
    if !config.name.is_empty() {
        pairs.push(format!("dbname={}", dsn_value(&config.name)));
    }
    pairs.push("sslmode=disable".to_string());
    if !config.namespace.is_empty() {
        pairs.push(format!("search_path={}", dsn_value(&config.namespace)));
    }
    if !config.timezone.is_empty() {
        pairs.push(format!("timezone={}", dsn_value(&config.timezone)));
    }
    for (key, value) in url::form_urlencoded::parse(config.extra.as_bytes()) {
        if key.is_empty() {
            continue;
        }
        pairs.push(format!("{}={}", key, dsn_value(&value)));
    }

    pairs.join(" ")
}

// ---------------------------------------------------------------------------
// Outbound values
// ---------------------------------------------------------------------------

/// A bound value that encodes itself for whatever type the server inferred
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        encode(self.0, ty, out)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn mismatch(what: &str, ty: &Type) -> BoxError {
    format!("cannot bind {} to a parameter of type {}", what, ty).into()
}

fn encode(value: &Value, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match value {
        Value::Null => Ok(IsNull::Yes),
        Value::Bool(b) => match *ty {
            Type::BOOL => b.to_sql(ty, out),
            _ => encode_text(&b.to_string(), ty, out),
        },
        Value::Int8(n) => encode_int(i64::from(*n), ty, out),
        Value::Int16(n) => encode_int(i64::from(*n), ty, out),
        Value::Int32(n) => encode_int(i64::from(*n), ty, out),
        Value::Int64(n) => encode_int(*n, ty, out),
        Value::UInt64(n) => encode_int(i64::try_from(*n)?, ty, out),
        Value::Float32(n) => encode_float(f64::from(*n), ty, out),
        Value::Float64(n) => encode_float(*n, ty, out),
        Value::Decimal(d) => match *ty {
            Type::NUMERIC => d.to_sql(ty, out),
            Type::FLOAT4 | Type::FLOAT8 => encode_float(d.to_string().parse()?, ty, out),
            _ => encode_text(&d.to_string(), ty, out),
        },
        Value::String(s) => encode_text(s, ty, out),
        Value::Bytes(b) => match *ty {
            Type::JSON | Type::JSONB => {
                serde_json::from_slice::<serde_json::Value>(b)?.to_sql(ty, out)
            }
            Type::BYTEA => b.as_slice().to_sql(ty, out),
            _ if is_text(ty) => encode_text(std::str::from_utf8(b)?, ty, out),
            _ => Err(mismatch("bytes", ty)),
        },
        Value::Date(d) => match *ty {
            Type::DATE => d.to_sql(ty, out),
            Type::TIMESTAMP => d.and_time(NaiveTime::default()).to_sql(ty, out),
            Type::TIMESTAMPTZ => d.and_time(NaiveTime::default()).and_utc().to_sql(ty, out),
            _ if is_text(ty) => d.to_string().to_sql(ty, out),
            _ => Err(mismatch("a date", ty)),
        },
        Value::Time(t) => match *ty {
            Type::TIME => t.to_sql(ty, out),
            _ if is_text(ty) => t.to_string().to_sql(ty, out),
            _ => Err(mismatch("a time", ty)),
        },
        Value::DateTime(dt) => match *ty {
            Type::TIMESTAMP => dt.to_sql(ty, out),
            Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
            Type::DATE => dt.date().to_sql(ty, out),
            _ if is_text(ty) => dt.to_string().to_sql(ty, out),
            _ => Err(mismatch("a timestamp", ty)),
        },
        Value::DateTimeTz(dt) => match *ty {
            Type::TIMESTAMPTZ => dt.to_sql(ty, out),
            Type::TIMESTAMP => dt.naive_utc().to_sql(ty, out),
            Type::DATE => dt.date_naive().to_sql(ty, out),
            _ if is_text(ty) => dt.to_rfc3339().to_sql(ty, out),
            _ => Err(mismatch("a timestamp", ty)),
        },
        Value::Uuid(u) => match *ty {
            Type::UUID => u.to_sql(ty, out),
            _ if is_text(ty) => u.to_string().to_sql(ty, out),
            _ => Err(mismatch("a uuid", ty)),
        },
        Value::Json(j) => match *ty {
            Type::JSON | Type::JSONB => j.to_sql(ty, out),
            _ if is_text(ty) => j.to_string().to_sql(ty, out),
            _ => Err(mismatch("json", ty)),
        },
        Value::Array(items) => encode_array(items, ty, out),
    }
}

fn encode_int(n: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(n)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(n)?.to_sql(ty, out),
        Type::INT8 => n.to_sql(ty, out),
        Type::OID => u32::try_from(n)?.to_sql(ty, out),
        Type::FLOAT4 => (n as f32).to_sql(ty, out),
        Type::FLOAT8 => (n as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(n).to_sql(ty, out),
        Type::BOOL => (n != 0).to_sql(ty, out),
        _ if is_text(ty) => n.to_string().to_sql(ty, out),
        _ => Err(mismatch("an integer", ty)),
    }
}

fn encode_float(n: f64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (n as f32).to_sql(ty, out),
        Type::FLOAT8 => n.to_sql(ty, out),
        Type::NUMERIC => Decimal::try_from(n)?.to_sql(ty, out),
        _ if is_text(ty) => n.to_string().to_sql(ty, out),
        _ => Err(mismatch("a float", ty)),
    }
}

fn parse_timestamp(s: &str) -> std::result::Result<NaiveDateTime, BoxError> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::default())))
        .map_err(Into::into)
}

fn encode_text(s: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => s.trim().parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => s.trim().parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => s.trim().parse::<i64>()?.to_sql(ty, out),
        Type::FLOAT4 => s.trim().parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => s.trim().parse::<Decimal>()?.to_sql(ty, out),
        Type::BOOL => match Value::String(s.to_string()).as_bool() {
            Some(b) => b.to_sql(ty, out),
            None => Err(format!("invalid boolean literal '{}'", s).into()),
        },
        Type::UUID => Uuid::parse_str(s.trim())?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(s)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => match DateTime::parse_from_rfc3339(s.trim()) {
            Ok(dt) => dt.with_timezone(&Utc).to_sql(ty, out),
            Err(_) => parse_timestamp(s)?.and_utc().to_sql(ty, out),
        },
        Type::JSON | Type::JSONB => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(json) => json.to_sql(ty, out),
            Err(_) => serde_json::Value::String(s.to_string()).to_sql(ty, out),
        },
        Type::BYTEA => s.as_bytes().to_sql(ty, out),
        // text-like and types whose binary form is their text (enums, citext)
        _ => s.to_sql(ty, out),
    }
}

fn elements<T>(
    items: &[Value],
    what: &str,
    ty: &Type,
    f: impl Fn(&Value) -> Option<T>,
) -> std::result::Result<Vec<Option<T>>, BoxError> {
    items
        .iter()
        .map(|item| match item {
            Value::Null => Ok(None),
            other => f(other).map(Some).ok_or_else(|| mismatch(what, ty)),
        })
        .collect()
}

fn encode_array(
    items: &[Value],
    ty: &Type,
    out: &mut BytesMut,
) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2_ARRAY => elements(items, "an array element", ty, |v| {
            v.as_i64().and_then(|n| i16::try_from(n).ok())
        })?
        .to_sql(ty, out),
        Type::INT4_ARRAY => elements(items, "an array element", ty, |v| {
            v.as_i64().and_then(|n| i32::try_from(n).ok())
        })?
        .to_sql(ty, out),
        Type::INT8_ARRAY => elements(items, "an array element", ty, Value::as_i64)?.to_sql(ty, out),
        Type::FLOAT8_ARRAY => {
            elements(items, "an array element", ty, Value::as_f64)?.to_sql(ty, out)
        }
        Type::BOOL_ARRAY => elements(items, "an array element", ty, Value::as_bool)?.to_sql(ty, out),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            elements(items, "an array element", ty, Value::as_string)?.to_sql(ty, out)
        }
        Type::JSON | Type::JSONB => to_json_value(&Value::Array(items.to_vec())).to_sql(ty, out),
        _ => Err(mismatch("an array", ty)),
    }
}

fn bind(params: &[Value]) -> Vec<PgParam<'_>> {
    params.iter().map(PgParam).collect()
}

fn param_refs<'a>(bound: &'a [PgParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

// ---------------------------------------------------------------------------
// Inbound rows
// ---------------------------------------------------------------------------

/// A column value decoded from the binary wire format
struct PgValue(Value);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        decode(ty, raw).map(PgValue)
    }

    fn from_sql_null(_ty: &Type) -> std::result::Result<Self, BoxError> {
        Ok(PgValue(Value::Null))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Result<Row> {
    let mut columns = Vec::with_capacity(pg_row.len());
    let mut values = Vec::with_capacity(pg_row.len());
    let mut types = Vec::with_capacity(pg_row.len());

    for (i, col) in pg_row.columns().iter().enumerate() {
        let PgValue(value) = pg_row.try_get::<_, PgValue>(i).map_err(|e| {
            Error::type_conversion(format!("cannot decode column '{}': {}", col.name(), e))
        })?;
        columns.push(col.name().to_string());
        values.push(value);
        types.push(col.type_().name().to_string());
    }

    Ok(Row::with_types(columns, values, types))
}

fn array<'a, T: FromSql<'a>>(
    ty: &Type,
    raw: &'a [u8],
    f: impl Fn(T) -> Value,
) -> std::result::Result<Value, BoxError> {
    let items = Vec::<Option<T>>::from_sql(ty, raw)?;
    Ok(Value::Array(
        items
            .into_iter()
            .map(|item| item.map(&f).unwrap_or(Value::Null))
            .collect(),
    ))
}

/// Types whose binary form is their text form
fn is_text_like(ty: &Type) -> bool {
    matches!(ty.kind(), Kind::Enum(_)) || ty.name() == "citext" || *ty == Type::XML
}

fn decode(ty: &Type, raw: &[u8]) -> std::result::Result<Value, BoxError> {
    if let Kind::Domain(inner) = ty.kind() {
        return decode(inner, raw);
    }

    let value = match *ty {
        Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
        Type::CHAR => Value::Int8(i8::from_sql(ty, raw)?),
        Type::INT2 => Value::Int16(i16::from_sql(ty, raw)?),
        Type::INT4 => Value::Int32(i32::from_sql(ty, raw)?),
        Type::INT8 => Value::Int64(i64::from_sql(ty, raw)?),
        Type::OID => Value::Int64(i64::from(u32::from_sql(ty, raw)?)),
        Type::FLOAT4 => Value::Float32(f32::from_sql(ty, raw)?),
        Type::FLOAT8 => Value::Float64(f64::from_sql(ty, raw)?),
        Type::NUMERIC => Value::Decimal(Decimal::from_sql(ty, raw)?),
        // int8 cents; lc_monetary scales other than 2 are not represented
        Type::MONEY => Value::Decimal(Decimal::new(i64::from_sql(&Type::INT8, raw)?, 2)),
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Value::String(String::from_sql(ty, raw)?)
        }
        Type::BYTEA => Value::Bytes(Vec::<u8>::from_sql(ty, raw)?),
        Type::DATE => Value::Date(NaiveDate::from_sql(ty, raw)?),
        Type::TIME => Value::Time(NaiveTime::from_sql(ty, raw)?),
        Type::TIMESTAMP => Value::DateTime(NaiveDateTime::from_sql(ty, raw)?),
        Type::TIMESTAMPTZ => Value::DateTimeTz(DateTime::<Utc>::from_sql(ty, raw)?),
        Type::INTERVAL => Value::String(interval_text(raw)?),
        Type::UUID => Value::Uuid(Uuid::from_sql(ty, raw)?),
        Type::INET => Value::String(IpAddr::from_sql(ty, raw)?.to_string()),
        Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
        Type::INT2_ARRAY => array(ty, raw, Value::Int16)?,
        Type::INT4_ARRAY => array(ty, raw, Value::Int32)?,
        Type::INT8_ARRAY => array(ty, raw, Value::Int64)?,
        Type::FLOAT4_ARRAY => array(ty, raw, Value::Float32)?,
        Type::FLOAT8_ARRAY => array(ty, raw, Value::Float64)?,
        Type::NUMERIC_ARRAY => array(ty, raw, Value::Decimal)?,
        Type::BOOL_ARRAY => array(ty, raw, Value::Bool)?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY => {
            array(ty, raw, Value::String)?
        }
        Type::UUID_ARRAY => array(ty, raw, Value::Uuid)?,
        Type::DATE_ARRAY => array(ty, raw, Value::Date)?,
        Type::TIMESTAMP_ARRAY => array(ty, raw, Value::DateTime)?,
        Type::TIMESTAMPTZ_ARRAY => array(ty, raw, Value::DateTimeTz)?,
        Type::JSON_ARRAY | Type::JSONB_ARRAY => array(ty, raw, Value::Json)?,
        _ if is_text_like(ty) => Value::String(String::from_utf8(raw.to_vec())?),
        _ => return Err(format!("unsupported column type {}", ty.name()).into()),
    };
    Ok(value)
}

/// Render a binary interval (micros, days, months) in the server's default style
fn interval_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    if raw.len() != 16 {
        return Err(format!("invalid interval length {}", raw.len()).into());
    }
    let micros = i64::from_be_bytes(raw[..8].try_into()?);
    let days = i32::from_be_bytes(raw[8..12].try_into()?);
    let months = i32::from_be_bytes(raw[12..].try_into()?);

    let unit = |n: i32, name: &str| format!("{} {}{}", n, name, if n == 1 { "" } else { "s" });
    let mut parts = Vec::new();
    if months / 12 != 0 {
        parts.push(unit(months / 12, "year"));
    }
    if months % 12 != 0 {
        parts.push(unit(months % 12, "mon"));
    }
    if days != 0 {
        parts.push(unit(days, "day"));
    }
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let abs = micros.unsigned_abs();
        let secs = abs / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let frac = abs % 1_000_000;
        if frac != 0 {
            time.push_str(format!(".{:06}", frac).trim_end_matches('0'));
        }
        parts.push(time);
    }
    Ok(parts.join(" "))
}

fn query_error(e: tokio_postgres::Error, sql: &str) -> Error {
    Error::Query {
        message: e.to_string(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(e)),
    }
}

fn transaction_error(e: tokio_postgres::Error) -> Error {
    Error::Transaction {
        message: e.to_string(),
        source: Some(Box::new(e)),
    }
}

/// Reinterpret a server-side failure as its SQLSTATE and message
fn backend_error(e: tokio_postgres::Error) -> Error {
    match e.as_db_error() {
        Some(db) => Error::backend(db.code().code(), db.message()),
        None => Error::connection_with_source("ping failed", e),
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: Arc<tokio_postgres::Client>,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client: Arc::new(client),
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let bound = bind(params);
        let pg_rows = self
            .client
            .query(sql, &param_refs(&bound))
            .await
            .map_err(|e| query_error(e, sql))?;

        pg_rows.iter().map(pg_row_to_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let bound = bind(params);
        self.client
            .execute(sql, &param_refs(&bound))
            .await
            .map_err(|e| query_error(e, sql))
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        self.ensure_open()?;
        prepare_on(&self.client, sql).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.ensure_open()?;
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(transaction_error)?;

        trace!("PostgreSQL transaction started");
        Ok(Box::new(PgTransaction {
            client: Arc::clone(&self.client),
            finished: AtomicBool::new(false),
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(backend_error)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

async fn prepare_on(
    client: &Arc<tokio_postgres::Client>,
    sql: &str,
) -> Result<Box<dyn PreparedStatement>> {
    let statement = client.prepare(sql).await.map_err(|e| query_error(e, sql))?;

    Ok(Box::new(PgPreparedStatement {
        client: Arc::clone(client),
        statement,
        sql: sql.to_string(),
    }))
}

/// PostgreSQL prepared statement
pub struct PgPreparedStatement {
    client: Arc<tokio_postgres::Client>,
    statement: tokio_postgres::Statement,
    sql: String,
}

#[async_trait]
impl PreparedStatement for PgPreparedStatement {
    async fn execute(&self, params: &[Value]) -> Result<u64> {
        let bound = bind(params);
        self.client
            .execute(&self.statement, &param_refs(&bound))
            .await
            .map_err(|e| query_error(e, &self.sql))
    }

    async fn query(&self, params: &[Value]) -> Result<Vec<Row>> {
        let bound = bind(params);
        let pg_rows = self
            .client
            .query(&self.statement, &param_refs(&bound))
            .await
            .map_err(|e| query_error(e, &self.sql))?;

        pg_rows.iter().map(pg_row_to_row).collect()
    }

    fn sql(&self) -> &str {
        &self.sql
    }
}

/// PostgreSQL transaction
///
/// Dropped without commit or rollback, it issues a best-effort `ROLLBACK`
/// on the current runtime.
pub struct PgTransaction {
    client: Arc<tokio_postgres::Client>,
    finished: AtomicBool,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let bound = bind(params);
        let pg_rows = self
            .client
            .query(sql, &param_refs(&bound))
            .await
            .map_err(|e| query_error(e, sql))?;

        pg_rows.iter().map(pg_row_to_row).collect()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let bound = bind(params);
        self.client
            .execute(sql, &param_refs(&bound))
            .await
            .map_err(|e| query_error(e, sql))
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        prepare_on(&self.client, sql).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(transaction_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finished.store(true, Ordering::Release);
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(transaction_error)
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = Arc::clone(&self.client);
            handle.spawn(async move {
                if let Err(e) = client.batch_execute("ROLLBACK").await {
                    warn!(error = %e, "Rollback of abandoned transaction failed");
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// PostgreSQL driver
#[derive(Debug, Clone)]
pub struct PgDriver {
    config: ConnectionConfig,
    dialect: PostgresDialect,
}

impl PgDriver {
    /// Create a driver; no I/O happens until [`Driver::open`]
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            dialect: PostgresDialect,
        }
    }

    /// `major.minor` of the server, `None` when the probe fails
    async fn server_version(&self, link: Link<'_>) -> Option<String> {
        match self
            .do_select(link, POSTGRES_VERSION_SQL, Vec::new(), &StatementContext::new())
            .await
        {
            Ok(rows) => rows
                .first()
                .map(|row| row.get_string("version"))
                .and_then(|text| parse_server_version(&text)),
            Err(e) => {
                debug!(error = %e, "Server version probe failed");
                None
            }
        }
    }
}

#[async_trait]
impl Driver for PgDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &self.dialect
    }

    async fn open(&self) -> Result<Arc<dyn Connection>> {
        let dsn = build_dsn(&self.config);
        let (client, connection) = tokio_postgres::connect(&dsn, NoTls)
            .await
            .map_err(|e| open_error(&dsn, e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        debug!(
            driver = DRIVER_NAME,
            dsn = %redact_dsn(&dsn),
            "Opened PostgreSQL connection"
        );
        Ok(Arc::new(PgConnection::new(client)))
    }

    fn do_filter(
        &self,
        sql: &str,
        params: Vec<Param>,
        ctx: &StatementContext,
    ) -> Result<(String, Vec<Param>)> {
        rewrite_postgres(sql, params, ctx)
    }

    async fn do_exec(
        &self,
        link: Link<'_>,
        sql: &str,
        params: Vec<Param>,
        ctx: &StatementContext,
    ) -> Result<ExecResult> {
        let pk = match &ctx.primary_key {
            Some(pk) if !pk.name.is_empty() && sql.contains("INSERT INTO") => pk,
            _ => return executor::exec(self, link, sql, params, ctx).await,
        };

        let returning = format!(
            "{} RETURNING {}",
            sql,
            self.dialect.quote_identifier(&pk.name)
        );
        let rows = self.do_select(link, &returning, params, ctx).await?;
        let result = ExecResult::new(rows.len() as u64);

        if !pk.type_name.contains("int") {
            return Ok(result.with_insert_id(InsertId::Unsupported(format!(
                "LastInsertId is not supported by primary key type: {}",
                pk.type_name
            ))));
        }

        let id = rows
            .last()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64);
        Ok(match id {
            Some(id) => result.with_insert_id(InsertId::Value(id)),
            None => result,
        })
    }

    async fn do_insert(
        &self,
        link: Link<'_>,
        table: &str,
        records: Vec<Record>,
        option: InsertOption,
        ctx: &StatementContext,
    ) -> Result<ExecResult> {
        self.capabilities().check(option.operation())?;

        let mut ctx = ctx.clone();
        if option == InsertOption::Default && ctx.primary_key.is_none() {
            match self.table_fields(link, table, None).await {
                Ok(fields) => {
                    ctx.primary_key = fields.into_values().find(FieldDescriptor::is_primary_key);
                }
                Err(e) => trace!(table, error = %e, "Primary key lookup skipped"),
            }
        }

        executor::insert(self, link, table, records, option, &ctx).await
    }

    async fn tables(&self, link: Link<'_>, schema: Option<&str>) -> Result<Vec<String>> {
        let schema = schema
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.config.namespace.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or(DEFAULT_SCHEMA)
            .to_string();

        let exclude_partitions = self
            .server_version(link)
            .await
            .is_some_and(|version| compare_version(&version, POSTGRES_PARTITION_VERSION).is_ge());

        let sql = postgres_tables_sql(&schema, exclude_partitions);
        let rows = self
            .do_select(link, &sql, Vec::new(), &StatementContext::new())
            .await?;
        Ok(rows.iter().map(|row| row.get_string("relname")).collect())
    }

    async fn table_fields(
        &self,
        link: Link<'_>,
        table: &str,
        schema: Option<&str>,
    ) -> Result<TableFields> {
        let (qualifier, table) = split_table_reference(table)?;
        let schema = schema
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or(qualifier)
            .or_else(|| Some(self.config.namespace.clone()).filter(|s| !s.is_empty()));
        let sql = postgres_columns_sql(&table, schema.as_deref());
        let rows = self
            .do_select(link, &sql, Vec::new(), &StatementContext::new())
            .await?;

        let columns = rows.iter().map(postgres_catalog_column).collect();
        Ok(normalize_fields(columns, OrdinalBase::Sequential))
    }

    fn check_local_type(&self, field_type: &str) -> LocalType {
        postgres_local_type(field_type)
    }
}

fn open_error(source: &str, cause: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::operation(
        ErrorCode::DbOperationError,
        format!(
            "open failed for driver \"{}\" by source \"{}\"",
            DRIVER_NAME,
            redact_dsn(source)
        ),
        cause,
    )
}

/// Factory registered as `pgsql`
#[derive(Debug, Clone, Copy, Default)]
pub struct PgDriverFactory;

impl DriverFactory for PgDriverFactory {
    fn create(&self, config: ConnectionConfig) -> Result<Arc<dyn Driver>> {
        Ok(Arc::new(PgDriver::new(config)))
    }
}
