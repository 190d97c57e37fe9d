//! Value types for sqlbridge
//!
//! The canonical value model shared by the ORM core and every driver:
//! - Scalars (bool, signed/unsigned integers, floats, decimal)
//! - Temporal values with and without timezone
//! - Binary data, JSON documents and arrays
//!
//! Parameters bound to statements are [`Param`]s: either a plain [`Value`]
//! or a self-describing [`SqlValuer`] that renders itself on demand.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// SQL value type that can hold any database value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer
    Int8(i8),
    /// 16-bit signed integer
    Int16(i16),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit unsigned integer (ClickHouse `UInt*`)
    UInt64(u64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// Arbitrary precision decimal (NUMERIC, Decimal(P,S))
    Decimal(Decimal),
    /// Text string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Date without time
    Date(NaiveDate),
    /// Time without date
    Time(NaiveTime),
    /// Timestamp without timezone
    DateTime(NaiveDateTime),
    /// Timestamp with timezone
    DateTimeTz(DateTime<Utc>),
    /// UUID
    Uuid(Uuid),
    /// JSON document
    Json(serde_json::Value),
    /// Array of values
    Array(Vec<Value>),
}

/// `0001-01-01 00:00:00`, the ORM core's "unset" timestamp
pub fn zero_datetime() -> NaiveDateTime {
    match NaiveDate::from_ymd_opt(1, 1, 1) {
        Some(day) => day.and_time(NaiveTime::default()),
        None => NaiveDateTime::default(),
    }
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is the zero timestamp sentinel (naive or UTC)
    pub fn is_zero_time(&self) -> bool {
        match self {
            Self::DateTime(dt) => *dt == zero_datetime(),
            Self::DateTimeTz(dt) => dt.naive_utc() == zero_datetime(),
            _ => false,
        }
    }

    /// Get SQL type name
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int8(_) => "TINYINT",
            Self::Int16(_) => "SMALLINT",
            Self::Int32(_) => "INTEGER",
            Self::Int64(_) => "BIGINT",
            Self::UInt64(_) => "UBIGINT",
            Self::Float32(_) => "REAL",
            Self::Float64(_) => "DOUBLE PRECISION",
            Self::Decimal(_) => "DECIMAL",
            Self::String(_) => "VARCHAR",
            Self::Bytes(_) => "BYTEA",
            Self::Date(_) => "DATE",
            Self::Time(_) => "TIME",
            Self::DateTime(_) => "TIMESTAMP",
            Self::DateTimeTz(_) => "TIMESTAMPTZ",
            Self::Uuid(_) => "UUID",
            Self::Json(_) => "JSON",
            Self::Array(_) => "ARRAY",
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int8(n) => Some(*n != 0),
            Self::Int16(n) => Some(*n != 0),
            Self::Int32(n) => Some(*n != 0),
            Self::Int64(n) => Some(*n != 0),
            Self::UInt64(n) => Some(*n != 0),
            Self::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "yes" | "y" | "1" => Some(true),
                "false" | "f" | "no" | "n" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(n) => Some(i64::from(*n)),
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            Self::UInt64(n) => i64::try_from(*n).ok(),
            Self::Float32(n) if n.is_finite() => Some(*n as i64),
            Self::Float64(n) if n.is_finite() => Some(*n as i64),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            other => other.as_i64().and_then(|n| u64::try_from(n).ok()),
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int8(n) => Some(f64::from(*n)),
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::UInt64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to convert to bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b.as_slice()),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to convert to UUID
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            Self::String(s) => Uuid::parse_str(s).ok(),
            Self::Bytes(b) if b.len() == 16 => Uuid::from_slice(b).ok(),
            _ => None,
        }
    }

    /// Try to convert to JSON
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(j) => Some(j),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int8(n) => Some(n.to_string()),
            Self::Int16(n) => Some(n.to_string()),
            Self::Int32(n) => Some(n.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::UInt64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Uuid(u) => Some(u.to_string()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeTz(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// A value that knows how to render itself for the database
///
/// Implemented by application types (money, enums, wrapped ids) that should
/// be bound as parameters without the caller converting them first.
pub trait SqlValuer: Send + Sync + fmt::Debug {
    /// Produce the canonical value to bind
    fn sql_value(&self) -> Result<Value>;
}

/// A bindable statement parameter
#[derive(Debug, Clone)]
pub enum Param {
    /// A plain canonical value
    Value(Value),
    /// A self-describing value, rendered at bind time
    Valuer(Arc<dyn SqlValuer>),
}

impl Param {
    /// Wrap a self-describing value
    pub fn valuer(v: impl SqlValuer + 'static) -> Self {
        Self::Valuer(Arc::new(v))
    }

    /// Resolve to a plain value, consulting the valuer if needed
    pub fn resolve(&self) -> Result<Value> {
        match self {
            Self::Value(v) => Ok(v.clone()),
            Self::Valuer(v) => v.sql_value(),
        }
    }

    /// The plain value, if this parameter is not a valuer
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Valuer(_) => None,
        }
    }
}

impl<T: Into<Value>> From<T> for Param {
    fn from(v: T) -> Self {
        Self::Value(v.into())
    }
}

/// One row to insert: column name -> parameter, in column order
pub type Record = IndexMap<String, Param>;

/// Database row as ordered column values
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
    /// Declared column types, when the backend reports them
    types: Vec<String>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self {
            columns,
            values,
            types: Vec::new(),
        }
    }

    /// Create a row that carries the declared type of every column
    pub fn with_types(columns: Vec<String>, values: Vec<Value>, types: Vec<String>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        debug_assert_eq!(columns.len(), types.len());
        Self {
            columns,
            values,
            types,
        }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get all values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Declared type of the column at `idx`, if known
    pub fn column_type(&self, idx: usize) -> Option<&str> {
        self.types.get(idx).map(String::as_str)
    }

    /// Get value by column name (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a column as string, empty when missing or NULL
    pub fn get_string(&self, name: &str) -> String {
        self.get_by_name(name)
            .and_then(Value::as_string)
            .unwrap_or_default()
    }

    /// Get a column as bool, `false` when missing or NULL
    pub fn get_bool(&self, name: &str) -> bool {
        self.get_by_name(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Replace a value in place
    pub(crate) fn set(&mut self, idx: usize, value: Value) {
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = value;
        }
    }

    /// Convert row to HashMap
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

/// Role a column plays in the table's key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyRole {
    /// Not part of the primary key
    #[default]
    None,
    /// Part of the primary key
    Primary,
}

/// Column description returned by schema introspection
///
/// Built fresh on every call; never cached by a driver.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Column name
    pub name: String,
    /// Zero-based position
    pub index: usize,
    /// Raw backend type name, nullable wrapper removed
    pub type_name: String,
    /// Whether NULL is allowed
    pub nullable: bool,
    /// Raw default expression as reported by the catalog
    pub default: Value,
    /// Key role
    pub key: KeyRole,
    /// Column comment
    pub comment: String,
}

impl FieldDescriptor {
    /// Create a nullable, non-key descriptor
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: 0,
            type_name: type_name.into(),
            nullable: true,
            default: Value::Null,
            key: KeyRole::None,
            comment: String::new(),
        }
    }

    /// Whether this column is part of the primary key
    #[inline]
    pub fn is_primary_key(&self) -> bool {
        self.key == KeyRole::Primary
    }
}

/// Columns of a table by name, in catalog order
pub type TableFields = IndexMap<String, FieldDescriptor>;

/// The ORM core's canonical value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalType {
    /// Signed integer up to 32 bits
    Int,
    /// 64-bit signed integer
    Int64,
    /// Unsigned integer up to 32 bits
    Uint,
    /// 64-bit unsigned integer
    Uint64,
    /// Array of small signed integers
    IntSlice,
    /// Array of 64-bit signed integers
    Int64Slice,
    /// Array of strings
    StringSlice,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Arbitrary precision decimal
    Decimal,
    /// Boolean
    Bool,
    /// Text
    String,
    /// Raw bytes
    Bytes,
    /// Date only
    Date,
    /// Timestamp
    Time,
    /// UUID
    Uuid,
    /// JSON document
    Json,
    /// JSON stored in binary form
    JsonB,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int32(0).is_null());
    }

    #[test]
    fn test_zero_time_detection() {
        assert!(Value::DateTime(zero_datetime()).is_zero_time());
        assert!(Value::DateTimeTz(zero_datetime().and_utc()).is_zero_time());

        let now = Utc::now();
        assert!(!Value::DateTimeTz(now).is_zero_time());
        assert!(!Value::Null.is_zero_time());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::String("yes".into()).as_bool(), Some(true));
        assert_eq!(Value::UInt64(7).as_i64(), Some(7));
        assert_eq!(Value::UInt64(u64::MAX).as_i64(), None);
        assert_eq!(Value::Int32(42).as_u64(), Some(42));
        assert_eq!(Value::Float64(1.5).as_f64(), Some(1.5));
    }

    #[derive(Debug)]
    struct Cents(i64);

    impl SqlValuer for Cents {
        fn sql_value(&self) -> Result<Value> {
            Ok(Value::String(format!("{}.{:02}", self.0 / 100, self.0 % 100)))
        }
    }

    #[test]
    fn test_param_resolution() {
        let p: Param = 5_i64.into();
        assert_eq!(p.resolve().unwrap(), Value::Int64(5));
        assert!(p.as_value().is_some());

        let p = Param::valuer(Cents(1234));
        assert!(p.as_value().is_none());
        assert_eq!(p.resolve().unwrap(), Value::String("12.34".into()));
    }

    #[test]
    fn test_row_operations() {
        let row = Row::with_types(
            vec!["id".into(), "name".into()],
            vec![Value::Int32(1), Value::String("Alice".into())],
            vec!["int4".into(), "text".into()],
        );

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int32(1)));
        assert_eq!(row.get_by_name("NAME"), Some(&Value::String("Alice".into())));
        assert_eq!(row.column_type(1), Some("text"));
        assert_eq!(row.get_string("missing"), "");
    }

    #[test]
    fn test_field_descriptor_defaults() {
        let f = FieldDescriptor::new("id", "int8");
        assert!(f.nullable);
        assert!(!f.is_primary_key());
        assert_eq!(f.default, Value::Null);
    }
}
