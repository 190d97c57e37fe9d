//! Type conversion between backend column types and canonical values
//!
//! Outbound, parameters are normalized before binding (zero timestamps become
//! NULL, self-describing values render themselves). Inbound, raw column
//! values are coerced to the ORM's local kind, decided from the declared
//! column type name.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{LocalType, Param, Value};

/// A column type name with nullable/low-cardinality wrappers removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrappedType<'a> {
    /// Inner type name
    pub name: &'a str,
    /// Whether a `Nullable(..)` wrapper was present
    pub nullable: bool,
}

/// Strip `Nullable(T)` and `LowCardinality(T)` wrappers, in any nesting order
pub fn unwrap_type(raw: &str) -> UnwrappedType<'_> {
    let mut name = raw.trim();
    let mut nullable = false;
    loop {
        if let Some(inner) = strip_wrapper(name, "Nullable") {
            nullable = true;
            name = inner;
        } else if let Some(inner) = strip_wrapper(name, "LowCardinality") {
            name = inner;
        } else {
            return UnwrappedType { name, nullable };
        }
    }
}

fn strip_wrapper<'a>(name: &'a str, wrapper: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(wrapper)?;
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.trim())
}

/// Lower-cased type name without arguments: `numeric(10,2)` -> `numeric`
pub fn base_type_name(type_name: &str) -> String {
    let t = unwrap_type(type_name).name;
    let head = t.split('(').next().unwrap_or(t);
    head.trim().to_ascii_lowercase()
}

/// Mapping shared by all backends
pub fn generic_local_type(type_name: &str) -> LocalType {
    let base = base_type_name(type_name);
    match base.as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "serial" | "smallserial"
        | "int2" | "int4" => LocalType::Int,
        "bigint" | "bigserial" | "int8" => LocalType::Int64,
        "real" | "float" | "float4" => LocalType::Float32,
        "double" | "double precision" | "float8" => LocalType::Float64,
        "decimal" | "numeric" | "money" => LocalType::Decimal,
        "bool" | "boolean" => LocalType::Bool,
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
            LocalType::Bytes
        }
        "date" => LocalType::Date,
        "uuid" => LocalType::Uuid,
        "json" => LocalType::Json,
        "jsonb" => LocalType::JsonB,
        "_text" | "_varchar" | "_bpchar" => LocalType::StringSlice,
        b if b.starts_with("timestamp") || b.starts_with("datetime") => LocalType::Time,
        _ => LocalType::String,
    }
}

/// ClickHouse column type mapping
pub fn clickhouse_local_type(type_name: &str) -> LocalType {
    let t = unwrap_type(type_name).name;
    if let Some(inner) = t.strip_prefix("Array(").and_then(|r| r.strip_suffix(')')) {
        return match unwrap_type(inner).name {
            "Int8" | "Int16" | "Int32" => LocalType::IntSlice,
            "Int64" => LocalType::Int64Slice,
            "String" => LocalType::StringSlice,
            _ => LocalType::Json,
        };
    }
    match t {
        "Int8" | "Int16" | "Int32" => LocalType::Int,
        "Int64" => LocalType::Int64,
        "UInt8" | "UInt16" | "UInt32" => LocalType::Uint,
        "UInt64" => LocalType::Uint64,
        "Float32" => LocalType::Float32,
        "Float64" => LocalType::Float64,
        "Bool" => LocalType::Bool,
        "UUID" => LocalType::Uuid,
        "Date" | "Date32" => LocalType::Date,
        "String" => LocalType::String,
        t if t.starts_with("Decimal") => LocalType::Decimal,
        t if t.starts_with("DateTime") => LocalType::Time,
        t if t.starts_with("FixedString") || t.starts_with("Enum") => LocalType::String,
        _ => generic_local_type(t),
    }
}

/// PostgreSQL column type mapping
pub fn postgres_local_type(type_name: &str) -> LocalType {
    match base_type_name(type_name).as_str() {
        "int2" | "int4" => LocalType::Int,
        "int8" => LocalType::Int64,
        "_int2" | "_int4" => LocalType::IntSlice,
        "_int8" => LocalType::Int64Slice,
        _ => generic_local_type(type_name),
    }
}

/// Normalize an outbound parameter for binding
///
/// NULL and the zero timestamp become NULL; self-describing values are
/// rendered (their error propagates); everything else passes through.
pub fn convert_value_for_field(_field_type: &str, param: &Param) -> Result<Value> {
    let value = param.resolve()?;
    if value.is_zero_time() {
        return Ok(Value::Null);
    }
    Ok(value)
}

/// Coerce an inbound value to the given local kind
///
/// Values whose shape does not fit the kind are returned as-is; text that
/// claims to be a number or timestamp but does not parse is an error.
pub fn coerce(local: LocalType, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match local {
        LocalType::Int | LocalType::Int64 => match value {
            Value::Int64(_) => Ok(value),
            Value::String(ref s) => parse_number::<i64>(s).map(Value::Int64),
            other => Ok(other.as_i64().map(Value::Int64).unwrap_or(other)),
        },
        LocalType::Uint | LocalType::Uint64 => match value {
            Value::UInt64(_) => Ok(value),
            Value::String(ref s) => parse_number::<u64>(s).map(Value::UInt64),
            other => Ok(other.as_u64().map(Value::UInt64).unwrap_or(other)),
        },
        LocalType::Float32 => match value {
            Value::String(ref s) => parse_number::<f32>(s).map(Value::Float32),
            other => Ok(other
                .as_f64()
                .map(|f| Value::Float32(f as f32))
                .unwrap_or(other)),
        },
        LocalType::Float64 => match value {
            Value::String(ref s) => parse_number::<f64>(s).map(Value::Float64),
            other => Ok(other.as_f64().map(Value::Float64).unwrap_or(other)),
        },
        LocalType::Decimal => match value {
            Value::Decimal(_) => Ok(value),
            Value::String(ref s) => Decimal::from_str(s.trim())
                .map(Value::Decimal)
                .map_err(|e| Error::type_conversion(format!("invalid decimal '{}': {}", s, e))),
            Value::Int64(n) => Ok(Value::Decimal(Decimal::from(n))),
            Value::Int32(n) => Ok(Value::Decimal(Decimal::from(n))),
            Value::UInt64(n) => Ok(Value::Decimal(Decimal::from(n))),
            Value::Float64(f) => Ok(Decimal::try_from(f)
                .map(Value::Decimal)
                .unwrap_or(Value::Float64(f))),
            other => Ok(other),
        },
        LocalType::Bool => Ok(value.as_bool().map(Value::Bool).unwrap_or(value)),
        LocalType::IntSlice | LocalType::Int64Slice => coerce_int_array(value),
        LocalType::Date => match value {
            Value::String(ref s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| Error::type_conversion(format!("invalid date '{}': {}", s, e))),
            other => Ok(other),
        },
        LocalType::Time => match value {
            Value::String(ref s) => parse_timestamp(s),
            other => Ok(other),
        },
        LocalType::Uuid => Ok(value.as_uuid().map(Value::Uuid).unwrap_or(value)),
        LocalType::Json | LocalType::JsonB => match value {
            Value::String(ref s) => serde_json::from_str(s)
                .map(Value::Json)
                .map_err(|e| Error::type_conversion(format!("invalid JSON: {}", e))),
            Value::Bytes(ref b) => serde_json::from_slice(b)
                .map(Value::Json)
                .map_err(|e| Error::type_conversion(format!("invalid JSON: {}", e))),
            other => Ok(other),
        },
        LocalType::String => match value {
            Value::String(_) | Value::Bytes(_) | Value::Json(_) | Value::Array(_) => Ok(value),
            other => Ok(other.as_string().map(Value::String).unwrap_or(other)),
        },
        LocalType::StringSlice | LocalType::Bytes => Ok(value),
    }
}

fn parse_number<T>(s: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.trim()
        .parse::<T>()
        .map_err(|e| Error::type_conversion(format!("invalid number '{}': {}", s, e)))
}

fn coerce_int_array(value: Value) -> Result<Value> {
    let items = match value {
        Value::Array(items) => items,
        Value::Json(serde_json::Value::Array(items)) => {
            items.into_iter().map(json_to_value).collect()
        }
        // PostgreSQL text form `{1,2,3}`
        Value::String(s) => {
            let normalized = s.replace('{', "[").replace('}', "]");
            let parsed: Vec<i64> = serde_json::from_str(&normalized).map_err(|e| {
                Error::type_conversion(format!("invalid integer array '{}': {}", s, e))
            })?;
            return Ok(Value::Array(parsed.into_iter().map(Value::Int64).collect()));
        }
        other => return Ok(other),
    };

    items
        .into_iter()
        .map(|item| coerce(LocalType::Int64, item))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn parse_timestamp(s: &str) -> Result<Value> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Value::DateTimeTz(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(Value::DateTimeTz(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Value::DateTime(dt));
        }
    }
    Err(Error::type_conversion(format!("invalid timestamp '{}'", s)))
}

/// Canonical value for a decoded JSON scalar/array
pub fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int64(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt64(u)
            } else {
                n.as_f64().map(Value::Float64).unwrap_or(Value::Null)
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_value).collect())
        }
        obj @ serde_json::Value::Object(_) => Value::Json(obj),
    }
}

/// Plain JSON rendering of a canonical value
pub fn to_json_value(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int8(n) => Json::from(*n),
        Value::Int16(n) => Json::from(*n),
        Value::Int32(n) => Json::from(*n),
        Value::Int64(n) => Json::from(*n),
        Value::UInt64(n) => Json::from(*n),
        Value::Float32(f) => serde_json::Number::from_f64(f64::from(*f))
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Float64(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Decimal(d) => Json::String(d.to_string()),
        Value::String(s) => Json::String(s.clone()),
        Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::Date(d) => Json::String(d.to_string()),
        Value::Time(t) => Json::String(t.to_string()),
        Value::DateTime(dt) => Json::String(dt.to_string()),
        Value::DateTimeTz(dt) => Json::String(dt.to_rfc3339()),
        Value::Uuid(u) => Json::String(u.to_string()),
        Value::Json(j) => j.clone(),
        Value::Array(items) => Json::Array(items.iter().map(to_json_value).collect()),
    }
}

/// Opaque binary JSON for a value
///
/// Strings and bytes are taken to already be JSON text and are returned
/// verbatim; anything else is encoded.
pub fn to_json_bytes(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Bytes(b) => Ok(b.clone()),
        other => serde_json::to_vec(&to_json_value(other))
            .map_err(|e| Error::type_conversion(format!("cannot encode JSON: {}", e))),
    }
}

/// Decode a value holding a JSON object into a map
pub fn to_json_map(value: &Value) -> Result<serde_json::Map<String, serde_json::Value>> {
    let json = match value {
        Value::Json(j) => j.clone(),
        Value::Null => return Ok(serde_json::Map::new()),
        other => serde_json::from_slice(&to_json_bytes(other)?)
            .map_err(|e| Error::type_conversion(format!("invalid JSON: {}", e)))?,
    };
    match json {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        other => Err(Error::type_conversion(format!(
            "expected JSON object, found {}",
            other
        ))),
    }
}
