//! Schema discovery for sqlbridge
//!
//! Provides:
//! - Catalog SQL for ClickHouse (`system.tables`, `system.columns`) and
//!   PostgreSQL (`pg_class`, `pg_attribute`, ...)
//! - Normalization of raw catalog rows into [`TableFields`]: nullable
//!   wrapper removal, first-seen deduplication, per-backend ordinal policy
//! - Server version parsing for version-dependent catalog shapes

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::convert::unwrap_type;
use crate::security::escape_string_literal;
use crate::types::{FieldDescriptor, KeyRole, Row, TableFields, Value};

/// How catalog ordinals map to zero-based field indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrdinalBase {
    /// Use the reported position; if the first row's position is non-zero,
    /// every position is shifted down by one
    DetectFromFirstRow,
    /// Ignore reported positions; number fields 0.. after deduplication
    Sequential,
}

/// One column as read from a catalog, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    /// Column name
    pub name: String,
    /// Position as reported by the catalog
    pub position: i64,
    /// Raw type name, possibly wrapped in `Nullable(..)`
    pub type_name: String,
    /// Nullability reported separately by the catalog, if any
    pub nullable: Option<bool>,
    /// Raw default expression
    pub default: Value,
    /// Key role
    pub key: KeyRole,
    /// Column comment
    pub comment: String,
}

/// Normalize catalog rows into descriptors
///
/// The first row seen for a column name wins; later duplicates are dropped.
pub fn normalize_fields(columns: Vec<CatalogColumn>, base: OrdinalBase) -> TableFields {
    let shift = match base {
        OrdinalBase::DetectFromFirstRow => columns.first().is_some_and(|c| c.position != 0),
        OrdinalBase::Sequential => false,
    };

    let mut fields = TableFields::with_capacity(columns.len());
    for column in columns {
        if fields.contains_key(&column.name) {
            continue;
        }

        let index = match base {
            OrdinalBase::Sequential => fields.len(),
            OrdinalBase::DetectFromFirstRow => {
                let position = if shift {
                    column.position - 1
                } else {
                    column.position
                };
                usize::try_from(position).unwrap_or(0)
            }
        };

        let unwrapped = unwrap_type(&column.type_name);
        let nullable = unwrapped.nullable || column.nullable.unwrap_or(false);
        let descriptor = FieldDescriptor {
            name: column.name.clone(),
            index,
            type_name: unwrapped.name.to_string(),
            nullable,
            default: column.default,
            key: column.key,
            comment: column.comment,
        };
        fields.insert(column.name, descriptor);
    }
    fields
}

static PG_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PostgreSQL (\d+\.\d+)").unwrap());

/// Extract `major.minor` from a `SELECT version()` reply
pub fn parse_server_version(text: &str) -> Option<String> {
    PG_VERSION.captures(text).map(|caps| caps[1].to_string())
}

/// Compare dotted numeric versions; missing or non-numeric parts count as 0
pub fn compare_version(a: &str, b: &str) -> Ordering {
    let parts = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|p| p.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parts(a), parts(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

// ===========================================================================
// ClickHouse catalog
// ===========================================================================

fn clickhouse_database_filter(database: Option<&str>) -> String {
    match database {
        Some(db) if !db.is_empty() => format!("'{}'", escape_string_literal(db)),
        _ => "currentDatabase()".to_string(),
    }
}

/// Table listing for a ClickHouse database
pub fn clickhouse_tables_sql(database: Option<&str>) -> String {
    format!(
        "SELECT name FROM `system`.tables WHERE database = {}",
        clickhouse_database_filter(database)
    )
}

/// Column listing for a ClickHouse table
pub fn clickhouse_columns_sql(table: &str, database: Option<&str>) -> String {
    format!(
        "SELECT name, position, default_expression, comment, type, is_in_partition_key, \
         is_in_sorting_key, is_in_primary_key, is_in_sampling_key \
         FROM `system`.columns c WHERE `table` = '{}' AND database = {}",
        escape_string_literal(table),
        clickhouse_database_filter(database)
    )
}

/// Map one `system.columns` row
pub fn clickhouse_catalog_column(row: &Row) -> CatalogColumn {
    let default = match row.get_string("default_expression") {
        s if s.is_empty() => Value::Null,
        s => Value::String(s),
    };
    CatalogColumn {
        name: row.get_string("name"),
        position: row
            .get_by_name("position")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        type_name: row.get_string("type"),
        nullable: None,
        default,
        key: if row.get_bool("is_in_primary_key") {
            KeyRole::Primary
        } else {
            KeyRole::None
        },
        comment: row.get_string("comment"),
    }
}

// ===========================================================================
// PostgreSQL catalog
// ===========================================================================

/// Server version probe
pub const POSTGRES_VERSION_SQL: &str = "SELECT version();";

/// Partitioned child tables are listed separately from version 10 on
pub const POSTGRES_PARTITION_VERSION: &str = "10";

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(sql: &str) -> String {
    WHITESPACE.replace_all(sql.trim(), " ").into_owned()
}

/// Table listing for a PostgreSQL schema
///
/// `exclude_partitions` adds `AND c.relpartbound IS NULL`.
pub fn postgres_tables_sql(schema: &str, exclude_partitions: bool) -> String {
    let partition_filter = if exclude_partitions {
        "AND c.relpartbound IS NULL"
    } else {
        ""
    };
    collapse_whitespace(&format!(
        r#"
        SELECT c.relname
        FROM pg_class c
        INNER JOIN pg_namespace n ON c.relnamespace = n.oid
        WHERE n.nspname = '{}'
            AND c.relkind IN ('r', 'p')
            {}
        ORDER BY c.relname"#,
        escape_string_literal(schema),
        partition_filter
    ))
}

/// Column listing for a PostgreSQL table
///
/// One row per (column, constraint) pair; duplicates are expected and
/// dropped by [`normalize_fields`].
pub fn postgres_columns_sql(table: &str, schema: Option<&str>) -> String {
    let namespace_filter = match schema {
        Some(s) if !s.is_empty() => format!(
            "AND c.relnamespace = (SELECT oid FROM pg_namespace WHERE nspname = '{}')",
            escape_string_literal(s)
        ),
        _ => String::new(),
    };
    collapse_whitespace(&format!(
        r#"
        SELECT a.attname AS field, t.typname AS type, a.attnotnull AS null,
            (CASE WHEN d.contype IS NOT NULL THEN 'pri' ELSE '' END) AS key,
            ic.column_default AS default_value, b.description AS comment,
            COALESCE(character_maximum_length, numeric_precision, -1) AS length,
            numeric_scale AS scale
        FROM pg_attribute a
            LEFT JOIN pg_class c ON a.attrelid = c.oid
            LEFT JOIN pg_constraint d
                ON d.conrelid = c.oid AND d.contype = 'p' AND a.attnum = d.conkey[1]
            LEFT JOIN pg_description b ON a.attrelid = b.objoid AND a.attnum = b.objsubid
            LEFT JOIN pg_type t ON a.atttypid = t.oid
            LEFT JOIN information_schema.columns ic
                ON ic.column_name = a.attname AND ic.table_name = c.relname
        WHERE c.relname = '{}' {} AND a.attisdropped IS FALSE AND a.attnum > 0
        ORDER BY a.attnum"#,
        escape_string_literal(table),
        namespace_filter
    ))
}

/// Map one PostgreSQL column row
pub fn postgres_catalog_column(row: &Row) -> CatalogColumn {
    CatalogColumn {
        name: row.get_string("field"),
        position: 0,
        type_name: row.get_string("type"),
        nullable: Some(!row.get_bool("null")),
        default: row.get_by_name("default_value").cloned().unwrap_or(Value::Null),
        key: if row.get_string("key") == "pri" {
            KeyRole::Primary
        } else {
            KeyRole::None
        },
        comment: row.get_string("comment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, position: i64, type_name: &str) -> CatalogColumn {
        CatalogColumn {
            name: name.into(),
            position,
            type_name: type_name.into(),
            nullable: None,
            default: Value::Null,
            key: KeyRole::None,
            comment: String::new(),
        }
    }

    #[test]
    fn test_one_based_positions_are_shifted() {
        let fields = normalize_fields(
            vec![column("id", 1, "UInt64"), column("name", 2, "String")],
            OrdinalBase::DetectFromFirstRow,
        );
        assert_eq!(fields["id"].index, 0);
        assert_eq!(fields["name"].index, 1);
    }

    #[test]
    fn test_zero_based_positions_are_kept() {
        let fields = normalize_fields(
            vec![column("id", 0, "UInt64"), column("name", 1, "String")],
            OrdinalBase::DetectFromFirstRow,
        );
        assert_eq!(fields["name"].index, 1);
    }

    #[test]
    fn test_nullable_wrapper_unwrapped() {
        let fields = normalize_fields(
            vec![column("score", 1, "Nullable(Float64)")],
            OrdinalBase::DetectFromFirstRow,
        );
        assert_eq!(fields["score"].type_name, "Float64");
        assert!(fields["score"].nullable);
    }

    #[test]
    fn test_sequential_dedup_keeps_first() {
        let mut first = column("id", 0, "int8");
        first.key = KeyRole::Primary;
        let duplicate = column("id", 0, "int8");
        let fields = normalize_fields(
            vec![first, duplicate, column("name", 0, "text")],
            OrdinalBase::Sequential,
        );
        assert_eq!(fields.len(), 2);
        assert!(fields["id"].is_primary_key());
        assert_eq!(fields["name"].index, 1);
    }

    #[test]
    fn test_parse_server_version() {
        let reply = "PostgreSQL 15.4 (Debian 15.4-1.pgdg120+1) on x86_64-pc-linux-gnu";
        assert_eq!(parse_server_version(reply).as_deref(), Some("15.4"));
        assert_eq!(parse_server_version("CockroachDB CCL v23.1"), None);
    }

    #[test]
    fn test_compare_version() {
        assert_eq!(compare_version("15.4", "10"), Ordering::Greater);
        assert_eq!(compare_version("9.6", "10"), Ordering::Less);
        assert_eq!(compare_version("10.0", "10"), Ordering::Equal);
        assert_eq!(compare_version("", "10"), Ordering::Less);
    }

    #[test]
    fn test_postgres_tables_sql() {
        let sql = postgres_tables_sql("public", true);
        assert_eq!(
            sql,
            "SELECT c.relname FROM pg_class c INNER JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p') AND c.relpartbound IS NULL \
             ORDER BY c.relname"
        );
        assert!(!postgres_tables_sql("public", false).contains("relpartbound"));
    }

    #[test]
    fn test_catalog_identifiers_are_escaped() {
        let sql = postgres_columns_sql("o'brien", None);
        assert!(sql.contains("c.relname = 'o''brien'"));

        let sql = clickhouse_columns_sql("events", None);
        assert!(sql.contains("`table` = 'events'"));
        assert!(sql.ends_with("database = currentDatabase()"));
        assert!(clickhouse_tables_sql(Some("analytics")).ends_with("database = 'analytics'"));
    }

    #[test]
    fn test_postgres_key_role_from_primary_key_only() {
        let sql = postgres_columns_sql("orders", Some("public"));
        assert!(sql.contains(
            "LEFT JOIN pg_constraint d ON d.conrelid = c.oid AND d.contype = 'p' \
             AND a.attnum = d.conkey[1]"
        ));
    }

    #[test]
    fn test_map_catalog_rows() {
        let row = Row::new(
            vec![
                "name".into(),
                "position".into(),
                "default_expression".into(),
                "comment".into(),
                "type".into(),
                "is_in_primary_key".into(),
            ],
            vec![
                Value::String("id".into()),
                Value::UInt64(1),
                Value::String(String::new()),
                Value::String("row id".into()),
                Value::String("UInt64".into()),
                Value::UInt64(1),
            ],
        );
        let column = clickhouse_catalog_column(&row);
        assert_eq!(column.position, 1);
        assert_eq!(column.key, KeyRole::Primary);
        assert_eq!(column.default, Value::Null);
        assert_eq!(column.comment, "row id");

        let row = Row::new(
            vec!["field".into(), "type".into(), "null".into(), "key".into()],
            vec![
                Value::String("id".into()),
                Value::String("int8".into()),
                Value::Bool(true),
                Value::String("pri".into()),
            ],
        );
        let column = postgres_catalog_column(&row);
        assert_eq!(column.nullable, Some(false));
        assert_eq!(column.key, KeyRole::Primary);
    }
}
