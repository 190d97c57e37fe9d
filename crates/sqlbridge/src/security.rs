//! Escaping and validation for text interpolated into SQL.
//!
//! Catalog queries and client-side bound literals cannot use server-side
//! parameters, so every string that lands inside generated SQL goes through
//! one of these helpers first.

use crate::error::Error;

/// Escape a string value for a standard single-quoted SQL literal.
///
/// Replaces `'` with `''`. Used for catalog queries where identifiers are
/// compared against `system.*` / `pg_catalog` columns.
///
/// # Examples
///
/// ```
/// use sqlbridge::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("users"), "users");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}

/// Escape a string for a ClickHouse single-quoted literal.
///
/// ClickHouse treats backslash as an escape character inside literals, so
/// both `\` and `'` are escaped with a backslash.
///
/// # Examples
///
/// ```
/// use sqlbridge::security::escape_clickhouse_literal;
///
/// assert_eq!(escape_clickhouse_literal("it's"), "it\\'s");
/// assert_eq!(escape_clickhouse_literal("a\\b"), "a\\\\b");
/// ```
pub fn escape_clickhouse_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}

/// Validate a single SQL identifier (column, table, schema, database).
///
/// - Must not be empty, at most 255 characters
/// - Must start with an ASCII letter or underscore
/// - May only contain ASCII alphanumerics and underscores
///
/// # Examples
///
/// ```
/// use sqlbridge::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("users").is_ok());
/// assert!(validate_sql_identifier("x; DROP TABLE users--").is_err());
/// ```
pub fn validate_sql_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > 255 {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max 255)",
            name.len()
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    if let Some(c) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::config(format!(
            "Invalid SQL identifier '{}': contains invalid character '{}'",
            name, c
        )));
    }

    Ok(())
}

/// Split and validate a possibly qualified table reference (`db.table`).
///
/// Surrounding backticks or double quotes on each part are removed.
///
/// # Examples
///
/// ```
/// use sqlbridge::security::split_table_reference;
///
/// assert_eq!(split_table_reference("users").unwrap(), (None, "users".to_string()));
/// assert_eq!(
///     split_table_reference("`analytics`.`events`").unwrap(),
///     (Some("analytics".to_string()), "events".to_string())
/// );
/// assert!(split_table_reference("a.b.c").is_err());
/// ```
pub fn split_table_reference(table: &str) -> crate::Result<(Option<String>, String)> {
    let parts: Vec<String> = table
        .trim()
        .split('.')
        .map(|p| p.trim_matches(|c| c == '`' || c == '"').to_string())
        .collect();

    match parts.as_slice() {
        [name] => {
            validate_sql_identifier(name)?;
            Ok((None, name.clone()))
        }
        [schema, name] => {
            validate_sql_identifier(schema)?;
            validate_sql_identifier(name)?;
            Ok((Some(schema.clone()), name.clone()))
        }
        _ => Err(Error::config(format!(
            "Invalid table reference '{}': expected `table` or `schema.table`",
            table
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_sql_identifier("users").is_ok());
        assert!(validate_sql_identifier("_private").is_ok());
        assert!(validate_sql_identifier("TABLE_123").is_ok());
    }

    #[test]
    fn test_identifier_rejections() {
        assert!(validate_sql_identifier("").is_err());
        assert!(validate_sql_identifier("123abc").is_err());
        assert!(validate_sql_identifier(&"a".repeat(256)).is_err());
        assert!(validate_sql_identifier("x' OR '1'='1").is_err());
        assert!(validate_sql_identifier("user name").is_err());
        assert!(validate_sql_identifier("tabl\u{0435}").is_err());
    }

    #[test]
    fn test_escape_single_quotes() {
        assert_eq!(escape_string_literal("'hello'"), "''hello''");
        assert_eq!(escape_string_literal("' OR '1'='1"), "'' OR ''1''=''1");
        assert_eq!(escape_string_literal(""), "");
    }

    #[test]
    fn test_clickhouse_escape() {
        assert_eq!(escape_clickhouse_literal("plain"), "plain");
        assert_eq!(escape_clickhouse_literal("x'; DROP"), "x\\'; DROP");
        assert_eq!(escape_clickhouse_literal("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_table_reference() {
        assert_eq!(
            split_table_reference("\"public\".\"users\"").unwrap(),
            (Some("public".into()), "users".into())
        );
        assert!(split_table_reference("users; DROP").is_err());
        assert!(split_table_reference("").is_err());
    }
}
