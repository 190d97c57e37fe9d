//! Statement rewriting from the ORM core's canonical SQL to backend syntax
//!
//! The canonical form uses `?` positional placeholders and MySQL-flavoured
//! grammar. Rewriting happens in two layers:
//! - A literal-aware scanner splits the text into code and opaque runs
//!   (string literals, quoted identifiers, comments), so only code is touched
//! - Backend passes then operate on code runs: placeholder numbering,
//!   `LIMIT a, b` normalization, JSONB operator preservation, and the
//!   ClickHouse mutation form for ORM-generated UPDATE/DELETE

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use tracing::{debug, trace};

use crate::driver::StatementContext;
use crate::error::{Error, Result};
use crate::types::Param;

/// Lexical rules that differ between backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Syntax {
    /// `\` escapes the next character inside single-quoted literals
    pub backslash_escapes: bool,
    /// `?|`, `?&` and `::jsonb ?` are operators, not placeholders
    pub jsonb_operators: bool,
    /// Rewrite `LIMIT a, b` to `LIMIT b OFFSET a`
    pub limit_offset: bool,
}

impl Syntax {
    /// ClickHouse lexical rules
    pub const CLICKHOUSE: Self = Self {
        backslash_escapes: true,
        jsonb_operators: false,
        limit_offset: false,
    };

    /// PostgreSQL lexical rules
    pub const POSTGRES: Self = Self {
        backslash_escapes: false,
        jsonb_operators: true,
        limit_offset: true,
    };
}

/// A run of statement text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// SQL code, subject to rewriting
    Code(&'a str),
    /// Literal, quoted identifier or comment, copied verbatim
    Opaque(&'a str),
}

/// Split a statement into code and opaque runs
pub fn segments(sql: &str, syntax: Syntax) -> Vec<Segment<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let end = match bytes[i] {
            b'\'' => Some(skip_quoted(bytes, i, b'\'', syntax.backslash_escapes)),
            b'"' => Some(skip_quoted(bytes, i, b'"', false)),
            b'`' => Some(skip_quoted(bytes, i, b'`', false)),
            b'-' if bytes.get(i + 1) == Some(&b'-') => Some(skip_line_comment(bytes, i)),
            b'/' if bytes.get(i + 1) == Some(&b'*') => Some(skip_block_comment(bytes, i)),
            _ => None,
        };

        match end {
            Some(end) => {
                if start < i {
                    out.push(Segment::Code(&sql[start..i]));
                }
                out.push(Segment::Opaque(&sql[i..end]));
                i = end;
                start = end;
            }
            None => i += 1,
        }
    }

    if start < bytes.len() {
        out.push(Segment::Code(&sql[start..]));
    }
    out
}

fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            // doubled quote is an escaped quote
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| start + p + 1)
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |p| start + 2 + p + 2)
}

static LIMIT_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\s*,\s*(\d+)").unwrap());

// `x::jsonb ?` and `(x::jsonb) ?`; `x::jsonb = ?` still binds a parameter
fn ends_with_jsonb_cast(out: &str) -> bool {
    let t = out
        .trim_end_matches(|c: char| c.is_whitespace() || c == ')')
        .as_bytes();
    t.len() >= 7 && t[t.len() - 7..].eq_ignore_ascii_case(b"::jsonb")
}

/// Replace code-level `?` with `$1..$N`; returns the text and N
pub fn number_placeholders(sql: &str, syntax: Syntax) -> (String, usize) {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;

    for segment in segments(sql, syntax) {
        let code = match segment {
            Segment::Opaque(text) => {
                out.push_str(text);
                continue;
            }
            Segment::Code(text) if syntax.limit_offset => {
                LIMIT_PAIR.replace_all(text, "LIMIT ${2} OFFSET ${1}")
            }
            Segment::Code(text) => Cow::Borrowed(text),
        };

        let mut chars = code.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '?' {
                out.push(c);
                continue;
            }
            if syntax.jsonb_operators {
                if let Some(&op @ ('|' | '&')) = chars.peek() {
                    out.push('?');
                    out.push(op);
                    chars.next();
                    continue;
                }
                if ends_with_jsonb_cast(&out) {
                    out.push('?');
                    continue;
                }
            }
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        }
    }

    (out, n)
}

fn check_arity(sql: &str, found: usize, supplied: usize) -> Result<()> {
    if found != supplied {
        return Err(Error::query_with_sql(
            format!(
                "statement has {} placeholders but {} parameters were supplied",
                found, supplied
            ),
            sql,
        ));
    }
    Ok(())
}

/// Kind of data-modifying statement the mutation pass recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    /// `UPDATE ...`
    Update,
    /// `DELETE ...`
    Delete,
}

static CLASSIFY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(UPDATE|DELETE)\b").unwrap());

// table reference: optional db qualifier, each part bare, backtick- or double-quoted
const TABLE_REF: &str = r#"(?:(?:`[^`]+`|"[^"]+"|\w+)\.)?(?:`[^`]+`|"[^"]+"|\w+)"#;

static UPDATE_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)^\s*UPDATE\s+({})\s+SET\b", TABLE_REF)).unwrap());

static DELETE_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)^\s*DELETE\s+FROM\s+({})", TABLE_REF)).unwrap());

/// Classify a statement by its leading keyword
pub fn classify(sql: &str) -> Option<Mutation> {
    let caps = CLASSIFY.captures(sql)?;
    if caps[1].eq_ignore_ascii_case("UPDATE") {
        Some(Mutation::Update)
    } else {
        Some(Mutation::Delete)
    }
}

/// Turn `UPDATE t SET ..` / `DELETE FROM t ..` into ClickHouse mutations
///
/// Anything that does not match the expected shape is returned unchanged.
pub fn to_mutation(sql: &str) -> Cow<'_, str> {
    match classify(sql) {
        Some(Mutation::Update) => UPDATE_FORM.replace(sql, "ALTER TABLE ${1} UPDATE"),
        Some(Mutation::Delete) => DELETE_FORM.replace(sql, "ALTER TABLE ${1} DELETE"),
        None => Cow::Borrowed(sql),
    }
}

/// ClickHouse statement filter
///
/// With no parameters placeholders are left untouched. Mutation rewriting
/// only applies to statements the ORM generated itself, with or without
/// parameters.
pub fn rewrite_clickhouse(
    sql: &str,
    params: Vec<Param>,
    ctx: &StatementContext,
) -> Result<(String, Vec<Param>)> {
    let (numbered, found) = if params.is_empty() {
        (sql.to_string(), 0)
    } else {
        let (numbered, found) = number_placeholders(sql, Syntax::CLICKHOUSE);
        check_arity(sql, found, params.len())?;
        (numbered, found)
    };

    if !ctx.orm_generated {
        trace!(placeholders = found, "ClickHouse statement numbered");
        return Ok((numbered, params));
    }

    let rewritten = match to_mutation(&numbered) {
        Cow::Borrowed(_) => numbered,
        Cow::Owned(mutation) => {
            debug!(from = %sql, to = %mutation, "Rewrote statement to ClickHouse mutation");
            mutation
        }
    };
    Ok((rewritten, params))
}

/// PostgreSQL statement filter
pub fn rewrite_postgres(
    sql: &str,
    params: Vec<Param>,
    _ctx: &StatementContext,
) -> Result<(String, Vec<Param>)> {
    let (rewritten, found) = number_placeholders(sql, Syntax::POSTGRES);
    check_arity(sql, found, params.len())?;

    trace!(placeholders = found, sql = %rewritten, "PostgreSQL statement rewritten");
    Ok((rewritten, params))
}
