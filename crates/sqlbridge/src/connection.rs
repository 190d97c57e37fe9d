//! Connection traits for sqlbridge
//!
//! The execution seam every driver talks through:
//! - Connection: query/execute over one backend session
//! - PreparedStatement: parameterized statement executed repeatedly
//! - Transaction: unit of work with explicit commit/rollback
//!
//! Plus [`ConnectionConfig`], the structured connection settings shared by
//! both drivers.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Row, Value};

/// A connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement that modifies data, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Prepare a statement for repeated execution
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Begin a transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Execute a query and return the first row
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Round-trip check; returns the backend's own error on failure
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool {
        self.ping().await.is_ok()
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A prepared statement
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Execute the prepared statement with given parameters
    async fn execute(&self, params: &[Value]) -> Result<u64>;

    /// Query with the prepared statement
    async fn query(&self, params: &[Value]) -> Result<Vec<Row>>;

    /// Get the SQL string
    fn sql(&self) -> &str;
}

/// A database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement that modifies data
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Prepare a statement bound to this transaction
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// ClickHouse (columnar, HTTP interface)
    ClickHouse,
    /// PostgreSQL
    PostgreSQL,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClickHouse => write!(f, "ClickHouse"),
            Self::PostgreSQL => write!(f, "PostgreSQL"),
        }
    }
}

/// Connection settings for one database node
///
/// Either the structured fields or `link` are authoritative: a non-empty
/// `link` wins and is used nearly verbatim.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host
    pub host: String,
    /// Server port, kept as text like the DSN it ends up in
    pub port: String,
    /// User name
    pub user: String,
    /// Password
    pub pass: String,
    /// Database name
    pub name: String,
    /// PostgreSQL `search_path`
    pub namespace: String,
    /// Session timezone
    pub timezone: String,
    /// Extra driver options, query-string syntax (`k=v&k2=v2`)
    pub extra: String,
    /// Legacy single-string DSN
    pub link: String,
    /// Driver debug flag
    pub debug: bool,
    /// Per-call execution timeout in milliseconds (0 = no timeout)
    pub exec_timeout_ms: u64,
}

static KV_PASSWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(password\s*=\s*)('(?:[^'\\]|\\.)*'|\S+)").unwrap());

/// Hide any password embedded in a DSN (URL or key/value form)
pub fn redact_dsn(dsn: &str) -> String {
    if dsn.contains("://") {
        return match url::Url::parse(dsn) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => "***".to_string(),
        };
    }
    KV_PASSWORD.replace_all(dsn, "${1}***").into_owned()
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pass = if self.pass.is_empty() { "" } else { "***" };

        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("pass", &pass)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("timezone", &self.timezone)
            .field("extra", &self.extra)
            .field("link", &redact_dsn(&self.link))
            .field("debug", &self.debug)
            .field("exec_timeout_ms", &self.exec_timeout_ms)
            .finish()
    }
}

impl ConnectionConfig {
    /// Create configuration for a structured host/port target
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            ..Default::default()
        }
    }

    /// Create configuration from a legacy DSN
    pub fn from_link(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Default::default()
        }
    }

    /// Set user and password
    pub fn with_credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.user = user.into();
        self.pass = pass.into();
        self
    }

    /// Set database name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set PostgreSQL search path
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set session timezone
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Set extra driver options
    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Set debug flag
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set execution timeout
    pub fn with_exec_timeout(mut self, ms: u64) -> Self {
        self.exec_timeout_ms = ms;
        self
    }

    /// Whether the legacy link is authoritative
    #[inline]
    pub fn uses_link(&self) -> bool {
        !self.link.is_empty()
    }

    /// Execution timeout, if configured
    pub fn exec_timeout(&self) -> Option<Duration> {
        (self.exec_timeout_ms > 0).then(|| Duration::from_millis(self.exec_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new("localhost", "5432")
            .with_credentials("app", "secret")
            .with_name("orders")
            .with_namespace("sales")
            .with_exec_timeout(1500);

        assert_eq!(config.host, "localhost");
        assert_eq!(config.name, "orders");
        assert!(!config.uses_link());
        assert_eq!(config.exec_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(ConnectionConfig::default().exec_timeout(), None);
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = ConnectionConfig::new("db", "9000").with_credentials("u", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));

        let config = ConnectionConfig::from_link("clickhouse://u:hunter2@db:9000/x");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_redact_key_value_dsn() {
        let dsn = "user=a password=hunter2 host=h port=5432 sslmode=disable";
        assert_eq!(
            redact_dsn(dsn),
            "user=a password=*** host=h port=5432 sslmode=disable"
        );
        assert_eq!(
            redact_dsn("user=a password='with space' host=h"),
            "user=a password=*** host=h"
        );
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"host":"h","port":"8123","debug":true}"#).unwrap();
        assert_eq!(config.host, "h");
        assert!(config.debug);
        assert!(config.pass.is_empty());
        assert_eq!(config.exec_timeout_ms, 0);
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(DatabaseType::ClickHouse.to_string(), "ClickHouse");
        assert_eq!(DatabaseType::PostgreSQL.to_string(), "PostgreSQL");
    }
}
