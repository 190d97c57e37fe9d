//! Error types for sqlbridge
//!
//! The taxonomy mirrors what a driver can tell its caller:
//! - Capability rejections (static `Unsupported`, or `NotSupported` with detail)
//! - Operation errors wrapping a driver/network failure with a fixed code
//! - Structured backend replies (numeric or SQLSTATE code plus message)
//! - Local failures (configuration, type conversion, timeout)

use std::fmt;
use thiserror::Error;

/// Result type for sqlbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed classification codes attached to operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// A database operation (open, prepare, commit) failed
    DbOperationError,
    /// The backend cannot perform the requested operation
    NotSupported,
    /// A caller supplied an invalid argument
    InvalidParameter,
    /// Configuration is missing or malformed
    InvalidConfiguration,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DbOperationError => write!(f, "db_operation_error"),
            Self::NotSupported => write!(f, "not_supported"),
            Self::InvalidParameter => write!(f, "invalid_parameter"),
            Self::InvalidConfiguration => write!(f, "invalid_configuration"),
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Wrapped driver operation failures
    Operation,
    /// Query execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Structured error reply from the backend
    Backend,
    /// The backend cannot do what was asked
    Unsupported,
    /// Type conversion errors (not retriable)
    TypeConversion,
    /// Timeout errors (retriable)
    Timeout,
    /// Configuration error
    Configuration,
    /// Schema-related errors
    Schema,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for sqlbridge
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed or was closed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A driver operation failed; carries a fixed classification code
    #[error("{code}: {message}")]
    Operation {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Structured reply from the backend, code and text preserved
    #[error("[{code}]{message}")]
    Backend { code: String, message: String },

    /// Canonical operation the backend never supports
    #[error("unsupported method:{method}")]
    Unsupported { method: &'static str },

    /// Operation not supported in this particular situation
    #[error("not supported: {message}")]
    NotSupported { message: String },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema error (table not found, unexpected catalog shape)
    #[error("schema error: {message}")]
    Schema { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Operation { .. } => ErrorCategory::Operation,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Backend { .. } => ErrorCategory::Backend,
            Self::Unsupported { .. } | Self::NotSupported { .. } => ErrorCategory::Unsupported,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Schema { .. } => ErrorCategory::Schema,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error rejects an operation the backend cannot perform
    #[inline]
    pub fn is_unsupported(&self) -> bool {
        self.category() == ErrorCategory::Unsupported
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a driver failure with a fixed code
    pub fn operation(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Operation {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a structured backend error
    pub fn backend(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a fixed unsupported-method error
    pub const fn unsupported(method: &'static str) -> Self {
        Self::Unsupported { method }
    }

    /// Create a not-supported error with dynamic detail
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Operation => write!(f, "operation"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Backend => write!(f, "backend"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Schema => write!(f, "schema"),
        }
    }
}
