//! # sqlbridge
//!
//! Dialect adaptation layer that lets a backend-agnostic ORM core drive a
//! columnar analytics database (ClickHouse) and a relational database
//! (PostgreSQL) through one [`Driver`](driver::Driver) contract.
//!
//! ## Features
//!
//! - **Statement Rewriting**: `?` placeholders to `$N`, literal-aware;
//!   `LIMIT a, b` normalization; ClickHouse mutations for ORM-generated
//!   UPDATE/DELETE
//! - **Capability Gate**: every canonical operation declared per backend,
//!   unsupported ones rejected before any I/O
//! - **Type Conversion**: outbound parameter normalization and inbound
//!   coercion from declared column types
//! - **Schema Discovery**: table listing and column descriptors from the
//!   system catalogs
//! - **Execution Adapter**: DSN assembly, timeouts, emulated transactional
//!   batch inserts, insert-and-get-id via `RETURNING`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqlbridge::prelude::*;
//!
//! let registry = DriverRegistry::with_builtin();
//! let driver = registry.create(
//!     "pgsql",
//!     ConnectionConfig::new("localhost", "5432")
//!         .with_credentials("app", "secret")
//!         .with_name("orders"),
//! )?;
//!
//! let conn = driver.open().await?;
//! let rows = driver
//!     .do_select(
//!         Link::Conn(conn.as_ref()),
//!         "SELECT * FROM users WHERE id > ? LIMIT 10, 5",
//!         vec![Param::from(100i64)],
//!         &StatementContext::new(),
//!     )
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `clickhouse` - ClickHouse support via the HTTP client

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod capability;
pub mod connection;
pub mod convert;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod executor;
pub mod registry;
pub mod rewrite;
pub mod schema;
pub mod security;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "clickhouse")]
pub mod clickhouse;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, ErrorCode, Result};

    // Value and type system
    pub use crate::types::{
        FieldDescriptor, KeyRole, LocalType, Param, Record, Row, SqlValuer, TableFields, Value,
    };

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, DatabaseType, PreparedStatement, Transaction,
    };

    // Driver contract
    pub use crate::capability::{Capabilities, Operation, Support};
    pub use crate::driver::{
        tx_body, Driver, ExecResult, InsertId, InsertOption, Link, StatementContext, TxBody,
    };
    pub use crate::registry::{DriverFactory, DriverRegistry};

    // Dialect types
    pub use crate::dialect::{dialect_for, ClickHouseDialect, PostgresDialect, SqlDialect};

    #[cfg(feature = "clickhouse")]
    pub use crate::clickhouse::ClickHouseDriver;

    #[cfg(feature = "postgres")]
    pub use crate::postgres::PgDriver;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;
