//! Per-backend capability tables
//!
//! Every canonical ORM operation is declared for every backend. Tables are
//! exhaustive `match`es, so adding an operation forces each backend to take a
//! position on it. Gating happens before any I/O.

use std::fmt;

use crate::connection::DatabaseType;
use crate::error::{Error, Result};

/// Canonical ORM operations a backend may or may not honor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Plain insert
    Insert,
    /// Insert that skips conflicting rows
    InsertIgnore,
    /// Insert and report the generated id
    InsertAndGetId,
    /// Delete-then-insert on conflict
    Replace,
    /// Upsert
    Save,
    /// Open a transaction
    Begin,
    /// Run a closure inside a transaction
    Transaction,
    /// Multi-row insert
    BatchInsert,
    /// Delete rows
    Delete,
    /// Update rows
    Update,
}

impl Operation {
    /// All operations, in declaration order
    pub const ALL: [Operation; 10] = [
        Self::Insert,
        Self::InsertIgnore,
        Self::InsertAndGetId,
        Self::Replace,
        Self::Save,
        Self::Begin,
        Self::Transaction,
        Self::BatchInsert,
        Self::Delete,
        Self::Update,
    ];

    /// Method name used in error messages
    pub const fn method(self) -> &'static str {
        match self {
            Self::Insert => "Insert",
            Self::InsertIgnore => "InsertIgnore",
            Self::InsertAndGetId => "InsertGetId",
            Self::Replace => "Replace",
            Self::Save => "Save",
            Self::Begin => "Begin",
            Self::Transaction => "Transaction",
            Self::BatchInsert => "BatchInsert",
            Self::Delete => "Delete",
            Self::Update => "Update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// How a backend honors an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Support {
    /// Native support
    Supported,
    /// Provided through a different mechanism than the canonical one
    Emulated,
    /// Never available
    Unsupported,
}

/// Capability table of one backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    database: DatabaseType,
}

impl Capabilities {
    /// Capability table for ClickHouse
    pub const CLICKHOUSE: Self = Self {
        database: DatabaseType::ClickHouse,
    };

    /// Capability table for PostgreSQL
    pub const POSTGRES: Self = Self {
        database: DatabaseType::PostgreSQL,
    };

    /// Capability table for a database type
    pub const fn of(database: DatabaseType) -> Self {
        Self { database }
    }

    /// Declared support level for an operation
    pub const fn support(&self, op: Operation) -> Support {
        use Operation::*;
        match self.database {
            DatabaseType::ClickHouse => match op {
                InsertIgnore | InsertAndGetId | Replace | Save | Begin | Transaction => {
                    Support::Unsupported
                }
                // implicit single-use transaction, one execute per row
                Insert | BatchInsert => Support::Emulated,
                // ALTER TABLE .. UPDATE / DELETE mutations
                Update | Delete => Support::Emulated,
            },
            DatabaseType::PostgreSQL => match op {
                InsertIgnore | Replace | Save => Support::Unsupported,
                // RETURNING <pk>
                InsertAndGetId => Support::Emulated,
                Insert | BatchInsert | Begin | Transaction | Update | Delete => Support::Supported,
            },
        }
    }

    /// Gate an operation; unsupported operations fail with a fixed error
    pub fn check(&self, op: Operation) -> Result<Support> {
        match self.support(op) {
            Support::Unsupported => Err(self.rejection(op)),
            support => Ok(support),
        }
    }

    fn rejection(&self, op: Operation) -> Error {
        match self.database {
            DatabaseType::ClickHouse => Error::unsupported(op.method()),
            DatabaseType::PostgreSQL => {
                let label = match op {
                    Operation::InsertIgnore => "Insert ignore",
                    other => other.method(),
                };
                Error::not_supported(format!(
                    "{} operation is not supported by pgsql driver",
                    label
                ))
            }
        }
    }

    /// Operations the backend never honors
    pub fn unsupported(&self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.support(*op) == Support::Unsupported)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clickhouse_table() {
        let caps = Capabilities::CLICKHOUSE;
        assert_eq!(caps.support(Operation::Insert), Support::Emulated);
        assert_eq!(caps.support(Operation::Update), Support::Emulated);
        assert_eq!(
            caps.unsupported(),
            vec![
                Operation::InsertIgnore,
                Operation::InsertAndGetId,
                Operation::Replace,
                Operation::Save,
                Operation::Begin,
                Operation::Transaction,
            ]
        );
    }

    #[test]
    fn test_clickhouse_rejection_messages() {
        let caps = Capabilities::CLICKHOUSE;
        assert_eq!(
            caps.check(Operation::InsertAndGetId).unwrap_err().to_string(),
            "unsupported method:InsertGetId"
        );
        assert_eq!(
            caps.check(Operation::Begin).unwrap_err().to_string(),
            "unsupported method:Begin"
        );
    }

    #[test]
    fn test_postgres_table() {
        let caps = Capabilities::of(DatabaseType::PostgreSQL);
        assert_eq!(caps.check(Operation::Begin).unwrap(), Support::Supported);
        assert_eq!(
            caps.check(Operation::InsertAndGetId).unwrap(),
            Support::Emulated
        );

        let err = caps.check(Operation::Save).unwrap_err();
        assert!(err.is_unsupported());
        assert!(err
            .to_string()
            .contains("Save operation is not supported by pgsql driver"));
        assert!(caps
            .check(Operation::InsertIgnore)
            .unwrap_err()
            .to_string()
            .contains("Insert ignore operation is not supported by pgsql driver"));
    }

    #[test]
    fn test_every_operation_declared() {
        use Support::*;
        let expected = [
            (Operation::Insert, Emulated, Supported),
            (Operation::InsertIgnore, Unsupported, Unsupported),
            (Operation::InsertAndGetId, Unsupported, Emulated),
            (Operation::Replace, Unsupported, Unsupported),
            (Operation::Save, Unsupported, Unsupported),
            (Operation::Begin, Unsupported, Supported),
            (Operation::Transaction, Unsupported, Supported),
            (Operation::BatchInsert, Emulated, Supported),
            (Operation::Delete, Emulated, Supported),
            (Operation::Update, Emulated, Supported),
        ];
        assert_eq!(expected.len(), Operation::ALL.len());

        for (op, clickhouse, postgres) in expected {
            assert_eq!(Capabilities::CLICKHOUSE.support(op), clickhouse, "{op} on ClickHouse");
            assert_eq!(Capabilities::POSTGRES.support(op), postgres, "{op} on PostgreSQL");
        }
        for op in Operation::ALL {
            assert!(expected.iter().any(|(declared, _, _)| *declared == op));
        }
    }
}
