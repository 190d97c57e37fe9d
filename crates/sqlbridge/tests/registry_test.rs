//! Tests for the driver registry

use std::sync::Arc;

use sqlbridge::prelude::*;

// ==================== Registry Tests ====================

#[cfg(feature = "postgres")]
fn pg_factory(config: ConnectionConfig) -> Result<Arc<dyn Driver>> {
    Ok(Arc::new(PgDriver::new(config)))
}

#[cfg(feature = "postgres")]
#[test]
fn test_register_and_create() {
    let mut registry = DriverRegistry::new();
    registry.register("pg-replica", pg_factory).unwrap();

    assert!(registry.contains("pg-replica"));
    let driver = registry
        .create("pg-replica", ConnectionConfig::new("replica", "5432"))
        .unwrap();
    assert_eq!(driver.name(), "pgsql");
    assert_eq!(driver.database_type(), DatabaseType::PostgreSQL);
    assert_eq!(driver.config().host, "replica");
}

#[cfg(feature = "postgres")]
#[test]
fn test_duplicate_registration_rejected() {
    let mut registry = DriverRegistry::new();
    registry.register("pg", pg_factory).unwrap();

    let err = registry.register("pg", pg_factory).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.to_string().contains("already registered"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_unknown_driver() {
    let registry = DriverRegistry::with_builtin();
    let err = registry
        .create("mssql", ConnectionConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[cfg(feature = "clickhouse")]
#[test]
fn test_builtin_clickhouse() {
    let registry = DriverRegistry::with_builtin();
    let driver = registry
        .create("clickhouse", ConnectionConfig::new("ch", "8123").with_name("analytics"))
        .unwrap();

    assert_eq!(driver.database_type(), DatabaseType::ClickHouse);
    assert!(driver.capabilities().check(Operation::Replace).is_err());
}
