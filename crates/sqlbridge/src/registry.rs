//! Driver registry
//!
//! An owned name -> factory map, filled explicitly at startup. The built-in
//! set registers `clickhouse` and `pgsql` for whichever backend features are
//! compiled in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::connection::ConnectionConfig;
use crate::driver::Driver;
use crate::error::{Error, Result};

/// Builds a driver from connection settings
pub trait DriverFactory: Send + Sync {
    /// Create a driver; no I/O happens until the driver opens a connection
    fn create(&self, config: ConnectionConfig) -> Result<Arc<dyn Driver>>;
}

impl<F> DriverFactory for F
where
    F: Fn(ConnectionConfig) -> Result<Arc<dyn Driver>> + Send + Sync,
{
    fn create(&self, config: ConnectionConfig) -> Result<Arc<dyn Driver>> {
        self(config)
    }
}

/// Registry of driver factories by name
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("DriverRegistry")
            .field("drivers", &names)
            .finish()
    }
}

impl DriverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the compiled-in drivers
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "clickhouse")]
        registry.factories.insert(
            crate::clickhouse::DRIVER_NAME.to_string(),
            Arc::new(crate::clickhouse::ClickHouseDriverFactory),
        );

        #[cfg(feature = "postgres")]
        registry.factories.insert(
            crate::postgres::DRIVER_NAME.to_string(),
            Arc::new(crate::postgres::PgDriverFactory),
        );

        registry
    }

    /// Register a factory; a name can only be registered once
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl DriverFactory + 'static,
    ) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::config(format!(
                "driver '{}' is already registered",
                name
            )));
        }
        debug!(driver = %name, "Registered driver");
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Create a driver by name
    pub fn create(&self, name: &str, config: ConnectionConfig) -> Result<Arc<dyn Driver>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown driver '{}'", name)))?;
        factory.create(config)
    }

    /// Whether a driver name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Number of registered drivers
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no driver is registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
