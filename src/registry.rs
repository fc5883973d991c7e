//! Driver registry.
//!
//! The registry maps driver names to driver objects. Built-in drivers are
//! registered on construction; custom drivers join through
//! [`DriverRegistry::define`]. A registry is shared by every store created
//! from the same root store via `create_instance`, so a custom driver
//! defined once is visible to all of them. Connection state is never kept
//! here.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::errors::{KvError, KvResult};
use crate::traits::driver::StorageDriver;

/// Names of the drivers shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinDriver {
    /// Object store over sled trees.
    Structured,
    /// SQLite tables.
    Relational,
    /// The environment's shared flat key/value space.
    Flat,
    /// Process memory; never chosen unless asked for.
    Memory,
}

impl BuiltinDriver {
    /// Drivers tried, in order, when an instance has no preference.
    pub fn default_order() -> &'static [BuiltinDriver] {
        &[
            BuiltinDriver::Structured,
            BuiltinDriver::Relational,
            BuiltinDriver::Flat,
        ]
    }

    fn instantiate(self) -> Option<Arc<dyn StorageDriver>> {
        match self {
            #[cfg(feature = "sled")]
            BuiltinDriver::Structured => {
                Some(Arc::new(crate::databases::sled_store::SledDriver))
            }
            #[cfg(feature = "sqlite")]
            BuiltinDriver::Relational => {
                Some(Arc::new(crate::databases::sqlite_store::SqliteDriver))
            }
            #[cfg(feature = "redb")]
            BuiltinDriver::Flat => Some(Arc::new(crate::databases::flat_store::FlatDriver)),
            BuiltinDriver::Memory => {
                Some(Arc::new(crate::databases::memory_store::MemoryDriver))
            }
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

/// A thread-safe name → driver map.
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn StorageDriver>>>,
}

impl DriverRegistry {
    /// A registry with only the compiled-in built-in drivers.
    pub fn with_builtins() -> Self {
        let drivers = BuiltinDriver::iter()
            .filter_map(|builtin| builtin.instantiate())
            .map(|driver| (driver.name().to_string(), driver))
            .collect();
        Self {
            drivers: RwLock::new(drivers),
        }
    }

    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `driver`.
    ///
    /// Registering the very same driver object twice is a no-op. A different
    /// driver under an existing name is rejected with
    /// [`KvError::DriverNameInUse`]; use [`redefine`](Self::redefine) to
    /// replace it on purpose.
    pub fn define(&self, driver: Arc<dyn StorageDriver>) -> KvResult<()> {
        let name = validate(driver.as_ref())?;
        let mut drivers = self.drivers.write();
        if let Some(existing) = drivers.get(&name) {
            if Arc::ptr_eq(existing, &driver) {
                return Ok(());
            }
            return Err(KvError::DriverNameInUse(name));
        }
        debug!("Defined driver: {name}");
        drivers.insert(name, driver);
        Ok(())
    }

    /// Register `driver`, replacing whatever was registered under its name.
    pub fn redefine(&self, driver: Arc<dyn StorageDriver>) -> KvResult<()> {
        let name = validate(driver.as_ref())?;
        let mut drivers = self.drivers.write();
        if drivers.contains_key(&name) {
            warn!("Redefining driver: {name}");
        }
        drivers.insert(name, driver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> KvResult<Arc<dyn StorageDriver>> {
        self.drivers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KvError::DriverNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.drivers.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The method set is enforced by the trait; what is left to check at
/// registration is the identity a driver advertises.
fn validate(driver: &dyn StorageDriver) -> KvResult<String> {
    let name = driver.name();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(KvError::DriverNotCompliant);
    }
    Ok(name.to_string())
}
