//! Built-in storage drivers.

#[cfg(feature = "sled")]
pub mod sled_store;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(feature = "redb")]
pub mod flat_store;

pub mod memory_store;
