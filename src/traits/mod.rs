pub mod driver;

pub use driver::{StorageConnection, StorageDriver, Visitor};
