//! Common imports.
//!
//! ```
//! use netabase_kv::prelude::*;
//! ```

pub use crate::callback::CallbackExt;
pub use crate::config::{DriverPreference, DropOptions, StoreConfig, StoreOptions};
pub use crate::cursor::{EntryCursor, Page, PagedCursor};
pub use crate::environment::{Environment, EnvironmentConfig};
pub use crate::errors::{KvError, KvResult};
pub use crate::keys::IntoStoreKey;
pub use crate::registry::BuiltinDriver;
pub use crate::store::KvStore;
pub use crate::traits::driver::{StorageConnection, StorageDriver, Visitor};
pub use crate::value::{Binary, BinaryKind, Blob, Value};
