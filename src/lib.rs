//! # Netabase KV
//!
//! One asynchronous key/value API over several storage engines.
//!
//! A [`KvStore`] picks the first driver its environment supports from an
//! ordered preference list, opens it lazily, and forwards every operation
//! to it. Three engines ship with the crate:
//!
//! - `structured`: sled trees, with writes coalesced into batches.
//! - `relational`: SQLite tables.
//! - `flat`: one redb table shared by every store of an environment, each
//!   store keeping to its own key prefix.
//!
//! An in-process `memory` driver is registered too, and custom drivers join
//! by implementing [`StorageDriver`] and calling
//! [`KvStore::define_driver`].
//!
//! Values are [`Value`]s: JSON-like data plus binary buffers, blobs and
//! typed arrays. Engines without native binary storage keep values as
//! serialized envelopes (see [`serializer`]).
//!
//! ## Quick Start
//!
//! ```
//! use netabase_kv::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = KvStore::new(Environment::temp());
//!
//! store.set_item("office", "Initech").await?;
//! store.set_item("office", "Quora").await?;
//! assert_eq!(store.get_item("office").await?, Value::from("Quora"));
//! assert_eq!(store.length().await?, 1);
//!
//! let other = store.create_instance(StoreOptions::builder().store_name("archive").build())?;
//! assert_eq!(other.get_item("office").await?, Value::Null);
//! # Ok::<(), KvError>(())
//! # }).unwrap();
//! ```

pub mod callback;
pub mod config;
pub mod cursor;
pub mod databases;
pub mod environment;
pub mod errors;
pub mod keys;
pub mod prelude;
pub mod registry;
pub mod scheduler;
pub mod serializer;
pub mod store;
pub mod traits;
pub mod value;

pub use callback::CallbackExt;
pub use config::{DriverPreference, DropOptions, StoreConfig, StoreOptions};
pub use environment::{Environment, EnvironmentConfig};
pub use errors::{KvError, KvResult};
pub use keys::IntoStoreKey;
pub use registry::{BuiltinDriver, DriverRegistry};
pub use store::KvStore;
pub use traits::driver::{StorageConnection, StorageDriver};
pub use value::{Binary, BinaryKind, Blob, Value};

// Re-exported so custom drivers can implement the traits without naming
// the crate themselves.
pub use async_trait::async_trait;
