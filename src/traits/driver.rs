//! Driver contract.
//!
//! A backend is split in two:
//!
//! - [`StorageDriver`] is the registered, stateless descriptor: a unique
//!   name, a capability probe, and `init_storage`, which opens the backend
//!   for one store instance.
//! - [`StorageConnection`] is what `init_storage` returns: the per-instance
//!   context holding the open handle. Every data operation goes through it,
//!   so two instances never share connection state.
//!
//! Only `get_item`, `set_item`, `remove_item`, `clear` and `cursor` must be
//! written by hand. `length`, `key`, `keys` and `iterate` default to
//! walking the cursor; backends override them when they have something
//! cheaper.

use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::cursor::EntryCursor;
use crate::environment::Environment;
use crate::errors::KvResult;
use crate::value::Value;

/// Callback driven by [`StorageConnection::iterate`]: `(value, key, n)`
/// with a 1-based `n`. Returning `Break` ends the walk.
pub type Visitor<'a> = dyn FnMut(Value, &str, usize) -> ControlFlow<()> + Send + 'a;

#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Unique name the driver is registered and selected under.
    fn name(&self) -> &str;

    /// Probe whether the environment can host this backend. Never fails;
    /// any error simply means "unsupported".
    async fn is_supported(&self, env: &Environment) -> bool;

    /// Open or create the backing store for `config`.
    async fn init_storage(
        &self,
        config: &StoreConfig,
        env: &Environment,
    ) -> KvResult<Arc<dyn StorageConnection>>;

    /// Remove a whole database (`store_name == None`) or one of its stores.
    async fn drop_instance(
        &self,
        env: &Environment,
        name: &str,
        store_name: Option<&str>,
    ) -> KvResult<()>;

    /// Driver to try instead when `init_storage` fails.
    fn fallback(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
pub trait StorageConnection: Send + Sync {
    /// Value under `key`, [`Value::Null`] when absent.
    async fn get_item(&self, key: &str) -> KvResult<Value>;

    /// Store `value` under `key`; resolves with the value a later
    /// `get_item` will return.
    async fn set_item(&self, key: &str, value: Value) -> KvResult<Value>;

    async fn remove_item(&self, key: &str) -> KvResult<()>;

    async fn clear(&self) -> KvResult<()>;

    /// A fresh cursor over all entries in enumeration order.
    fn cursor(&self) -> KvResult<EntryCursor<'_>>;

    async fn length(&self) -> KvResult<usize> {
        let mut count = 0;
        for entry in self.cursor()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Key at zero-based `index`, `None` when out of range.
    async fn key(&self, index: usize) -> KvResult<Option<String>> {
        match self.cursor()?.nth(index) {
            Some(entry) => Ok(Some(entry?.0)),
            None => Ok(None),
        }
    }

    async fn keys(&self) -> KvResult<Vec<String>> {
        self.cursor()?
            .map(|entry| entry.map(|(key, _)| key))
            .collect()
    }

    async fn iterate(&self, visitor: &mut Visitor<'_>) -> KvResult<()> {
        for (n, entry) in self.cursor()?.enumerate() {
            let (key, value) = entry?;
            if visitor(value, &key, n + 1).is_break() {
                break;
            }
        }
        Ok(())
    }
}
