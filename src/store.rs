//! The store façade.
//!
//! [`KvStore`] is the one type applications talk to. It resolves a driver
//! from its preference list, initializes it lazily on first use, and routes
//! every operation through the resulting connection. Instances made with
//! [`KvStore::create_instance`] share the environment and driver registry
//! with their parent and nothing else.
//!
//! # Examples
//!
//! ```
//! use netabase_kv::{Environment, KvStore, StoreOptions, Value};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = KvStore::with_options(
//!     Environment::temp(),
//!     StoreOptions::builder().driver("flat").build(),
//! )
//! .unwrap();
//!
//! store.set_item("office", "Initech").await.unwrap();
//! assert_eq!(store.get_item("office").await.unwrap(), Value::from("Initech"));
//! assert_eq!(store.driver().as_deref(), Some("flat"));
//! # });
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::config::{DriverPreference, DropOptions, StoreConfig, StoreOptions};
use crate::environment::Environment;
use crate::errors::{KvError, KvResult};
use crate::keys::{IntoStoreKey, normalize_key};
use crate::registry::DriverRegistry;
use crate::traits::driver::{StorageConnection, StorageDriver};
use crate::value::Value;

/// The initialized backend of one instance.
struct Active {
    driver: Arc<dyn StorageDriver>,
    connection: Arc<dyn StorageConnection>,
}

struct Settings {
    config: StoreConfig,
    /// Driver chosen by the last selection, if any.
    selected: Option<Arc<dyn StorageDriver>>,
}

struct StoreInner {
    env: Environment,
    registry: Arc<DriverRegistry>,
    settings: RwLock<Settings>,
    active: Mutex<Option<Active>>,
    /// Set once the first initialization succeeded; configuration is
    /// frozen from then on.
    ready: AtomicBool,
}

/// A key/value store instance. Cloning yields another handle to the same
/// instance.
#[derive(Clone)]
pub struct KvStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("config", &self.config())
            .field("driver", &self.driver())
            .finish()
    }
}

impl KvStore {
    /// A store with the default configuration and the built-in drivers.
    pub fn new(env: Environment) -> Self {
        Self::from_parts(env, Arc::new(DriverRegistry::with_builtins()), StoreConfig::default())
    }

    pub fn with_options(env: Environment, options: StoreOptions) -> KvResult<Self> {
        let config = StoreConfig::default().merge(options)?;
        Ok(Self::from_parts(
            env,
            Arc::new(DriverRegistry::with_builtins()),
            config,
        ))
    }

    fn from_parts(env: Environment, registry: Arc<DriverRegistry>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                env,
                registry,
                settings: RwLock::new(Settings {
                    config,
                    selected: None,
                }),
                active: Mutex::new(None),
                ready: AtomicBool::new(false),
            }),
        }
    }

    /// A new, independent instance sharing this one's environment and
    /// driver registry. `options` apply over the defaults, not over this
    /// instance's configuration.
    pub fn create_instance(&self, options: StoreOptions) -> KvResult<KvStore> {
        let config = StoreConfig::default().merge(options)?;
        Ok(Self::from_parts(
            self.inner.env.clone(),
            Arc::clone(&self.inner.registry),
            config,
        ))
    }

    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    // ---- configuration ----

    pub fn config(&self) -> StoreConfig {
        self.inner.settings.read().config.clone()
    }

    /// A single configuration value by its option name (`"storeName"`, ...).
    pub fn config_value(&self, option: &str) -> Option<serde_json::Value> {
        self.inner.settings.read().config.value(option)
    }

    /// Merge `options` into the configuration.
    ///
    /// Fails with [`KvError::ConfigAfterReady`] once the store has been used.
    /// A `driver` entry re-runs driver selection.
    pub async fn configure(&self, options: StoreOptions) -> KvResult<()> {
        if self.inner.ready.load(Ordering::Acquire) {
            return Err(KvError::ConfigAfterReady);
        }
        let driver = options.driver.clone();
        {
            let mut settings = self.inner.settings.write();
            settings.config = settings.config.merge(options)?;
        }
        match driver {
            Some(preference) => self.set_driver(preference).await,
            None => Ok(()),
        }
    }

    // ---- drivers ----

    /// Choose the first registered, supported driver in `preference`.
    ///
    /// When the store is already initialized, the current connection is
    /// dropped and the next operation initializes the new driver.
    ///
    /// `config().driver` is updated even after the store is ready: the
    /// driver preference is the one option not frozen by
    /// [`configure`](Self::configure).
    pub async fn set_driver(&self, preference: impl Into<DriverPreference>) -> KvResult<()> {
        let preference = preference.into();
        self.inner.settings.write().config.driver = preference.clone();

        let mut active = self.inner.active.lock().await;
        *active = None;
        let selected = self.select(&preference).await;
        self.inner.settings.write().selected = selected.as_ref().ok().cloned();
        selected.map(|_| ())
    }

    pub fn get_driver(&self, name: &str) -> KvResult<Arc<dyn StorageDriver>> {
        self.inner.registry.get(name)
    }

    /// Register a custom driver with the shared registry.
    pub fn define_driver(&self, driver: Arc<dyn StorageDriver>) -> KvResult<()> {
        self.inner.registry.define(driver)
    }

    /// Replace a registered driver on purpose.
    pub fn redefine_driver(&self, driver: Arc<dyn StorageDriver>) -> KvResult<()> {
        self.inner.registry.redefine(driver)
    }

    /// Whether `name` is registered and the environment can host it.
    pub async fn supports(&self, name: &str) -> bool {
        match self.inner.registry.get(name) {
            Ok(driver) => driver.is_supported(&self.inner.env).await,
            Err(_) => false,
        }
    }

    /// Name of the selected driver, `None` until one has been chosen.
    pub fn driver(&self) -> Option<String> {
        self.inner
            .settings
            .read()
            .selected
            .as_ref()
            .map(|driver| driver.name().to_string())
    }

    async fn select(&self, preference: &DriverPreference) -> KvResult<Arc<dyn StorageDriver>> {
        for name in preference.candidates() {
            let driver = match self.inner.registry.get(&name) {
                Ok(driver) => driver,
                Err(_) => {
                    debug!("Skipping unknown driver {name}");
                    continue;
                }
            };
            if driver.is_supported(&self.inner.env).await {
                debug!("Selected driver {name}");
                return Ok(driver);
            }
            debug!("Driver {name} is not supported here");
        }
        Err(KvError::NoAvailableDriver)
    }

    // ---- readiness ----

    /// Initialize the selected driver if that has not happened yet.
    pub async fn ready(&self) -> KvResult<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> KvResult<Arc<dyn StorageConnection>> {
        let mut active = self.inner.active.lock().await;
        if let Some(active) = active.as_ref() {
            return Ok(Arc::clone(&active.connection));
        }

        let (config, selected) = {
            let settings = self.inner.settings.read();
            (settings.config.clone(), settings.selected.clone())
        };
        let driver = match selected {
            Some(driver) => driver,
            None => {
                let driver = self.select(&config.driver).await?;
                self.inner.settings.write().selected = Some(Arc::clone(&driver));
                driver
            }
        };

        let opened = driver.init_storage(&config, &self.inner.env).await;
        let (driver, connection) = match opened {
            Ok(connection) => (driver, connection),
            Err(e) => self.init_fallback(driver.as_ref(), &config, e).await?,
        };
        debug!("Store {}/{} ready on {}", config.name, config.store_name, driver.name());

        self.inner.settings.write().selected = Some(Arc::clone(&driver));
        self.inner.ready.store(true, Ordering::Release);
        *active = Some(Active {
            driver,
            connection: Arc::clone(&connection),
        });
        Ok(connection)
    }

    async fn init_fallback(
        &self,
        failed: &dyn StorageDriver,
        config: &StoreConfig,
        error: KvError,
    ) -> KvResult<(Arc<dyn StorageDriver>, Arc<dyn StorageConnection>)> {
        let Some(name) = failed.fallback() else {
            return Err(error);
        };
        let Ok(fallback) = self.inner.registry.get(name) else {
            return Err(error);
        };
        if !fallback.is_supported(&self.inner.env).await {
            return Err(error);
        }
        warn!(
            "Driver {} failed to open ({error}); falling back to {name}",
            failed.name()
        );
        let connection = fallback.init_storage(config, &self.inner.env).await?;
        Ok((fallback, connection))
    }

    // ---- data operations ----

    /// The value under `key`, [`Value::Null`] when there is none.
    pub async fn get_item<K: IntoStoreKey>(&self, key: K) -> KvResult<Value> {
        let key = normalize_key(key);
        self.connection().await?.get_item(&key).await
    }

    /// Store `value` under `key` and resolve with the value a later
    /// [`get_item`](Self::get_item) returns.
    pub async fn set_item<K, V>(&self, key: K, value: V) -> KvResult<Value>
    where
        K: IntoStoreKey,
        V: Into<Value>,
    {
        let key = normalize_key(key);
        self.connection().await?.set_item(&key, value.into()).await
    }

    pub async fn remove_item<K: IntoStoreKey>(&self, key: K) -> KvResult<()> {
        let key = normalize_key(key);
        self.connection().await?.remove_item(&key).await
    }

    pub async fn clear(&self) -> KvResult<()> {
        self.connection().await?.clear().await
    }

    pub async fn length(&self) -> KvResult<usize> {
        self.connection().await?.length().await
    }

    /// Key at zero-based position `n`; `None` when `n` is negative or out of
    /// range.
    pub async fn key(&self, n: i64) -> KvResult<Option<String>> {
        let connection = self.connection().await?;
        match usize::try_from(n) {
            Ok(index) => connection.key(index).await,
            Err(_) => Ok(None),
        }
    }

    pub async fn keys(&self) -> KvResult<Vec<String>> {
        self.connection().await?.keys().await
    }

    /// Call `iteratee(value, key, n)` for each entry with a 1-based `n`.
    ///
    /// The walk stops at the first `Some` the iteratee returns, and that
    /// value is the result. A walk that never stops resolves with `None`.
    pub async fn iterate<R, F>(&self, mut iteratee: F) -> KvResult<Option<R>>
    where
        R: Send,
        F: FnMut(Value, &str, usize) -> Option<R> + Send,
    {
        let connection = self.connection().await?;
        let mut found = None;
        let mut visitor = |value: Value, key: &str, n: usize| match iteratee(value, key, n) {
            Some(result) => {
                found = Some(result);
                ControlFlow::Break(())
            }
            None => ControlFlow::Continue(()),
        };
        connection.iterate(&mut visitor).await?;
        Ok(found)
    }

    /// Remove a database or one of its stores.
    ///
    /// Without options this instance's own store goes. With only a `name`,
    /// the whole database of that name goes.
    pub async fn drop_instance(&self, options: Option<DropOptions>) -> KvResult<()> {
        let config = self.config();
        let (name, store_name) = match options {
            Some(DropOptions {
                name: Some(name),
                store_name,
            }) => (name, store_name),
            Some(DropOptions {
                name: None,
                store_name,
            }) => (
                config.name.clone(),
                Some(store_name.unwrap_or_else(|| config.store_name.clone())),
            ),
            None => (config.name.clone(), Some(config.store_name.clone())),
        };
        let store_name = store_name.map(|s| crate::config::sanitize_store_name(&s));

        self.connection().await?;
        let mut active = self.inner.active.lock().await;
        let driver = match active.as_ref() {
            Some(active) => Arc::clone(&active.driver),
            None => return Err(KvError::NoAvailableDriver),
        };
        driver
            .drop_instance(&self.inner.env, &name, store_name.as_deref())
            .await?;

        let own = name == config.name
            && store_name.as_deref().is_none_or(|s| s == config.store_name);
        if own {
            debug!("Dropped own store {name}; it reopens on next use");
            *active = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentConfig;

    fn only(backends: &[&str]) -> Environment {
        let disabled = ["structured", "relational", "flat", "memory"]
            .into_iter()
            .filter(|b| !backends.contains(b))
            .map(str::to_string)
            .collect();
        Environment::new(
            EnvironmentConfig::builder()
                .root(Environment::temp().root())
                .disabled_backends(disabled)
                .build(),
        )
    }

    #[tokio::test]
    async fn first_supported_driver_wins() {
        let store = KvStore::new(only(&["flat"]));
        store.ready().await.unwrap();
        assert_eq!(store.driver().as_deref(), Some("flat"));
    }

    #[tokio::test]
    async fn nothing_supported() {
        let store = KvStore::new(only(&[]));
        assert!(matches!(store.ready().await, Err(KvError::NoAvailableDriver)));
        assert!(matches!(
            store.get_item("k").await,
            Err(KvError::NoAvailableDriver)
        ));
        assert_eq!(store.driver(), None);
    }

    #[tokio::test]
    async fn negative_index_is_none() {
        let store = KvStore::new(only(&["memory"]));
        store.set_driver("memory").await.unwrap();
        store.set_item("a", 1).await.unwrap();
        assert_eq!(store.key(-1).await.unwrap(), None);
        assert_eq!(store.key(0).await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn configure_is_frozen_after_use() {
        let store = KvStore::new(only(&["memory"]));
        store
            .configure(StoreOptions::builder().driver("memory").name("early").build())
            .await
            .unwrap();
        assert_eq!(store.driver().as_deref(), Some("memory"));
        store.ready().await.unwrap();
        assert!(matches!(
            store.configure(StoreOptions::builder().name("late").build()).await,
            Err(KvError::ConfigAfterReady)
        ));
        assert_eq!(store.config().name, "early");
    }

    #[tokio::test]
    async fn iterate_stops_at_first_result() {
        let store = KvStore::new(only(&["memory"]));
        store.set_driver("memory").await.unwrap();
        for key in ["a", "b", "c"] {
            store.set_item(key, key).await.unwrap();
        }
        let mut visited = Vec::new();
        let found = store
            .iterate(|_, key, n| {
                visited.push(n);
                (key == "b").then(|| key.to_string())
            })
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("b"));
        assert_eq!(visited, vec![1, 2]);
    }
}
