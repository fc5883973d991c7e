//! Structured-store driver over sled.
//!
//! A database name maps to the sled directory `<root>/<name>.sled` (the name
//! run through [`encode_name`]) and each
//! store to one tree inside it. Values are `bincode`-encoded [`Value`]s, so
//! binary data is stored natively without envelopes.
//!
//! Writes are routed through a per-connection
//! [`TaskScheduler`](crate::scheduler::TaskScheduler) that coalesces them
//! into `apply_batch` calls. Reads run straight away on the blocking pool.
//!
//! The highest version a database has been opened with is kept in a
//! metadata tree. Opening with a lower version fails with
//! [`KvError::VersionMismatch`].

mod batch;
mod iterator;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::config::{StoreConfig, encode_name};
use crate::cursor::EntryCursor;
use crate::environment::Environment;
use crate::errors::{KvError, KvResult};
use crate::registry::BuiltinDriver;
use crate::scheduler::{TaskScheduler, WriteOp};
use crate::traits::driver::{StorageConnection, StorageDriver};
use crate::value::Value;

pub use batch::SledBatchWriter;
pub use iterator::SledCursor;

/// Store names are sanitized to `[A-Za-z0-9_]`, so this can never collide.
const META_TREE: &str = "netabase_kv:meta";
const VERSION_KEY: &str = "version";
const DEFAULT_TREE: &[u8] = b"__sled__default";

pub(crate) fn encode_value(value: &Value) -> KvResult<Vec<u8>> {
    Ok(bincode::encode_to_vec(value, bincode::config::standard())?)
}

pub(crate) fn decode_value(bytes: &[u8]) -> KvResult<Value> {
    let (value, _) = bincode::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

pub(crate) fn is_storage_full(err: &sled::Error) -> bool {
    matches!(err, sled::Error::Io(io) if io.kind() == std::io::ErrorKind::StorageFull)
}

pub(crate) fn sled_error(err: sled::Error) -> KvError {
    if is_storage_full(&err) {
        KvError::QuotaExceeded(err.to_string())
    } else {
        KvError::Sled(err)
    }
}

pub struct SledDriver;

impl SledDriver {
    fn database_path(env: &Environment, name: &str) -> PathBuf {
        env.root().join(format!("{}.sled", encode_name(name)))
    }

    /// Check `requested` against the stored version, raising it if newer.
    fn check_version(db: &sled::Db, requested: u64) -> KvResult<()> {
        let meta = db.open_tree(META_TREE)?;
        let found = match meta.get(VERSION_KEY)? {
            Some(raw) => decode_value(&raw)?.as_i64().unwrap_or(0).max(0) as u64,
            None => 0,
        };
        if requested < found {
            return Err(KvError::VersionMismatch { requested, found });
        }
        if requested > found {
            debug!("Upgrading structured database from version {found} to {requested}");
            meta.insert(VERSION_KEY, encode_value(&Value::Int(requested as i64))?)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for SledDriver {
    fn name(&self) -> &str {
        BuiltinDriver::Structured.as_ref()
    }

    async fn is_supported(&self, env: &Environment) -> bool {
        env.provides(self.name())
    }

    async fn init_storage(
        &self,
        config: &StoreConfig,
        env: &Environment,
    ) -> KvResult<Arc<dyn StorageConnection>> {
        env.ensure_root()?;
        let path = Self::database_path(env, &config.name);
        let version = config.integral_version();
        let store_name = config.store_name.clone();
        let env_handle = env.clone();
        let tree = tokio::task::spawn_blocking(move || -> KvResult<sled::Tree> {
            let db = env_handle.sled_db(&path)?;
            Self::check_version(&db, version)?;
            Ok(db.open_tree(store_name.as_bytes())?)
        })
        .await??;
        debug!("Opened structured store {}/{}", config.name, config.store_name);

        let writer = Arc::new(SledBatchWriter::new(tree.clone()));
        Ok(Arc::new(SledConnection {
            tree,
            scheduler: TaskScheduler::new(writer, env.batch_window()),
        }))
    }

    async fn drop_instance(
        &self,
        env: &Environment,
        name: &str,
        store_name: Option<&str>,
    ) -> KvResult<()> {
        let path = Self::database_path(env, name);
        if !path.exists() {
            return Ok(());
        }
        let store_name = store_name.map(str::to_string);
        let env_handle = env.clone();
        tokio::task::spawn_blocking(move || -> KvResult<()> {
            let db = env_handle.sled_db(&path)?;
            match store_name {
                Some(store_name) => {
                    db.drop_tree(store_name.as_bytes())?;
                }
                None => {
                    // The default tree cannot be dropped, only emptied.
                    for tree in db.tree_names() {
                        if &*tree != DEFAULT_TREE {
                            db.drop_tree(&tree)?;
                        }
                    }
                    db.clear()?;
                }
            }
            db.flush()?;
            Ok(())
        })
        .await?
    }
}

pub struct SledConnection {
    tree: sled::Tree,
    scheduler: TaskScheduler,
}

impl SledConnection {
    async fn read<T, F>(&self, work: F) -> KvResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&sled::Tree) -> KvResult<T> + Send + 'static,
    {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || work(&tree)).await?
    }
}

#[async_trait]
impl StorageConnection for SledConnection {
    async fn get_item(&self, key: &str) -> KvResult<Value> {
        let key = key.to_string();
        self.read(move |tree| match tree.get(key.as_bytes()).map_err(sled_error)? {
            Some(raw) => decode_value(&raw),
            None => Ok(Value::Null),
        })
        .await
    }

    async fn set_item(&self, key: &str, value: Value) -> KvResult<Value> {
        self.scheduler
            .submit(WriteOp::Put {
                key: key.to_string(),
                value: value.clone(),
            })
            .await?;
        Ok(value)
    }

    async fn remove_item(&self, key: &str) -> KvResult<()> {
        self.scheduler
            .submit(WriteOp::Delete {
                key: key.to_string(),
            })
            .await
    }

    async fn clear(&self) -> KvResult<()> {
        self.scheduler.submit(WriteOp::Clear).await
    }

    fn cursor(&self) -> KvResult<EntryCursor<'_>> {
        Ok(Box::new(SledCursor::new(&self.tree)))
    }

    async fn length(&self) -> KvResult<usize> {
        self.read(|tree| Ok(tree.len())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::temp()
    }

    fn config(store: &str, version: f64) -> StoreConfig {
        StoreConfig {
            store_name: store.to_string(),
            version,
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn writes_are_visible_after_they_resolve() {
        let env = env();
        let conn = SledDriver.init_storage(&config("s", 1.0), &env).await.unwrap();
        conn.set_item("b", Value::Int(2)).await.unwrap();
        conn.set_item("a", Value::Int(1)).await.unwrap();
        assert_eq!(conn.get_item("a").await.unwrap(), Value::Int(1));
        assert_eq!(conn.keys().await.unwrap(), vec!["a", "b"]);
        assert_eq!(conn.length().await.unwrap(), 2);

        conn.remove_item("a").await.unwrap();
        assert_eq!(conn.get_item("a").await.unwrap(), Value::Null);
        conn.clear().await.unwrap();
        assert_eq!(conn.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lower_version_is_rejected() {
        let env = env();
        SledDriver.init_storage(&config("s", 3.0), &env).await.unwrap();
        let err = SledDriver
            .init_storage(&config("s", 2.0), &env)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            KvError::VersionMismatch {
                requested: 2,
                found: 3
            }
        ));
        assert!(SledDriver.init_storage(&config("t", 3.0), &env).await.is_ok());
    }

    #[tokio::test]
    async fn database_names_stay_inside_the_root() {
        let parent = tempfile::tempdir().unwrap();
        let env = Environment::open(parent.path().join("root"));
        let escaping = StoreConfig {
            name: "../escaped".to_string(),
            ..config("s", 1.0)
        };
        let conn = SledDriver.init_storage(&escaping, &env).await.unwrap();
        conn.set_item("k", Value::Int(1)).await.unwrap();

        assert!(!parent.path().join("escaped.sled").exists());
        assert!(SledDriver::database_path(&env, "../escaped").starts_with(env.root()));
        assert!(SledDriver::database_path(&env, "../escaped").exists());
    }

    #[test]
    fn full_disk_maps_to_quota() {
        let io = std::io::Error::from(std::io::ErrorKind::StorageFull);
        assert!(sled_error(sled::Error::Io(io)).is_quota_exceeded());
        assert!(!sled_error(sled::Error::Unsupported("x".into())).is_quota_exceeded());
    }

    #[tokio::test]
    async fn stores_share_a_database_but_not_keys() {
        let env = env();
        let a = SledDriver.init_storage(&config("a", 1.0), &env).await.unwrap();
        let b = SledDriver.init_storage(&config("b", 1.0), &env).await.unwrap();
        a.set_item("k", "v1".into()).await.unwrap();
        assert_eq!(b.get_item("k").await.unwrap(), Value::Null);

        SledDriver
            .drop_instance(&env, "localforage", None)
            .await
            .unwrap();
        let again = SledDriver.init_storage(&config("a", 1.0), &env).await.unwrap();
        assert_eq!(again.get_item("k").await.unwrap(), Value::Null);
    }
}
