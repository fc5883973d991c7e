//! The storage environment.
//!
//! An [`Environment`] plays the part a browser plays for web storage: it
//! decides which backends exist, owns the storage root, and holds the
//! engine-level resources several stores share, namely the single flat
//! key/value space, the sled database handles (one per database
//! directory, since sled locks it), and the memory repository. Connection
//! state of individual stores stays with the stores.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use typed_builder::TypedBuilder;

use crate::errors::KvResult;

/// Default collection window for batched structured-store writes.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(10);

/// File name of the shared flat space inside the root.
pub const FLAT_SPACE_FILE: &str = "flat_space.redb";

/// Environment configuration.
///
/// # Examples
///
/// ```
/// use netabase_kv::environment::EnvironmentConfig;
///
/// let config = EnvironmentConfig::builder()
///     .root("/tmp/kv")
///     .disabled_backends(["structured".to_string()].into())
///     .build();
/// assert!(config.disabled_backends.contains("structured"));
/// ```
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct EnvironmentConfig {
    /// Directory holding every persisted store.
    #[builder(setter(into))]
    pub root: PathBuf,

    /// Backends this environment reports as missing.
    #[builder(default)]
    pub disabled_backends: HashSet<String>,

    /// How long the structured-store scheduler collects writes before
    /// flushing a batch.
    #[builder(default = DEFAULT_BATCH_WINDOW)]
    pub batch_window: Duration,
}

/// Tables of the memory backend, keyed by database then store name.
pub(crate) type MemoryTable = Arc<RwLock<BTreeMap<String, String>>>;

struct EnvironmentInner {
    config: EnvironmentConfig,
    #[cfg(feature = "sled")]
    sled_dbs: Mutex<HashMap<PathBuf, sled::Db>>,
    #[cfg(feature = "redb")]
    flat_space: Mutex<Option<Arc<redb::Database>>>,
    memory: Mutex<HashMap<String, HashMap<String, MemoryTable>>>,
}

/// Shared handle to the storage environment. Cloning is cheap.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvironmentInner>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Environment {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self {
            inner: Arc::new(EnvironmentInner {
                config,
                #[cfg(feature = "sled")]
                sled_dbs: Mutex::new(HashMap::new()),
                #[cfg(feature = "redb")]
                flat_space: Mutex::new(None),
                memory: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// An environment rooted at `root` with every backend enabled.
    pub fn open<P: Into<PathBuf>>(root: P) -> Self {
        Self::new(EnvironmentConfig::builder().root(root).build())
    }

    /// An environment rooted in a fresh directory under the system temp dir.
    pub fn temp() -> Self {
        Self::open(unique_temp_dir())
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.inner.config
    }

    pub fn root(&self) -> &Path {
        &self.inner.config.root
    }

    pub fn batch_window(&self) -> Duration {
        self.inner.config.batch_window
    }

    /// Whether the environment claims to provide backend `name` at all.
    pub fn provides(&self, name: &str) -> bool {
        !self.inner.config.disabled_backends.contains(name)
    }

    /// Make sure the root directory exists.
    pub fn ensure_root(&self) -> KvResult<&Path> {
        std::fs::create_dir_all(self.root())?;
        Ok(self.root())
    }

    /// Open (or reuse) the sled database stored at `path`.
    #[cfg(feature = "sled")]
    pub(crate) fn sled_db(&self, path: &Path) -> KvResult<sled::Db> {
        let mut dbs = self.inner.sled_dbs.lock();
        if let Some(db) = dbs.get(path) {
            return Ok(db.clone());
        }
        let db = sled::Config::new().path(path).open()?;
        dbs.insert(path.to_path_buf(), db.clone());
        Ok(db)
    }

    /// The shared flat key/value space, opened on first use.
    #[cfg(feature = "redb")]
    pub(crate) fn flat_space(&self) -> KvResult<Arc<redb::Database>> {
        let mut slot = self.inner.flat_space.lock();
        if let Some(db) = slot.as_ref() {
            return Ok(Arc::clone(db));
        }
        let root = self.ensure_root()?;
        let db = Arc::new(redb::Database::create(root.join(FLAT_SPACE_FILE))?);
        *slot = Some(Arc::clone(&db));
        Ok(db)
    }

    /// The memory table for `name`/`store_name`, created on first use.
    pub(crate) fn memory_table(&self, name: &str, store_name: &str) -> MemoryTable {
        let mut repo = self.inner.memory.lock();
        Arc::clone(
            repo.entry(name.to_string())
                .or_default()
                .entry(store_name.to_string())
                .or_default(),
        )
    }

    /// Drop one memory store, or a whole memory database.
    pub(crate) fn drop_memory(&self, name: &str, store_name: Option<&str>) {
        let mut repo = self.inner.memory.lock();
        match store_name {
            Some(store_name) => {
                if let Some(db) = repo.get_mut(name) {
                    if let Some(table) = db.remove(store_name) {
                        table.write().clear();
                    }
                }
            }
            None => {
                if let Some(db) = repo.remove(name) {
                    for table in db.values() {
                        table.write().clear();
                    }
                }
            }
        }
    }
}

fn unique_temp_dir() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "netabase_kv_{}_{nanos:x}_{seq}",
        std::process::id()
    ))
}
