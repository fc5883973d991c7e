// Common test utilities and helpers
#![allow(dead_code)]

use std::collections::HashSet;

use netabase_kv::{Environment, EnvironmentConfig, KvStore, StoreOptions};
use tempfile::TempDir;

pub const ALL_BACKENDS: [&str; 4] = ["structured", "relational", "flat", "memory"];

/// Install `env_logger` once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fresh environment in its own temp dir. Keep the `TempDir` alive for
/// the duration of the test.
pub fn test_env() -> (Environment, TempDir) {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    (Environment::open(dir.path()), dir)
}

/// An environment that only provides `backends`.
pub fn env_with_only(backends: &[&str]) -> (Environment, TempDir) {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let disabled: HashSet<String> = ALL_BACKENDS
        .into_iter()
        .filter(|b| !backends.contains(b))
        .map(str::to_string)
        .collect();
    let env = Environment::new(
        EnvironmentConfig::builder()
            .root(dir.path())
            .disabled_backends(disabled)
            .build(),
    );
    (env, dir)
}

/// A store pinned to `driver`.
pub fn store_on(env: &Environment, driver: &str) -> KvStore {
    KvStore::with_options(env.clone(), StoreOptions::builder().driver(driver).build())
        .expect("valid options")
}
