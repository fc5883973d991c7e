//! Relational driver over SQLite.
//!
//! Each database name is one file `<root>/<name>.sqlite`, the name run
//! through [`encode_name`]; each store is a
//! table `(id INTEGER PRIMARY KEY, key UNIQUE, value)` holding serialized
//! envelopes. Entries enumerate in row-id order, so re-setting a key moves
//! it to the end.
//!
//! rusqlite is blocking; data operations run on the blocking pool against
//! the instance's own connection.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};

use crate::config::{StoreConfig, encode_name, sanitize_store_name};
use crate::cursor::{EntryCursor, Page, PagedCursor};
use crate::environment::Environment;
use crate::errors::{KvError, KvResult};
use crate::registry::BuiltinDriver;
use crate::serializer::{deserialize, serialize};
use crate::traits::driver::{StorageConnection, StorageDriver};
use crate::value::Value;

const PAGE_SIZE: i64 = 128;
const BUSY_TIMEOUT_MS: u32 = 5000;

pub struct SqliteDriver;

impl SqliteDriver {
    fn database_path(env: &Environment, name: &str) -> PathBuf {
        env.root().join(format!("{}.sqlite", encode_name(name)))
    }
}

#[async_trait]
impl StorageDriver for SqliteDriver {
    fn name(&self) -> &str {
        BuiltinDriver::Relational.as_ref()
    }

    async fn is_supported(&self, env: &Environment) -> bool {
        if !env.provides(self.name()) {
            return false;
        }
        match Connection::open_in_memory() {
            Ok(_) => true,
            Err(e) => {
                debug!("sqlite unavailable: {e}");
                false
            }
        }
    }

    async fn init_storage(
        &self,
        config: &StoreConfig,
        env: &Environment,
    ) -> KvResult<Arc<dyn StorageConnection>> {
        env.ensure_root()?;
        let path = Self::database_path(env, &config.name);
        let table = quote_table(&config.store_name);
        let size = config.size;
        let ddl_table = table.clone();
        let conn = tokio::task::spawn_blocking(move || -> KvResult<Connection> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS.into()))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            let pages = (size as i64 / page_size.max(1)).max(1);
            let _: i64 = conn.query_row(&format!("PRAGMA max_page_count = {pages}"), [], |row| {
                row.get(0)
            })?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {ddl_table} \
                 (id INTEGER PRIMARY KEY, key UNIQUE, value)"
            ))
            .map_err(sql_error)?;
            Ok(conn)
        })
        .await??;
        debug!("Opened relational store {}/{}", config.name, config.store_name);
        Ok(Arc::new(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
            table,
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
        tokio::task::spawn_blocking(move || -> KvResult<()> {
            let conn = Connection::open(&path)?;
            let tables = match store_name {
                Some(store_name) => vec![store_name],
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT name FROM sqlite_master \
                         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                    )?;
                    let names = stmt
                        .query_map([], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    names
                }
            };
            for table in tables {
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_table(&table)))?;
            }
            Ok(())
        })
        .await?
    }

    fn fallback(&self) -> Option<&str> {
        Some(BuiltinDriver::Flat.as_ref())
    }
}

/// Table names only ever contain `[A-Za-z0-9_]`; quoting keeps keywords safe.
fn quote_table(store_name: &str) -> String {
    format!("\"{}\"", sanitize_store_name(store_name))
}

/// Map `SQLITE_FULL` to the distinguished quota error.
fn sql_error(err: rusqlite::Error) -> KvError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DiskFull) => {
            warn!("relational store is full: {err}");
            KvError::QuotaExceeded(err.to_string())
        }
        _ => KvError::Sqlite(err),
    }
}

pub struct SqliteConnection {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteConnection {
    async fn run<T, F>(&self, work: F) -> KvResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || work(&conn.lock(), &table).map_err(sql_error)).await?
    }
}

#[async_trait]
impl StorageConnection for SqliteConnection {
    async fn get_item(&self, key: &str) -> KvResult<Value> {
        let key = key.to_string();
        let raw: Option<String> = self
            .run(move |conn, table| {
                conn.query_row(
                    &format!("SELECT value FROM {table} WHERE key = ?1 LIMIT 1"),
                    params![key],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        match raw {
            Some(raw) => deserialize(&raw),
            None => Ok(Value::Null),
        }
    }

    async fn set_item(&self, key: &str, value: Value) -> KvResult<Value> {
        let raw = serialize(&value)?;
        let key = key.to_string();
        self.run(move |conn, table| {
            conn.execute(
                &format!("INSERT OR REPLACE INTO {table} (key, value) VALUES (?1, ?2)"),
                params![key, raw],
            )
        })
        .await?;
        Ok(value)
    }

    async fn remove_item(&self, key: &str) -> KvResult<()> {
        let key = key.to_string();
        self.run(move |conn, table| {
            conn.execute(&format!("DELETE FROM {table} WHERE key = ?1"), params![key])
        })
        .await?;
        Ok(())
    }

    async fn clear(&self) -> KvResult<()> {
        self.run(|conn, table| conn.execute(&format!("DELETE FROM {table}"), []))
            .await?;
        Ok(())
    }

    fn cursor(&self) -> KvResult<EntryCursor<'_>> {
        let conn = Arc::clone(&self.conn);
        let table = self.table.clone();
        // Pages are fetched on the calling thread and wait on the connection
        // lock, so a page can stall behind a write running on the blocking pool.
        Ok(Box::new(PagedCursor::new(move |after: Option<&i64>| {
            let rows: Vec<(i64, String, String)> = {
                let conn = conn.lock();
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT id, key, value FROM {table} WHERE id > ?1 ORDER BY id LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![after.copied().unwrap_or(i64::MIN), PAGE_SIZE], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            let next = (rows.len() as i64 == PAGE_SIZE)
                .then(|| rows.last().map(|(id, _, _)| *id))
                .flatten();
            let entries = rows
                .into_iter()
                .map(|(_, key, raw)| Ok((key, deserialize(&raw)?)))
                .collect::<KvResult<Vec<_>>>()?;
            Ok(Page { entries, next })
        })))
    }

    async fn length(&self) -> KvResult<usize> {
        let count: i64 = self
            .run(|conn, table| {
                conn.query_row(&format!("SELECT COUNT(key) FROM {table}"), [], |row| {
                    row.get(0)
                })
            })
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn key(&self, index: usize) -> KvResult<Option<String>> {
        let offset = i64::try_from(index).unwrap_or(i64::MAX);
        self.run(move |conn, table| {
            conn.query_row(
                &format!("SELECT key FROM {table} ORDER BY id LIMIT 1 OFFSET ?1"),
                params![offset],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn keys(&self) -> KvResult<Vec<String>> {
        self.run(|conn, table| {
            let mut stmt = conn.prepare_cached(&format!("SELECT key FROM {table} ORDER BY id"))?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>();
            keys
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connection(env: &Environment, store: &str) -> Arc<dyn StorageConnection> {
        let config = StoreConfig {
            store_name: store.to_string(),
            ..StoreConfig::default()
        };
        SqliteDriver.init_storage(&config, env).await.unwrap()
    }

    #[tokio::test]
    async fn reset_moves_key_to_the_end() {
        let env = Environment::temp();
        let conn = connection(&env, "order").await;
        for key in ["a", "b", "c"] {
            conn.set_item(key, key.into()).await.unwrap();
        }
        conn.set_item("a", "again".into()).await.unwrap();
        assert_eq!(conn.keys().await.unwrap(), vec!["b", "c", "a"]);
        assert_eq!(conn.key(2).await.unwrap().as_deref(), Some("a"));
        assert_eq!(conn.key(3).await.unwrap(), None);
        assert_eq!(conn.length().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn keyword_store_names_are_quoted() {
        let env = Environment::temp();
        let conn = connection(&env, "select").await;
        conn.set_item("k", 1.into()).await.unwrap();
        assert_eq!(conn.get_item("k").await.unwrap(), Value::Int(1));
    }

    #[tokio::test]
    async fn drop_single_table() {
        let env = Environment::temp();
        let one = connection(&env, "one").await;
        let two = connection(&env, "two").await;
        one.set_item("k", 1.into()).await.unwrap();
        two.set_item("k", 2.into()).await.unwrap();

        SqliteDriver
            .drop_instance(&env, "localforage", Some("one"))
            .await
            .unwrap();
        assert!(one.get_item("k").await.is_err());
        assert_eq!(two.get_item("k").await.unwrap(), Value::Int(2));
    }

    #[tokio::test]
    async fn slashed_database_name_opens_inside_the_root() {
        let env = Environment::temp();
        let config = StoreConfig {
            name: "team/alpha".to_string(),
            ..StoreConfig::default()
        };
        let conn = SqliteDriver.init_storage(&config, &env).await.unwrap();
        conn.set_item("k", 1.into()).await.unwrap();
        assert!(SqliteDriver::database_path(&env, "team/alpha").is_file());
        assert!(!env.root().join("team").exists());
    }

    #[tokio::test]
    async fn insert_over_size_is_a_quota_error() {
        let env = Environment::temp();
        let config = StoreConfig {
            size: 64 * 1024,
            ..StoreConfig::default()
        };
        let conn = SqliteDriver.init_storage(&config, &env).await.unwrap();
        conn.set_item("small", 1.into()).await.unwrap();

        let err = conn
            .set_item("big", "x".repeat(1 << 20).into())
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded(), "{err}");
        assert_eq!(conn.get_item("small").await.unwrap(), Value::Int(1));
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_table("my-store"), "\"my_store\"");
    }
}
