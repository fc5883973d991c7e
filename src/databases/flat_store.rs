//! Flat driver over the environment's shared redb space.
//!
//! All flat stores of an environment live in one string → string table,
//! the way every page of an origin shares one `localStorage`. Each store
//! owns the key prefix `<name>/<storeName>/`, both segments passed through
//! [`encode_name`] so neither contains the separator. `length`, `keys` and
//! `clear` only ever look inside that prefix. Values are serialized envelopes.
//!
//! redb is synchronous and fast for single-key work, so operations run
//! inline and resolve immediately.

use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::config::{StoreConfig, encode_name};
use crate::cursor::{EntryCursor, Page, PagedCursor};
use crate::environment::Environment;
use crate::errors::{KvError, KvResult};
use crate::registry::BuiltinDriver;
use crate::serializer::{deserialize, serialize};
use crate::traits::driver::{StorageConnection, StorageDriver};
use crate::value::Value;

const FLAT_TABLE: TableDefinition<'static, &str, &str> = TableDefinition::new("flat_space");
const PAGE_SIZE: usize = 128;

/// Prefix owning every key of `name`/`store_name` in the flat space.
pub fn key_prefix(name: &str, store_name: &str) -> String {
    format!("{}{}/", database_prefix(name), encode_name(store_name))
}

/// Prefix owning every store of database `name`.
fn database_prefix(name: &str) -> String {
    format!("{}/", encode_name(name))
}

pub struct FlatDriver;

#[async_trait]
impl StorageDriver for FlatDriver {
    fn name(&self) -> &str {
        BuiltinDriver::Flat.as_ref()
    }

    async fn is_supported(&self, env: &Environment) -> bool {
        if !env.provides(self.name()) {
            return false;
        }
        match env.flat_space() {
            Ok(_) => true,
            Err(e) => {
                debug!("flat space unavailable: {e}");
                false
            }
        }
    }

    async fn init_storage(
        &self,
        config: &StoreConfig,
        env: &Environment,
    ) -> KvResult<Arc<dyn StorageConnection>> {
        let db = env.flat_space()?;
        // Make sure the table exists so readers never see TableDoesNotExist.
        let txn = db.begin_write()?;
        txn.open_table(FLAT_TABLE)?;
        txn.commit()?;
        Ok(Arc::new(FlatConnection {
            db,
            prefix: key_prefix(&config.name, &config.store_name),
        }))
    }

    async fn drop_instance(
        &self,
        env: &Environment,
        name: &str,
        store_name: Option<&str>,
    ) -> KvResult<()> {
        let prefix = match store_name {
            Some(store_name) => key_prefix(name, store_name),
            None => database_prefix(name),
        };
        let db = env.flat_space()?;
        remove_prefixed(&db, &prefix)
    }
}

fn remove_prefixed(db: &Database, prefix: &str) -> KvResult<()> {
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(FLAT_TABLE)?;
        let doomed: Vec<String> = table
            .range::<&str>(prefix..)?
            .map(|entry| entry.map(|(k, _)| k.value().to_string()))
            .take_while(|key| key.as_ref().map_or(true, |k| k.starts_with(prefix)))
            .collect::<Result<_, _>>()?;
        for key in doomed {
            table.remove(key.as_str())?;
        }
    }
    txn.commit()?;
    Ok(())
}

pub struct FlatConnection {
    db: Arc<Database>,
    prefix: String,
}

impl FlatConnection {
    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Up to `limit` prefixed keys strictly after `after` (a full key).
    fn scan(
        db: &Database,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> KvResult<Vec<(String, String)>> {
        let txn = db.begin_read()?;
        let table = txn.open_table(FLAT_TABLE)?;
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Included(prefix),
        };
        let mut out = Vec::new();
        for entry in table.range::<&str>((lower, Bound::Unbounded))? {
            let (k, v) = entry?;
            let key = k.value();
            if !key.starts_with(prefix) || out.len() == limit {
                break;
            }
            out.push((key.to_string(), v.value().to_string()));
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageConnection for FlatConnection {
    async fn get_item(&self, key: &str) -> KvResult<Value> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FLAT_TABLE)?;
        let raw = table
            .get(self.full_key(key).as_str())?
            .map(|guard| guard.value().to_string());
        match raw {
            Some(raw) => deserialize(&raw),
            None => Ok(Value::Null),
        }
    }

    async fn set_item(&self, key: &str, value: Value) -> KvResult<Value> {
        let raw = serialize(&value)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FLAT_TABLE)?;
            table
                .insert(self.full_key(key).as_str(), raw.as_str())
                .map_err(storage_full)?;
        }
        txn.commit()?;
        Ok(value)
    }

    async fn remove_item(&self, key: &str) -> KvResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FLAT_TABLE)?;
            table.remove(self.full_key(key).as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    async fn clear(&self) -> KvResult<()> {
        remove_prefixed(&self.db, &self.prefix)
    }

    fn cursor(&self) -> KvResult<EntryCursor<'_>> {
        let db = Arc::clone(&self.db);
        let prefix = self.prefix.clone();
        Ok(Box::new(PagedCursor::new(move |after: Option<&String>| {
            let rows = Self::scan(&db, &prefix, after.map(String::as_str), PAGE_SIZE)?;
            let next = (rows.len() == PAGE_SIZE)
                .then(|| rows.last().map(|(k, _)| k.clone()))
                .flatten();
            let entries = rows
                .into_iter()
                .map(|(k, raw)| Ok((k[prefix.len()..].to_string(), deserialize(&raw)?)))
                .collect::<KvResult<Vec<_>>>()?;
            Ok(Page { entries, next })
        })))
    }

    async fn length(&self) -> KvResult<usize> {
        Ok(Self::scan(&self.db, &self.prefix, None, usize::MAX)?.len())
    }

    async fn keys(&self) -> KvResult<Vec<String>> {
        Ok(Self::scan(&self.db, &self.prefix, None, usize::MAX)?
            .into_iter()
            .map(|(k, _)| k[self.prefix.len()..].to_string())
            .collect())
    }
}

fn storage_full(err: redb::StorageError) -> KvError {
    match err {
        redb::StorageError::Io(io) if io.kind() == std::io::ErrorKind::StorageFull => {
            KvError::QuotaExceeded(io.to_string())
        }
        other => other.into(),
    }
}
