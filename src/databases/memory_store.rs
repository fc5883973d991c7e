//! In-memory driver.
//!
//! Tables live in the [`Environment`] and disappear with it. Values are
//! kept as serialized envelopes, exactly like the text-only backends, so
//! this driver exercises the same encoding path without touching disk.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::cursor::{EntryCursor, Page, PagedCursor};
use crate::environment::{Environment, MemoryTable};
use crate::errors::KvResult;
use crate::registry::BuiltinDriver;
use crate::serializer::{deserialize, serialize};
use crate::traits::driver::{StorageConnection, StorageDriver};
use crate::value::Value;

const PAGE_SIZE: usize = 128;

pub struct MemoryDriver;

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &str {
        BuiltinDriver::Memory.as_ref()
    }

    async fn is_supported(&self, env: &Environment) -> bool {
        env.provides(self.name())
    }

    async fn init_storage(
        &self,
        config: &StoreConfig,
        env: &Environment,
    ) -> KvResult<Arc<dyn StorageConnection>> {
        Ok(Arc::new(MemoryConnection {
            table: env.memory_table(&config.name, &config.store_name),
        }))
    }

    async fn drop_instance(
        &self,
        env: &Environment,
        name: &str,
        store_name: Option<&str>,
    ) -> KvResult<()> {
        env.drop_memory(name, store_name);
        Ok(())
    }
}

pub struct MemoryConnection {
    table: MemoryTable,
}

#[async_trait]
impl StorageConnection for MemoryConnection {
    async fn get_item(&self, key: &str) -> KvResult<Value> {
        match self.table.read().get(key) {
            Some(raw) => deserialize(raw),
            None => Ok(Value::Null),
        }
    }

    async fn set_item(&self, key: &str, value: Value) -> KvResult<Value> {
        let raw = serialize(&value)?;
        self.table.write().insert(key.to_string(), raw);
        Ok(value)
    }

    async fn remove_item(&self, key: &str) -> KvResult<()> {
        self.table.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> KvResult<()> {
        self.table.write().clear();
        Ok(())
    }

    fn cursor(&self) -> KvResult<EntryCursor<'_>> {
        let table = Arc::clone(&self.table);
        Ok(Box::new(PagedCursor::new(move |after: Option<&String>| {
            let table = table.read();
            let range: Box<dyn Iterator<Item = (&String, &String)>> = match after {
                Some(after) => Box::new(
                    table
                        .range::<String, _>((
                            std::ops::Bound::Excluded(after),
                            std::ops::Bound::Unbounded,
                        )),
                ),
                None => Box::new(table.iter()),
            };
            let entries = range
                .take(PAGE_SIZE)
                .map(|(k, raw)| Ok((k.clone(), deserialize(raw)?)))
                .collect::<KvResult<Vec<_>>>()?;
            let next = (entries.len() == PAGE_SIZE)
                .then(|| entries.last().map(|(k, _)| k.clone()))
                .flatten();
            Ok(Page { entries, next })
        })))
    }

    async fn length(&self) -> KvResult<usize> {
        Ok(self.table.read().len())
    }

    async fn key(&self, index: usize) -> KvResult<Option<String>> {
        Ok(self.table.read().keys().nth(index).cloned())
    }

    async fn keys(&self) -> KvResult<Vec<String>> {
        Ok(self.table.read().keys().cloned().collect())
    }
}
