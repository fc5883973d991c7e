use async_trait::async_trait;
use log::trace;

use crate::errors::{KvError, KvResult};
use crate::scheduler::{BatchWriter, WriteOp};

use super::{encode_value, is_storage_full};

/// Applies scheduler batches to one sled tree, one `apply_batch` each.
pub struct SledBatchWriter {
    tree: sled::Tree,
}

impl SledBatchWriter {
    pub fn new(tree: sled::Tree) -> Self {
        Self { tree }
    }

    fn apply(tree: &sled::Tree, batch: Vec<WriteOp>) -> Vec<KvResult<()>> {
        if let [WriteOp::Clear] = batch.as_slice() {
            return vec![tree.clear().map_err(|e| failed(&e))];
        }

        // Items that fail to encode are rejected alone; the rest still go in.
        let mut results: Vec<KvResult<()>> = Vec::with_capacity(batch.len());
        let mut sled_batch = sled::Batch::default();
        for op in batch {
            match op {
                WriteOp::Put { key, value } => match encode_value(&value) {
                    Ok(bytes) => {
                        sled_batch.insert(key.as_bytes(), bytes);
                        results.push(Ok(()));
                    }
                    Err(e) => results.push(Err(e)),
                },
                WriteOp::Delete { key } => {
                    sled_batch.remove(key.as_bytes());
                    results.push(Ok(()));
                }
                WriteOp::Clear => results.push(Err(KvError::Storage(
                    "clear must be flushed in its own batch".to_string(),
                ))),
            }
        }

        if let Err(e) = tree.apply_batch(sled_batch) {
            for result in results.iter_mut().filter(|r| r.is_ok()) {
                *result = Err(failed(&e));
            }
        }
        results
    }
}

/// sled errors are not `Clone`; hand every waiter its own copy.
fn failed(err: &sled::Error) -> KvError {
    if is_storage_full(err) {
        KvError::QuotaExceeded(err.to_string())
    } else {
        KvError::Storage(err.to_string())
    }
}

#[async_trait]
impl BatchWriter for SledBatchWriter {
    async fn write_batch(&self, batch: Vec<WriteOp>) -> Vec<KvResult<()>> {
        let tree = self.tree.clone();
        let len = batch.len();
        trace!("Applying {len} write(s) to tree {:?}", String::from_utf8_lossy(&tree.name()));
        match tokio::task::spawn_blocking(move || Self::apply(&tree, batch)).await {
            Ok(results) => results,
            Err(e) => (0..len)
                .map(|_| Err(KvError::Storage(format!("batch task failed: {e}"))))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn tree() -> sled::Tree {
        let db = sled::Config::new().temporary(true).open().unwrap();
        db.open_tree("batch").unwrap()
    }

    #[tokio::test]
    async fn puts_and_deletes_apply_in_order() {
        let tree = tree();
        let writer = SledBatchWriter::new(tree.clone());
        let results = writer
            .write_batch(vec![
                WriteOp::Put {
                    key: "a".into(),
                    value: Value::from("1"),
                },
                WriteOp::Put {
                    key: "a".into(),
                    value: Value::from("2"),
                },
                WriteOp::Delete { key: "b".into() },
            ])
            .await;
        assert!(results.iter().all(Result::is_ok));
        let stored = tree.get("a").unwrap().unwrap();
        assert_eq!(super::super::decode_value(&stored).unwrap(), Value::from("2"));
    }

    #[tokio::test]
    async fn clear_runs_alone() {
        let tree = tree();
        tree.insert("x", encode_value(&Value::Int(1)).unwrap()).unwrap();
        let writer = SledBatchWriter::new(tree.clone());
        let results = writer.write_batch(vec![WriteOp::Clear]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
        assert!(tree.is_empty());
    }
}
