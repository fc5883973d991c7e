use crate::errors::{KvError, KvResult};
use crate::value::Value;

use super::{decode_value, sled_error};

/// Cursor over one sled tree, decoding entries as they are pulled.
pub struct SledCursor {
    inner: sled::Iter,
}

impl SledCursor {
    pub fn new(tree: &sled::Tree) -> Self {
        Self { inner: tree.iter() }
    }
}

impl Iterator for SledCursor {
    type Item = KvResult<(String, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = match self.inner.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(sled_error(e))),
        };
        Some(decode_entry(&key, &value))
    }
}

fn decode_entry(key: &[u8], value: &[u8]) -> KvResult<(String, Value)> {
    let key = String::from_utf8(key.to_vec())
        .map_err(|e| KvError::Storage(format!("non UTF-8 key in structured store: {e}")))?;
    Ok((key, decode_value(value)?))
}
