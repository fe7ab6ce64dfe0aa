use opeg_core::safe_lock;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{KvStore, StoreError, WriteBatch};

/// Ordered in-memory store. Batches are applied under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        safe_lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryStore {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(safe_lock(&self.entries).get(key).cloned())
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        safe_lock(&self.entries).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn erase(&self, key: &[u8]) -> Result<(), StoreError> {
        safe_lock(&self.entries).remove(key);
        Ok(())
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let entries = safe_lock(&self.entries);
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut entries = safe_lock(&self.entries);
        for (key, value) in batch {
            match value {
                Some(v) => {
                    entries.insert(key, v);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
