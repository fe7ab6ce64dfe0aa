// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - SLED BACKEND
//
// sled embedded database for persistent measurement state.
// All records live in one tree; batches are applied atomically.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

use crate::{KvStore, StoreError, WriteBatch};

const TREE_MEASUREMENTS: &str = "o_measurements";

pub struct SledStore {
    db: Arc<Db>,
    tree: Tree,
}

impl SledStore {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|e| {
            StoreError::Backend(format!(
                "Failed to open database at {}: {}",
                path_ref.display(),
                e
            ))
        })?;
        let tree = db
            .open_tree(TREE_MEASUREMENTS)
            .map_err(|e| StoreError::Backend(format!("Failed to open measurements tree: {}", e)))?;
        log::info!("📂 Measurement store opened at {}", path_ref.display());
        Ok(Self {
            db: Arc::new(db),
            tree,
        })
    }

    /// Number of records in the measurements tree
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl KvStore for SledStore {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.tree
            .get(key)
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| StoreError::Backend(format!("Failed to read record: {}", e)))
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tree
            .insert(key, value)
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("Failed to write record: {}", e)))
    }

    fn erase(&self, key: &[u8]) -> Result<(), StoreError> {
        self.tree
            .remove(key)
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("Failed to erase record: {}", e)))
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (key, value) =
                item.map_err(|e| StoreError::Backend(format!("Failed to scan records: {}", e)))?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch {
            match value {
                Some(v) => sled_batch.insert(key, v),
                None => sled_batch.remove(key),
            }
        }
        self.tree
            .apply_batch(sled_batch)
            .map_err(|e| StoreError::Backend(format!("Atomic batch failed: {}", e)))
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|e| StoreError::Backend(format!("Failed to flush database: {}", e)))
    }
}
