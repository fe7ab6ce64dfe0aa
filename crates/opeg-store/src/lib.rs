// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - STORE
//
// Key-value storage seam for measurement and stabilization state. Keys are namespaced
// by a one-byte record-kind prefix followed by the record's content id.
// Values are JSON. Two backends: in-memory (tests, light nodes) and sled.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod codec;
pub mod memory;
pub mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("record codec error: {0}")]
    Codec(String),
}

/// Ordered list of mutations applied together. `None` erases the key.
pub type WriteBatch = Vec<(Vec<u8>, Option<Vec<u8>>)>;

pub trait KvStore: Send + Sync {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn erase(&self, key: &[u8]) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, in key order
    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;

    /// Apply a batch. Backends with native batches override this to make
    /// the whole batch atomic.
    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        for (key, value) in batch {
            match value {
                Some(v) => self.write(&key, &v)?,
                None => self.erase(&key)?,
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).read(key)
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        (**self).write(key, value)
    }

    fn erase(&self, key: &[u8]) -> Result<(), StoreError> {
        (**self).erase(key)
    }

    fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        (**self).iterate(prefix)
    }

    fn apply_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).apply_batch(batch)
    }

    fn flush(&self) -> Result<(), StoreError> {
        (**self).flush()
    }
}

// ─────────────────────────────────────────────────────────────────
// KEY NAMESPACES
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    WaterPrice,
    ExchangeRate,
    Invite,
    ValidatedUrl,
    DailyAverage,
    ConversionRate,
    CurrencyFirstSeen,
    StabilityStatus,
    StabilizationRecord,
    StabilizationTotals,
}

impl RecordKind {
    pub const fn prefix(self) -> u8 {
        match self {
            RecordKind::WaterPrice => b'w',
            RecordKind::ExchangeRate => b'e',
            RecordKind::Invite => b'i',
            RecordKind::ValidatedUrl => b'u',
            RecordKind::DailyAverage => b'd',
            RecordKind::ConversionRate => b'c',
            RecordKind::CurrencyFirstSeen => b'f',
            RecordKind::StabilityStatus => b's',
            RecordKind::StabilizationRecord => b't',
            RecordKind::StabilizationTotals => b'l',
        }
    }
}

/// Full store key: kind prefix followed by the content id
pub fn record_key(kind: RecordKind, id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 1);
    key.push(kind.prefix());
    key.extend_from_slice(id);
    key
}
