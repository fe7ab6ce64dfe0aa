//! JSON record codec and typed helpers over [`KvStore`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{record_key, KvStore, RecordKind, StoreError};

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|e| StoreError::Codec(format!("serialize: {}", e)))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Codec(format!("deserialize: {}", e)))
}

pub fn put<S: KvStore + ?Sized, T: Serialize>(
    store: &S,
    kind: RecordKind,
    id: &[u8],
    record: &T,
) -> Result<(), StoreError> {
    store.write(&record_key(kind, id), &encode(record)?)
}

pub fn get<S: KvStore + ?Sized, T: DeserializeOwned>(
    store: &S,
    kind: RecordKind,
    id: &[u8],
) -> Result<Option<T>, StoreError> {
    match store.read(&record_key(kind, id))? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Decode every record of one kind, in key order
pub fn scan<S: KvStore + ?Sized, T: DeserializeOwned>(
    store: &S,
    kind: RecordKind,
) -> Result<Vec<T>, StoreError> {
    store
        .iterate(&[kind.prefix()])?
        .into_iter()
        .map(|(_, value)| decode(&value))
        .collect()
}
