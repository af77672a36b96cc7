//! On-disk snapshots of the offline cache for native hosts.
//!
//! A snapshot is a CBOR envelope (magic, schema version, blake3 checksum)
//! around the CBOR-encoded stores. Every entry also carries the digest of
//! its body, checked again on load.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::capabilities::{
    CacheEntry, CacheError, CacheKey, CacheName, CachedResponse, Headers, MemoryCacheStorage,
    MAX_ENTRIES_PER_STORE,
};
use crate::model::UnixTimeMs;

const CURRENT_SCHEMA_VERSION: u32 = 1;
const MAX_SNAPSHOT_BYTES: usize = 100 * 1024 * 1024;
const MAX_STORES: usize = 64;
const SNAPSHOT_MAGIC: &[u8; 4] = b"OFCS";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("corrupted snapshot: {reason}")]
    Corrupted { reason: &'static str },

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("schema version {found} is newer than supported {max}")]
    FutureSchema { found: u32, max: u32 },

    #[error("unknown schema version: {0}")]
    UnknownSchema(u32),

    #[error("snapshot too large: {size} bytes, max {max}")]
    SnapshotTooLarge { size: usize, max: usize },

    #[error("too many stores: {count}, max {max}")]
    TooManyStores { count: usize, max: usize },

    #[error("too many entries in {name}: {count}, max {max}")]
    TooManyEntries { name: String, count: usize, max: usize },
}

impl From<ciborium::de::Error<std::io::Error>> for StoreError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for StoreError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct SnapshotEnvelope {
    magic: [u8; 4],
    schema_version: u32,
    checksum: [u8; 32],
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct SnapshotEntry {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    #[serde(with = "serde_bytes")]
    body: Vec<u8>,
    digest: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct SnapshotStore {
    name: String,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
struct SnapshotPayload {
    captured_at: u64,
    stores: Vec<SnapshotStore>,
}

/// Point-in-time copy of every cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    schema_version: u32,
    payload: SnapshotPayload,
}

impl CacheSnapshot {
    pub async fn capture(storage: &MemoryCacheStorage) -> Self {
        let stores = storage
            .export()
            .await
            .into_iter()
            .map(|(name, entries)| SnapshotStore {
                name: name.as_str().to_string(),
                entries: entries
                    .into_iter()
                    .map(|entry| SnapshotEntry {
                        key: entry.key.as_str().to_string(),
                        status: entry.response.status(),
                        headers: entry.response.headers().clone().into_vec(),
                        body: entry.response.body().to_vec(),
                        digest: entry.response.digest().to_string(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            payload: SnapshotPayload {
                captured_at: UnixTimeMs::now().as_millis(),
                stores,
            },
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn captured_at(&self) -> UnixTimeMs {
        UnixTimeMs(self.payload.captured_at)
    }

    pub fn store_names(&self) -> Vec<CacheName> {
        self.payload
            .stores
            .iter()
            .map(|store| CacheName::new(store.name.clone()))
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.payload.stores.iter().map(|s| s.entries.len()).sum()
    }

    /// Replaces the content of `storage` with this snapshot.
    #[instrument(skip_all, fields(stores = self.payload.stores.len()))]
    pub async fn restore_into(&self, storage: &MemoryCacheStorage) -> Result<(), StoreError> {
        let mut content = Vec::with_capacity(self.payload.stores.len());
        for store in &self.payload.stores {
            let name = CacheName::new(store.name.clone());
            name.validate()?;
            let mut entries = Vec::with_capacity(store.entries.len());
            for entry in &store.entries {
                let response = CachedResponse::new(
                    entry.status,
                    Headers::from(entry.headers.clone()),
                    entry.body.clone().into(),
                );
                if response.digest() != entry.digest {
                    return Err(StoreError::IntegrityCheckFailed {
                        expected: entry.digest.clone(),
                        actual: response.digest().to_string(),
                    });
                }
                let url = Url::parse(&entry.key).map_err(|_| StoreError::Corrupted {
                    reason: "entry key is not a URL",
                })?;
                let key = CacheKey::from_url(&url);
                entries.push(CacheEntry::new(key, response));
            }
            content.push((name, entries));
        }

        storage.import(content).await?;
        info!(entries = self.entry_count(), "cache snapshot restored");
        Ok(())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), StoreError> {
        let bytes = self.serialize()?;

        let tmp_path = path.with_extension("tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        std::fs::rename(&tmp_path, path)?;

        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    /// `Ok(None)` when nothing was saved yet.
    pub fn load_from_path(path: &Path) -> Result<Option<Self>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }

        let bytes = std::fs::read(path)?;

        if bytes.is_empty() {
            return Err(StoreError::Corrupted {
                reason: "empty file",
            });
        }

        Self::deserialize(&bytes).map(Some)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, StoreError> {
        let mut payload_bytes = Vec::new();
        ciborium::into_writer(&self.payload, &mut payload_bytes)?;

        let checksum = blake3::hash(&payload_bytes);

        let envelope = SnapshotEnvelope {
            magic: *SNAPSHOT_MAGIC,
            schema_version: self.schema_version,
            checksum: *checksum.as_bytes(),
            payload: payload_bytes,
        };

        let mut envelope_bytes = Vec::new();
        ciborium::into_writer(&envelope, &mut envelope_bytes)?;

        Ok(envelope_bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() > MAX_SNAPSHOT_BYTES {
            return Err(StoreError::SnapshotTooLarge {
                size: bytes.len(),
                max: MAX_SNAPSHOT_BYTES,
            });
        }

        let envelope: SnapshotEnvelope = ciborium::from_reader(bytes)?;

        if envelope.magic != *SNAPSHOT_MAGIC {
            return Err(StoreError::Corrupted {
                reason: "invalid magic bytes",
            });
        }

        if envelope.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::FutureSchema {
                found: envelope.schema_version,
                max: CURRENT_SCHEMA_VERSION,
            });
        }
        if envelope.schema_version == 0 {
            return Err(StoreError::UnknownSchema(0));
        }

        let actual_checksum = blake3::hash(&envelope.payload);
        if actual_checksum.as_bytes() != &envelope.checksum {
            warn!("cache snapshot checksum mismatch");
            return Err(StoreError::IntegrityCheckFailed {
                expected: hex::encode(envelope.checksum),
                actual: hex::encode(actual_checksum.as_bytes()),
            });
        }

        let payload: SnapshotPayload = ciborium::from_reader(&envelope.payload[..])?;

        if payload.stores.len() > MAX_STORES {
            return Err(StoreError::TooManyStores {
                count: payload.stores.len(),
                max: MAX_STORES,
            });
        }
        for store in &payload.stores {
            if store.entries.len() > MAX_ENTRIES_PER_STORE {
                return Err(StoreError::TooManyEntries {
                    name: store.name.clone(),
                    count: store.entries.len(),
                    max: MAX_ENTRIES_PER_STORE,
                });
            }
        }

        Ok(Self {
            schema_version: envelope.schema_version,
            payload,
        })
    }
}
