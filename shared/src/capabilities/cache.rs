use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use super::network::{Headers, Response};

pub const MAX_STORE_NAME_LENGTH: usize = 128;
pub const MAX_ENTRIES_PER_STORE: usize = 1_000;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheError {
    #[error("invalid cache key '{url}': {reason}")]
    InvalidKey { url: String, reason: String },

    #[error("invalid store name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("store {name} is full ({count} entries, max {max})")]
    StoreFull { name: String, count: usize, max: usize },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Name of one versioned store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheName(String);

impl CacheName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if self.0.trim().is_empty() {
            return Err(CacheError::InvalidName {
                name: self.0.clone(),
                reason: "name cannot be empty".into(),
            });
        }
        if self.0.len() > MAX_STORE_NAME_LENGTH {
            return Err(CacheError::InvalidName {
                name: self.0.chars().take(50).collect::<String>() + "...",
                reason: format!("name exceeds maximum length of {MAX_STORE_NAME_LENGTH} bytes"),
            });
        }
        if self.0.chars().any(char::is_control) {
            return Err(CacheError::InvalidName {
                name: self.0.clone(),
                reason: "name contains control characters".into(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalised request URL: absolute, fragment removed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    /// Resolves a manifest path (relative or absolute) against `origin`.
    pub fn resolve(origin: &Url, path: &str) -> Result<Self, CacheError> {
        let url = origin.join(path).map_err(|e| CacheError::InvalidKey {
            url: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_url(&url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_url(&self) -> Result<Url, CacheError> {
        Url::parse(&self.0).map_err(|e| CacheError::InvalidKey {
            url: self.0.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored response payload plus headers. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    status: u16,
    headers: Headers,
    body: Bytes,
    digest: String,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Headers, body: Bytes) -> Self {
        let digest = blake3::hash(&body).to_hex().to_string();
        Self {
            status,
            headers,
            body,
            digest,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Hex blake3 digest of the body.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

impl From<Response> for CachedResponse {
    fn from(response: Response) -> Self {
        Self::new(response.status, response.headers, response.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub response: CachedResponse,
}

impl CacheEntry {
    pub fn new(key: CacheKey, response: impl Into<CachedResponse>) -> Self {
        Self {
            key,
            response: response.into(),
        }
    }
}

/// Platform cache storage: a set of named stores keyed by request URL.
///
/// Only the offline worker writes through this trait; pages get a
/// [`CacheReader`].
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the store if it does not exist yet.
    async fn open(&self, name: &CacheName) -> Result<(), CacheError>;

    /// Writes every entry or none. Existing keys are overwritten.
    async fn put_all(&self, name: &CacheName, entries: Vec<CacheEntry>) -> Result<(), CacheError>;

    /// `Ok(None)` for a missing key or a missing store.
    async fn lookup(&self, name: &CacheName, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError>;

    async fn keys(&self, name: &CacheName) -> Result<Vec<CacheKey>, CacheError>;

    async fn names(&self) -> Result<Vec<CacheName>, CacheError>;

    /// Returns whether a store was removed.
    async fn delete(&self, name: &CacheName) -> Result<bool, CacheError>;
}

type Store = BTreeMap<CacheKey, CachedResponse>;

/// In-process [`CacheStorage`] for native hosts and tests.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    stores: RwLock<BTreeMap<CacheName, Store>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every store, in name then key order.
    pub async fn export(&self) -> Vec<(CacheName, Vec<CacheEntry>)> {
        let stores = self.stores.read().await;
        stores
            .iter()
            .map(|(name, store)| {
                let entries = store
                    .iter()
                    .map(|(key, response)| CacheEntry {
                        key: key.clone(),
                        response: response.clone(),
                    })
                    .collect();
                (name.clone(), entries)
            })
            .collect()
    }

    /// Replaces the whole content in one step.
    pub async fn import(&self, content: Vec<(CacheName, Vec<CacheEntry>)>) -> Result<(), CacheError> {
        let mut next = BTreeMap::new();
        for (name, entries) in content {
            name.validate()?;
            let store = Self::build_store(&name, Store::new(), entries)?;
            next.insert(name, store);
        }
        *self.stores.write().await = next;
        Ok(())
    }

    fn build_store(name: &CacheName, mut store: Store, entries: Vec<CacheEntry>) -> Result<Store, CacheError> {
        for entry in entries {
            store.insert(entry.key, entry.response);
        }
        if store.len() > MAX_ENTRIES_PER_STORE {
            return Err(CacheError::StoreFull {
                name: name.to_string(),
                count: store.len(),
                max: MAX_ENTRIES_PER_STORE,
            });
        }
        Ok(store)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &CacheName) -> Result<(), CacheError> {
        name.validate()?;
        self.stores.write().await.entry(name.clone()).or_default();
        Ok(())
    }

    async fn put_all(&self, name: &CacheName, entries: Vec<CacheEntry>) -> Result<(), CacheError> {
        name.validate()?;
        let mut stores = self.stores.write().await;
        let current = stores.get(name).cloned().unwrap_or_default();
        // Built on a copy so a failure leaves the store untouched.
        let next = Self::build_store(name, current, entries)?;
        stores.insert(name.clone(), next);
        Ok(())
    }

    async fn lookup(&self, name: &CacheName, key: &CacheKey) -> Result<Option<CachedResponse>, CacheError> {
        let stores = self.stores.read().await;
        Ok(stores.get(name).and_then(|store| store.get(key)).cloned())
    }

    async fn keys(&self, name: &CacheName) -> Result<Vec<CacheKey>, CacheError> {
        let stores = self.stores.read().await;
        Ok(stores
            .get(name)
            .map(|store| store.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn names(&self) -> Result<Vec<CacheName>, CacheError> {
        Ok(self.stores.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &CacheName) -> Result<bool, CacheError> {
        Ok(self.stores.write().await.remove(name).is_some())
    }
}

/// Read-only view of the cache handed to page code.
#[derive(Clone)]
pub struct CacheReader {
    storage: Arc<dyn CacheStorage>,
    current: CacheName,
}

impl fmt::Debug for CacheReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheReader")
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl CacheReader {
    pub(crate) fn new(storage: Arc<dyn CacheStorage>, current: CacheName) -> Self {
        Self { storage, current }
    }

    pub fn current(&self) -> &CacheName {
        &self.current
    }

    pub async fn lookup(&self, url: &Url) -> Result<Option<CachedResponse>, CacheError> {
        self.lookup_in(&self.current, url).await
    }

    pub async fn lookup_in(&self, name: &CacheName, url: &Url) -> Result<Option<CachedResponse>, CacheError> {
        self.storage.lookup(name, &CacheKey::from_url(url)).await
    }

    pub async fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        self.storage.keys(&self.current).await
    }

    pub async fn store_names(&self) -> Result<Vec<CacheName>, CacheError> {
        self.storage.names().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://portal.test/").unwrap()
    }

    fn entry(path: &str, body: &'static str) -> CacheEntry {
        CacheEntry::new(CacheKey::resolve(&origin(), path).unwrap(), Response::ok(body))
    }

    #[test]
    fn key_drops_fragment_and_resolves() {
        let key = CacheKey::resolve(&origin(), "/dashboard.html#today").unwrap();
        assert_eq!(key.as_str(), "https://portal.test/dashboard.html");

        let absolute = CacheKey::from_url(&Url::parse("HTTPS://Portal.TEST/a?b=1").unwrap());
        assert_eq!(absolute.as_str(), "https://portal.test/a?b=1");
    }

    #[test]
    fn digest_tracks_body() {
        let a = CachedResponse::from(Response::ok("same"));
        let b = CachedResponse::from(Response::ok("same"));
        let c = CachedResponse::from(Response::ok("other"));
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn name_validation() {
        assert!(CacheName::new("").validate().is_err());
        assert!(CacheName::new("a\u{0}b").validate().is_err());
        assert!(CacheName::new("x".repeat(MAX_STORE_NAME_LENGTH + 1)).validate().is_err());
        assert!(CacheName::new("teacher-portal-v1").validate().is_ok());
    }

    #[tokio::test]
    async fn put_all_overwrites_and_lookup_misses_cleanly() {
        let storage = MemoryCacheStorage::new();
        let name = CacheName::new("v1");

        storage.put_all(&name, vec![entry("/", "one")]).await.unwrap();
        storage.put_all(&name, vec![entry("/", "two")]).await.unwrap();

        let keys = storage.keys(&name).await.unwrap();
        assert_eq!(keys.len(), 1);

        let hit = storage.lookup(&name, &keys[0]).await.unwrap().unwrap();
        assert_eq!(hit.body().as_ref(), b"two");

        let missing_store = storage.lookup(&CacheName::new("v0"), &keys[0]).await.unwrap();
        assert!(missing_store.is_none());
    }

    #[tokio::test]
    async fn overflowing_put_leaves_store_untouched() {
        let storage = MemoryCacheStorage::new();
        let name = CacheName::new("v1");
        storage.put_all(&name, vec![entry("/keep", "k")]).await.unwrap();

        let flood: Vec<_> = (0..MAX_ENTRIES_PER_STORE)
            .map(|i| entry(&format!("/f{i}"), "x"))
            .collect();
        let result = storage.put_all(&name, flood).await;

        assert!(matches!(result, Err(CacheError::StoreFull { .. })));
        assert_eq!(storage.keys(&name).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_is_idempotent_and_delete_reports() {
        let storage = MemoryCacheStorage::new();
        let name = CacheName::new("v1");
        storage.open(&name).await.unwrap();
        storage.open(&name).await.unwrap();
        assert_eq!(storage.names().await.unwrap(), vec![name.clone()]);

        assert!(storage.delete(&name).await.unwrap());
        assert!(!storage.delete(&name).await.unwrap());
    }

    #[tokio::test]
    async fn reader_sees_current_store_only() {
        let storage = Arc::new(MemoryCacheStorage::new());
        storage.put_all(&CacheName::new("v1"), vec![entry("/", "old")]).await.unwrap();
        storage.put_all(&CacheName::new("v2"), vec![entry("/", "new")]).await.unwrap();

        let reader = CacheReader::new(storage, CacheName::new("v2"));
        let url = origin();
        let hit = reader.lookup(&url).await.unwrap().unwrap();
        assert_eq!(hit.body().as_ref(), b"new");
        assert_eq!(reader.store_names().await.unwrap().len(), 2);
    }
}
