use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CacheKey, CacheStore, StoreError};

/// In-process [`CacheStore`] with the same replace-whole-entry semantics as the disk store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<CacheKey, Arc<Vec<u8>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Stored bytes for `url`, bypassing the async interface.
    pub fn get_url(&self, url: &str) -> Option<Vec<u8>> {
        let key = CacheKey::for_url(url);
        self.entries.lock().get(&key).map(|bytes| bytes.to_vec())
    }

    pub fn insert_url(&self, url: &str, bytes: impl Into<Vec<u8>>) {
        let key = CacheKey::for_url(url);
        self.entries.lock().insert(key, Arc::new(bytes.into()));
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn exists(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, StoreError> {
        self.entries
            .lock()
            .get(key)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StoreError> {
        let entry = Arc::new(bytes.to_vec());
        self.entries.lock().insert(key.clone(), entry);
        Ok(())
    }
}
