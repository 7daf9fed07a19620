use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

mod key;
mod memory;
mod store;

pub use key::{CacheKey, fingerprint};
pub use memory::MemoryStore;
pub use store::DiskStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no cache entry for key {0}")]
    NotFound(CacheKey),
    #[error("cache I/O failed for {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(super) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Persistent map from [`CacheKey`] to the verbatim response bytes.
///
/// Writes replace the whole entry at once: concurrent readers see either the previous bytes or
/// the new ones.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn exists(&self, key: &CacheKey) -> bool;

    async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, StoreError>;

    async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StoreError>;
}
