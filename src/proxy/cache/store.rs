use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use super::{CacheKey, CacheStore, StoreError};

const ENTRY_EXTENSION: &str = "cache";
const TEMP_PREFIX: &str = "tmp_";

/// One file per key inside a dedicated directory, holding the verbatim response bytes.
#[derive(Debug, Clone)]
pub struct DiskStore {
    disk_dir: PathBuf,
}

impl DiskStore {
    /// Create the cache directory if needed and clear temp files left by an interrupted write.
    pub async fn open(disk_dir: PathBuf) -> Result<Self> {
        async_fs::create_dir_all(&disk_dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", disk_dir.display()))?;
        let store = Self { disk_dir };
        store.remove_temp_files().await?;
        Ok(store)
    }

    pub fn disk_dir(&self) -> &Path {
        &self.disk_dir
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.disk_dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn temp_path(&self) -> PathBuf {
        self.disk_dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    async fn remove_temp_files(&self) -> Result<()> {
        let mut entries = async_fs::read_dir(&self.disk_dir)
            .await
            .with_context(|| format!("failed to list cache dir {}", self.disk_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let is_temp = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(TEMP_PREFIX))
                .unwrap_or(false);
            if is_temp && entry.file_type().await?.is_file() {
                debug!(path = %entry.path().display(), "removing stale cache temp file");
                let _ = async_fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    async fn write_temp(&self, temp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(temp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn exists(&self, key: &CacheKey) -> bool {
        match async_fs::metadata(self.entry_path(key)).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    async fn read(&self, key: &CacheKey) -> Result<Vec<u8>, StoreError> {
        let path = self.entry_path(key);
        match async_fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.clone())),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), StoreError> {
        async_fs::create_dir_all(&self.disk_dir)
            .await
            .map_err(|err| StoreError::io(&self.disk_dir, err))?;

        let temp_path = self.temp_path();
        if let Err(err) = self.write_temp(&temp_path, bytes).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(StoreError::io(temp_path, err));
        }

        let final_path = self.entry_path(key);
        if let Err(err) = async_fs::rename(&temp_path, &final_path).await {
            warn!(
                error = %err,
                path = %final_path.display(),
                "failed to move cache entry into place"
            );
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(StoreError::io(final_path, err));
        }
        trace!(key = %key, bytes = bytes.len(), "stored cache entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_entry_is_not_found() -> Result<()> {
        let dir = TempDir::new()?;
        let store = DiskStore::open(dir.path().join("cache")).await?;
        let key = CacheKey::for_url("http://example.test/missing");
        assert!(!store.exists(&key).await);
        let err = store.read(&key).await.expect_err("entry is absent");
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn write_creates_one_file_per_key() -> Result<()> {
        let dir = TempDir::new()?;
        let store = DiskStore::open(dir.path().to_path_buf()).await?;
        let key = CacheKey::for_url("http://example.test/a");
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";

        store.write(&key, raw).await?;

        assert!(store.exists(&key).await);
        assert_eq!(store.read(&key).await?, raw);
        let path = store.entry_path(&key);
        assert_eq!(path.parent(), Some(dir.path()));
        assert_eq!(fs::read(&path)?, raw);
        let names: Vec<_> = fs::read_dir(dir.path())?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<_>>()?;
        assert_eq!(names.len(), 1, "temp files must not linger: {names:?}");
        Ok(())
    }

    #[tokio::test]
    async fn write_replaces_existing_entry() -> Result<()> {
        let dir = TempDir::new()?;
        let store = DiskStore::open(dir.path().to_path_buf()).await?;
        let key = CacheKey::for_url("http://example.test/a");
        store.write(&key, b"old").await?;
        store.write(&key, b"new and longer").await?;
        assert_eq!(store.read(&key).await?, b"new and longer");
        Ok(())
    }

    #[tokio::test]
    async fn write_recreates_removed_directory() -> Result<()> {
        let dir = TempDir::new()?;
        let cache_dir = dir.path().join("cache");
        let store = DiskStore::open(cache_dir.clone()).await?;
        fs::remove_dir_all(&cache_dir)?;
        let key = CacheKey::for_url("http://example.test/a");
        store.write(&key, b"bytes").await?;
        assert_eq!(store.read(&key).await?, b"bytes");
        Ok(())
    }

    #[tokio::test]
    async fn open_clears_stale_temp_files() -> Result<()> {
        let dir = TempDir::new()?;
        let stale = dir.path().join("tmp_leftover");
        fs::write(&stale, b"partial")?;
        let kept = dir.path().join("keep.cache");
        fs::write(&kept, b"entry")?;

        DiskStore::open(dir.path().to_path_buf()).await?;

        assert!(!stale.exists());
        assert!(kept.exists());
        Ok(())
    }

    #[tokio::test]
    async fn entries_survive_reopen() -> Result<()> {
        let dir = TempDir::new()?;
        let key = CacheKey::for_url("http://example.test/persist");
        {
            let store = DiskStore::open(dir.path().to_path_buf()).await?;
            store.write(&key, b"persisted").await?;
        }
        let reopened = DiskStore::open(dir.path().to_path_buf()).await?;
        assert_eq!(reopened.read(&key).await?, b"persisted");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn entries_use_restrictive_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new()?;
        let store = DiskStore::open(dir.path().to_path_buf()).await?;
        let key = CacheKey::for_url("http://example.test/perm");
        store.write(&key, b"payload").await?;
        let mode = fs::metadata(store.entry_path(&key))?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        Ok(())
    }
}
