use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

use condproxy::proxy::cache::CacheKey;

pub struct TestDirs {
    _temp: TempDir,
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let workspace = temp.path();
        let config_dir = workspace.join("config");
        std::fs::create_dir_all(&config_dir)?;
        let cache_dir = workspace.join("cache");

        Ok(Self {
            _temp: temp,
            config_dir,
            cache_dir,
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("condproxy.toml")
    }

    pub fn write_config(&self, contents: &str) -> Result<PathBuf> {
        let path = self.config_path();
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Path of the cache file holding the entry for `url`.
    pub fn cache_file(&self, url: &str) -> PathBuf {
        cache_file_in(&self.cache_dir, url)
    }

    pub fn cache_entries(&self) -> Result<Vec<PathBuf>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = std::fs::read_dir(&self.cache_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }
}

pub fn cache_file_in(cache_dir: &Path, url: &str) -> PathBuf {
    cache_dir.join(format!("{}.cache", CacheKey::for_url(url)))
}
