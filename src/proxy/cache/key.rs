use std::fmt;

/// Fingerprint of a requested URL, used to address its cache entry.
///
/// Derived from the exact URL bytes with blake3, so identical URLs share a key across process
/// restarts and distinct URLs collide only with negligible probability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    hex: String,
}

impl CacheKey {
    pub fn for_url(url: &str) -> Self {
        Self {
            hex: blake3::hash(url.as_bytes()).to_hex().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

pub fn fingerprint(url: &str) -> CacheKey {
    CacheKey::for_url(url)
}
