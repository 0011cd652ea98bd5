//! File-backed TTL cache for JSON responses.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::clock::Clock;
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    #[serde(with = "time::serde::rfc3339")]
    stored_at: OffsetDateTime,
    value: Value,
}

/// One JSON file per key under a directory; entries expire by age.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(digest)))
    }

    /// Cached value for `key` if it is younger than `ttl`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        let bytes = fs::read(self.path_for(key)).ok()?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
        if entry.key != key {
            return None;
        }

        let age = self.clock.now() - entry.stored_at;
        if age >= ttl {
            return None;
        }

        tracing::debug!("cache hit for {key}");
        serde_json::from_value(entry.value).ok()
    }

    /// Stores `value` under `key`. Failures are logged and otherwise ignored.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_put(key, value) {
            tracing::warn!("could not write cache entry for {key}: {e}");
        }
    }

    fn try_put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> std::io::Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            stored_at: self.clock.now(),
            value: serde_json::to_value(value)?,
        };
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), serde_json::to_vec(&entry)?)
    }

    /// Returns the cached value, or runs `compute` and caches its successful result.
    pub fn get_or_compute<T, E, F>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.get(key, ttl) {
            return Ok(hit);
        }

        let value = compute()?;
        self.put(key, &value);
        Ok(value)
    }

    /// Removes every cache file, returning how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::io(&self.dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| Error::io(&self.dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
                removed += 1;
            }
        }

        tracing::info!("cleared {removed} cache entries from {}", self.dir.display());
        Ok(removed)
    }
}
