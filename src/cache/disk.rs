//! On-disk cache persistence
//!
//! Mirrors a named cache into `<root>/<encoded cache name>/` so entries
//! survive daemon restarts. Each entry is a `<digest>.body` file plus a
//! `<digest>.json` metadata file; the metadata file is written last and acts
//! as the commit marker.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::key::{RequestKey, VaryValues};
use super::store::CachedEntry;
use crate::errors::ProxyError;
use crate::http::{Headers, Response};

/// Metadata persisted next to each body file
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: RequestKey,
    status: u16,
    status_text: String,
    headers: Headers,
    response_url: Option<String>,
    vary: VaryValues,
    cached_at: u64,
}

/// Persistent mirror of one named cache
#[derive(Debug)]
pub struct DiskStore {
    cache_dir: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) the directory for `cache_name` under `root`
    pub fn open(root: &Path, cache_name: &str) -> Result<Self, ProxyError> {
        let cache_dir = Self::dir_for(root, cache_name);
        fs::create_dir_all(&cache_dir).map_err(|e| {
            ProxyError::Storage(format!(
                "Failed to create cache directory {}: {}",
                cache_dir.display(),
                e
            ))
        })?;

        let store = Self { cache_dir };
        store.cleanup();
        Ok(store)
    }

    fn dir_for(root: &Path, cache_name: &str) -> PathBuf {
        root.join(urlencoding::encode(cache_name).as_ref())
    }

    /// Names of every cache persisted under `root`
    pub fn list_names(root: &Path) -> Vec<String> {
        let Ok(read_dir) = fs::read_dir(root) else {
            return Vec::new();
        };

        read_dir
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let raw = entry.file_name();
                let raw = raw.to_str()?;
                urlencoding::decode(raw).ok().map(|name| name.into_owned())
            })
            .collect()
    }

    /// Whether a persisted directory exists for `cache_name`
    pub fn exists(root: &Path, cache_name: &str) -> bool {
        Self::dir_for(root, cache_name).is_dir()
    }

    /// Remove the persisted directory for `cache_name`, if any
    pub fn purge(root: &Path, cache_name: &str) -> Result<(), ProxyError> {
        let dir = Self::dir_for(root, cache_name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!(cache = cache_name, dir = %dir.display(), "Purged persisted cache");
        }
        Ok(())
    }

    /// Persist one entry, replacing any previous one for the same key
    pub fn store(&self, key: &RequestKey, entry: &CachedEntry) -> Result<(), ProxyError> {
        let stem = key.to_filename();

        self.write_atomic(&self.cache_dir.join(format!("{}.body", stem)), &entry.response.body)?;

        let record = DiskRecord {
            key: key.clone(),
            status: entry.response.status,
            status_text: entry.response.status_text.clone(),
            headers: entry.response.headers.clone(),
            response_url: entry.response.url.clone(),
            vary: entry.vary.clone(),
            cached_at: entry.cached_at,
        };
        let json = serde_json::to_vec(&record)?;
        self.write_atomic(&self.cache_dir.join(format!("{}.json", stem)), &json)?;

        debug!(url = %key.url, size = entry.response.body.len(), "Persisted cache entry");
        Ok(())
    }

    /// Load every committed entry, skipping ones that cannot be read
    pub fn load_all(&self) -> Vec<(RequestKey, CachedEntry)> {
        let Ok(read_dir) = fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };

        let mut loaded = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match Self::read_entry(&path) {
                Ok(pair) => loaded.push(pair),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry");
                }
            }
        }

        debug!(dir = %self.cache_dir.display(), entries = loaded.len(), "Loaded persisted entries");
        loaded
    }

    fn read_entry(meta_path: &Path) -> Result<(RequestKey, CachedEntry), ProxyError> {
        let record: DiskRecord = serde_json::from_slice(&fs::read(meta_path)?)?;
        let body = fs::read(meta_path.with_extension("body"))?;

        let response = Response {
            status: record.status,
            status_text: record.status_text,
            headers: record.headers,
            body: body.into(),
            url: record.response_url,
        };

        Ok((
            record.key,
            CachedEntry {
                response,
                vary: record.vary,
                cached_at: record.cached_at,
            },
        ))
    }

    /// Remove the persisted files for one key
    pub fn remove(&self, key: &RequestKey) {
        let stem = key.to_filename();
        for ext in ["json", "body"] {
            let path = self.cache_dir.join(format!("{}.{}", stem, ext));
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove cache file");
                }
            }
        }
    }

    /// Remove every entry but keep the directory
    pub fn clear(&self) -> Result<(), ProxyError> {
        for dir_entry in fs::read_dir(&self.cache_dir)?.flatten() {
            let path = dir_entry.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), ProxyError> {
        let mut tmp = tempfile::Builder::new()
            .suffix(".tmp")
            .tempfile_in(&self.cache_dir)?;
        tmp.write_all(data)?;
        tmp.persist(path)
            .map_err(|e| ProxyError::Storage(format!("Failed to persist {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Remove `.tmp` files left by interrupted writes
    fn cleanup(&self) {
        if let Ok(read_dir) = fs::read_dir(&self.cache_dir) {
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    debug!(path = %path.display(), "Removing stale temp file");
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
}
