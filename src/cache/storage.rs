//! Cache storage
//!
//! Registry of named caches. Caches are created lazily on first open and
//! live until deleted.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::disk::DiskStore;
use super::store::Cache;
use crate::errors::ProxyError;

/// Named caches shared by every fetch handler
pub struct CacheStorage {
    /// Open caches by name
    caches: RwLock<HashMap<String, Cache>>,
    /// Root directory for persisted caches, if persistence is enabled
    persist_dir: Option<PathBuf>,
}

impl CacheStorage {
    /// In-memory storage; caches last for the process lifetime
    pub fn in_memory() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            persist_dir: None,
        }
    }

    /// Storage whose caches are mirrored under `persist_dir`
    pub fn persistent(persist_dir: PathBuf) -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            persist_dir: Some(persist_dir),
        }
    }

    /// Open the cache called `name`, creating it if needed
    pub async fn open(&self, name: &str) -> Result<Cache, ProxyError> {
        {
            let caches = self.caches.read().await;
            if let Some(cache) = caches.get(name) {
                return Ok(cache.clone());
            }
        }

        let mut caches = self.caches.write().await;
        // Another handler may have created it while we waited for the lock
        if let Some(cache) = caches.get(name) {
            return Ok(cache.clone());
        }

        let disk = match &self.persist_dir {
            Some(root) => Some(DiskStore::open(root, name)?),
            None => None,
        };
        let cache = Cache::new(name, disk);

        info!(cache = name, entries = cache.len(), "Opened cache");
        caches.insert(name.to_string(), cache.clone());
        Ok(cache)
    }

    /// Whether a cache called `name` exists
    pub async fn has(&self, name: &str) -> bool {
        if self.caches.read().await.contains_key(name) {
            return true;
        }
        self.persist_dir
            .as_deref()
            .is_some_and(|root| DiskStore::exists(root, name))
    }

    /// Delete the cache called `name`. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> Result<bool, ProxyError> {
        let existed_on_disk = self
            .persist_dir
            .as_deref()
            .is_some_and(|root| DiskStore::exists(root, name));

        let removed = self.caches.write().await.remove(name);
        if let Some(cache) = &removed {
            cache.clear()?;
        }
        if let Some(root) = &self.persist_dir {
            DiskStore::purge(root, name)?;
        }

        let existed = removed.is_some() || existed_on_disk;
        if existed {
            info!(cache = name, "Deleted cache");
        } else {
            debug!(cache = name, "Delete requested for unknown cache");
        }
        Ok(existed)
    }

    /// Names of every cache, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.caches.read().await.keys().cloned().collect();
        if let Some(root) = &self.persist_dir {
            names.extend(DiskStore::list_names(root));
        }
        names.into_iter().collect()
    }
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::in_memory()
    }
}
