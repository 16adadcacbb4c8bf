//! Named cache implementation
//!
//! A request-keyed response store backed by Moka. No capacity bound is set,
//! so entries stay until deleted. Optionally mirrored to disk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::sync::Cache as MokaCache;
use tracing::{debug, trace};

use super::disk::DiskStore;
use super::key::{RequestKey, VaryValues};
use crate::errors::ProxyError;
use crate::http::{Fetcher, Request, Response};

/// A stored response with the data needed to match it
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub response: Response,
    /// Request header values for the response's `Vary` names
    pub vary: VaryValues,
    /// Seconds since the Unix epoch
    pub cached_at: u64,
}

impl CachedEntry {
    pub fn new(request: &Request, response: Response) -> Self {
        Self {
            vary: VaryValues::capture(request, &response),
            response,
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Handle to one named cache. Clones share the same entries.
#[derive(Clone)]
pub struct Cache {
    name: String,
    entries: MokaCache<RequestKey, CachedEntry>,
    disk: Option<Arc<DiskStore>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl Cache {
    /// Create a cache, seeding it from `disk` when persistence is enabled
    pub fn new(name: &str, disk: Option<DiskStore>) -> Self {
        let entries = MokaCache::builder().name(name).build();

        if let Some(disk) = &disk {
            for (key, entry) in disk.load_all() {
                entries.insert(key, entry);
            }
        }

        Self {
            name: name.to_string(),
            entries,
            disk: disk.map(Arc::new),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the stored response for `request`.
    ///
    /// Only GET requests match. Headers named in the stored `Vary` must carry
    /// the same values as when the entry was stored.
    pub fn match_request(&self, request: &Request) -> Option<Response> {
        let found = if request.method == "GET" {
            self.entries
                .get(&RequestKey::from_request(request))
                .filter(|entry| entry.vary.matches(request))
        } else {
            None
        };

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(cache = %self.name, url = %request.url, "Cache HIT");
                Some(entry.response)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!(cache = %self.name, url = %request.url, "Cache MISS");
                None
            }
        }
    }

    /// Store `response` under `request`. Last write wins for the same key.
    pub fn put(&self, request: &Request, response: Response) -> Result<(), ProxyError> {
        if request.method != "GET" {
            return Err(ProxyError::InvalidRequest(format!(
                "Cannot cache {} request for {}",
                request.method, request.url
            )));
        }
        if !matches!(request.url.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidRequest(format!(
                "Cannot cache non-HTTP URL {}",
                request.url
            )));
        }
        if response.is_partial() {
            return Err(ProxyError::InvalidRequest(format!(
                "Cannot cache partial response for {}",
                request.url
            )));
        }
        if response.vary().iter().any(|name| name == "*") {
            return Err(ProxyError::InvalidRequest(format!(
                "Cannot cache response with Vary: * for {}",
                request.url
            )));
        }

        let key = RequestKey::from_request(request);
        let entry = CachedEntry::new(request, response);

        if let Some(disk) = &self.disk {
            disk.store(&key, &entry)?;
        }

        debug!(
            cache = %self.name,
            url = %key.url,
            status = entry.response.status,
            size = entry.response.body.len(),
            "Cached response"
        );
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Fetch `request` and store the result. Non-2xx responses are rejected.
    pub async fn add(&self, fetcher: &dyn Fetcher, request: &Request) -> Result<(), ProxyError> {
        let response = fetcher.fetch(request).await?;
        if !response.ok() {
            return Err(ProxyError::BadStatus(response.status, request.url.to_string()));
        }
        self.put(request, response)
    }

    /// Remove the entry for `request`. Returns whether one existed.
    pub fn delete(&self, request: &Request) -> bool {
        let key = RequestKey::from_request(request);
        if let Some(disk) = &self.disk {
            disk.remove(&key);
        }
        let removed = self.entries.remove(&key).is_some();
        if removed {
            debug!(cache = %self.name, url = %key.url, "Deleted cache entry");
        }
        removed
    }

    /// Keys of every stored entry, sorted
    pub fn keys(&self) -> Vec<RequestKey> {
        let mut keys: Vec<RequestKey> = self.entries.iter().map(|(k, _)| (*k).clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.iter().count()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and reset counters
    pub fn clear(&self) -> Result<(), ProxyError> {
        if let Some(disk) = &self.disk {
            disk.clear()?;
        }
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!(cache = %self.name, "Cleared cache");
        Ok(())
    }

    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        debug!(
            cache = %self.name,
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            entries = self.len(),
            "Cache metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::fetcher::mock::MockFetcher;
    use url::Url;

    fn request(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_cache_hit_miss() {
        let cache = Cache::new("offline", None);
        let req = request("http://localhost/a.html");

        assert!(cache.match_request(&req).is_none());
        let (_, _, hit_rate) = cache.stats();
        assert_eq!(hit_rate, 0.0);

        cache.put(&req, Response::new(200, "a")).unwrap();
        let hit = cache.match_request(&req).unwrap();
        assert_eq!(hit.body.as_ref(), b"a");

        let (hits, misses, hit_rate) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
        assert!(hit_rate > 49.0 && hit_rate < 51.0);
    }

    #[test]
    fn test_put_rejects_uncacheable() {
        let cache = Cache::new("offline", None);

        let post = request("http://localhost/api").with_method("POST");
        assert!(matches!(
            cache.put(&post, Response::new(200, "x")),
            Err(ProxyError::InvalidRequest(_))
        ));

        let partial = request("http://localhost/video.mp4");
        assert!(cache.put(&partial, Response::new(206, "x")).is_err());

        let vary_star = Response::new(200, "x").with_header("Vary", "*");
        assert!(cache.put(&request("http://localhost/v"), vary_star).is_err());

        let data = request("data:text/plain,hello");
        assert!(cache.put(&data, Response::new(200, "x")).is_err());

        assert!(cache.is_empty());
    }

    #[test]
    fn test_non_get_never_matches() {
        let cache = Cache::new("offline", None);
        cache.put(&request("http://localhost/a"), Response::new(200, "a")).unwrap();
        let head = request("http://localhost/a").with_method("HEAD");
        assert!(cache.match_request(&head).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let cache = Cache::new("offline", None);
        let req = request("http://localhost/a");
        cache.put(&req, Response::new(200, "first")).unwrap();
        cache.put(&req, Response::new(200, "second")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_request(&req).unwrap().body.as_ref(), b"second");
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = Cache::new("offline", None);
        let a = request("http://localhost/a");
        let b = request("http://localhost/b");
        cache.put(&a, Response::new(200, "a")).unwrap();
        cache.put(&b, Response::new(200, "b")).unwrap();

        assert!(cache.delete(&a));
        assert!(!cache.delete(&a));
        assert_eq!(cache.keys().len(), 1);

        cache.clear().unwrap();
        assert!(cache.match_request(&b).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_bad_status() {
        let fetcher = MockFetcher::new();
        fetcher.respond("http://localhost/a.html", Response::new(200, "a"));
        let cache = Cache::new("offline", None);

        cache.add(&fetcher, &request("http://localhost/a.html")).await.unwrap();
        let err = cache
            .add(&fetcher, &request("http://localhost/missing.css"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::BadStatus(404, _)));

        assert_eq!(cache.keys().len(), 1);
        assert_eq!(cache.keys()[0].url, "http://localhost/a.html");
    }

    #[test]
    fn test_entries_reload_from_disk() {
        let root = tempfile::tempdir().unwrap();
        let req = request("http://localhost/a.html");
        {
            let cache = Cache::new("offline", Some(DiskStore::open(root.path(), "offline").unwrap()));
            cache.put(&req, Response::new(200, "persisted")).unwrap();
        }

        let cache = Cache::new("offline", Some(DiskStore::open(root.path(), "offline").unwrap()));
        assert_eq!(cache.match_request(&req).unwrap().body.as_ref(), b"persisted");
    }
}
