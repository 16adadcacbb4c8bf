//! Cache Proxy
//!
//! Cache-first fetch interception with network fallback. Install prefetches
//! the configured assets, activate enables navigation preload and claims
//! clients, and every fetch afterwards is served from cache when possible.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use super::clients::{ClientId, Clients};
use super::lifecycle::{Registration, WorkerState, PRELOAD_HEADER};
use crate::cache::CacheStorage;
use crate::config::ProxyConfig;
use crate::errors::ProxyError;
use crate::http::{CacheMode, Fetcher, Request, Response};

/// Where a fetch response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseSource {
    Cache,
    Network,
    Preload,
}

/// Result of one intercepted fetch. Produced exactly once per fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// Not intercepted; the client falls back to default network handling
    Passthrough,
}

/// Outcome of prefetching the asset list
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    pub cache_name: String,
    /// URLs stored in the cache
    pub cached: Vec<String>,
    /// (url, error) for assets that could not be stored
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ActivateReport {
    pub navigation_preload: bool,
    pub claimed: usize,
    pub deleted_caches: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProxyStatus {
    pub state: WorkerState,
    pub cache_name: String,
    pub caches: Vec<String>,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub clients: usize,
}

/// Offline caching proxy
pub struct CacheProxy {
    config: ProxyConfig,
    /// Origin relative URLs resolve against
    origin: Url,
    storage: Arc<CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    registration: Registration,
    clients: Clients,
    state: RwLock<WorkerState>,
}

impl CacheProxy {
    pub fn new(
        config: ProxyConfig,
        storage: Arc<CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ProxyError> {
        let origin = Url::parse(&config.origin)?;
        let registration = Registration::new(config.navigation_preload);

        Ok(Self {
            config,
            origin,
            storage,
            fetcher,
            registration,
            clients: Clients::new(),
            state: RwLock::new(WorkerState::Parsed),
        })
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: WorkerState) {
        *self.state.write().await = state;
        debug!(state = %state, "Worker state changed");
    }

    pub fn cache_name(&self) -> String {
        self.config.effective_cache_name()
    }

    /// Resolve `target` against the configured origin
    pub fn resolve(&self, target: &str) -> Result<Request, ProxyError> {
        Request::resolve(&self.origin, target)
    }

    /// Prefetch every configured asset into the cache.
    ///
    /// Resolves only after every prefetch has settled. Failed assets are
    /// reported, not retried. Re-running on an active worker refreshes the
    /// assets and keeps it active.
    pub async fn install(&self) -> Result<InstallReport, ProxyError> {
        // An active worker refreshes in place so connecting clients stay controlled
        let refreshing = self.state().await == WorkerState::Activated;
        if !refreshing {
            self.set_state(WorkerState::Installing).await;
        }

        match self.prefetch_assets().await {
            Ok(report) => {
                if !refreshing {
                    self.set_state(WorkerState::Installed).await;
                }

                info!(
                    cache = %report.cache_name,
                    cached = report.cached.len(),
                    failed = report.failed.len(),
                    refresh = refreshing,
                    "Install complete"
                );
                Ok(report)
            }
            Err(e) if refreshing => {
                error!(error = %e, "Asset refresh failed, keeping active worker");
                Err(e)
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn prefetch_assets(&self) -> Result<InstallReport, ProxyError> {
        let cache_name = self.cache_name();
        let cache = self.storage.open(&cache_name).await?;

        let requests = self
            .config
            .assets
            .iter()
            .map(|asset| self.resolve(asset).map(|r| r.with_cache(CacheMode::Reload)))
            .collect::<Result<Vec<_>, _>>()?;

        info!(cache = %cache_name, assets = requests.len(), "Prefetching assets");

        let fetcher = self.fetcher.as_ref();
        let results = join_all(requests.iter().map(|request| cache.add(fetcher, request))).await;

        let mut report = InstallReport {
            cache_name,
            ..Default::default()
        };
        for (request, result) in requests.iter().zip(results) {
            match result {
                Ok(()) => report.cached.push(request.url.to_string()),
                Err(e) => {
                    warn!(url = %request.url, error = %e, "Asset prefetch failed");
                    report.failed.push((request.url.to_string(), e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Enable navigation preload when available and claim open clients.
    ///
    /// With a version configured, caches from other versions are deleted first.
    pub async fn activate(&self) -> Result<ActivateReport, ProxyError> {
        let previous = self.state().await;
        if !matches!(previous, WorkerState::Installed | WorkerState::Activated) {
            return Err(ProxyError::InvalidState(format!(
                "cannot activate a {} worker",
                previous
            )));
        }

        self.set_state(WorkerState::Activating).await;

        let deleted_caches = match self.delete_stale_caches().await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!(error = %e, "Failed to delete stale caches");
                self.set_state(previous).await;
                return Err(e);
            }
        };

        let navigation_preload = match self.registration.navigation_preload() {
            Some(preload) => {
                preload.enable();
                true
            }
            None => {
                debug!("Navigation preload unsupported, skipping");
                false
            }
        };

        let claimed = self.clients.claim().await;
        self.set_state(WorkerState::Activated).await;

        info!(
            cache = %self.cache_name(),
            navigation_preload = navigation_preload,
            claimed = claimed,
            deleted = deleted_caches.len(),
            "Activated"
        );

        Ok(ActivateReport {
            navigation_preload,
            claimed,
            deleted_caches,
        })
    }

    async fn delete_stale_caches(&self) -> Result<Vec<String>, ProxyError> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await {
            if self.config.is_stale_cache(&name) {
                self.storage.delete(&name).await?;
                info!(cache = %name, "Deleted stale cache version");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Handle one intercepted fetch: cache first, network on miss.
    ///
    /// Network responses are stored for later hits. A response that cannot be
    /// stored is still returned.
    pub async fn fetch(&self, request: Request) -> Result<FetchOutcome, ProxyError> {
        if request.is_cache_only_cross_origin() {
            debug!(url = %request.url, mode = ?request.mode, "Cache-only cross-origin request, not intercepting");
            return Ok(FetchOutcome::Passthrough);
        }

        let cache = self.storage.open(&self.cache_name()).await?;

        // Race the navigation's network fetch against the cache lookup
        let preload = (request.is_navigation() && self.registration.preload_enabled()).then(|| {
            let fetcher = Arc::clone(&self.fetcher);
            let preload_request = request.clone().with_header(PRELOAD_HEADER, "true");
            tokio::spawn(async move { fetcher.fetch(&preload_request).await })
        });

        if let Some(response) = cache.match_request(&request) {
            if let Some(task) = preload {
                task.abort();
            }
            debug!(cache = cache.name(), url = %request.url, "Serving from cache");
            return Ok(FetchOutcome::Respond {
                response,
                source: ResponseSource::Cache,
            });
        }

        let (response, source) = match preload {
            Some(task) => {
                let response = task
                    .await
                    .map_err(|e| ProxyError::Network(format!("Preload task failed: {}", e)))??;
                (response, ResponseSource::Preload)
            }
            None => (self.fetcher.fetch(&request).await?, ResponseSource::Network),
        };

        if let Err(e) = cache.put(&request, response.clone()) {
            warn!(url = %request.url, error = %e, "Response not cached");
        }

        debug!(url = %request.url, status = response.status, source = ?source, "Serving from network");
        Ok(FetchOutcome::Respond { response, source })
    }

    /// Fetch on behalf of a connected client. Uncontrolled clients pass through.
    pub async fn handle_fetch(
        &self,
        client: ClientId,
        request: Request,
    ) -> Result<FetchOutcome, ProxyError> {
        if !self.clients.is_controlled(client).await {
            debug!(client = client, url = %request.url, "Client not controlled, passing through");
            return Ok(FetchOutcome::Passthrough);
        }
        self.fetch(request).await
    }

    /// Register a client; it is controlled immediately if the worker is active
    pub async fn connect_client(&self) -> ClientId {
        let controlled = self.state().await == WorkerState::Activated;
        self.clients.register(controlled).await
    }

    pub async fn disconnect_client(&self, client: ClientId) {
        self.clients.unregister(client).await;
    }

    /// Delete a named cache. Returns whether it existed.
    pub async fn delete_cache(&self, name: &str) -> Result<bool, ProxyError> {
        self.storage.delete(name).await
    }

    /// URLs stored in the active cache, sorted
    pub async fn entries(&self) -> Result<Vec<String>, ProxyError> {
        let cache_name = self.cache_name();
        if !self.storage.has(&cache_name).await {
            return Ok(Vec::new());
        }
        let cache = self.storage.open(&cache_name).await?;
        Ok(cache.keys().into_iter().map(|key| key.url).collect())
    }

    /// Evict the GET entry for `target` from the active cache.
    /// Returns whether one existed.
    pub async fn delete_entry(&self, target: &str) -> Result<bool, ProxyError> {
        let request = self.resolve(target)?;
        let cache = self.storage.open(&self.cache_name()).await?;
        Ok(cache.delete(&request))
    }

    pub async fn status(&self) -> Result<ProxyStatus, ProxyError> {
        let cache_name = self.cache_name();
        let (entries, hits, misses) = if self.storage.has(&cache_name).await {
            let cache = self.storage.open(&cache_name).await?;
            cache.log_metrics();
            let (hits, misses, _) = cache.stats();
            (cache.len(), hits, misses)
        } else {
            (0, 0, 0)
        };

        Ok(ProxyStatus {
            state: self.state().await,
            caches: self.storage.keys().await,
            cache_name,
            entries,
            hits,
            misses,
            clients: self.clients.count().await,
        })
    }
}
