//! Proxy configuration
//!
//! Everything the proxy needs at initialization: cache name and version,
//! the origin assets are resolved against, the prefetch list, and daemon
//! settings. Loaded from `$OFFLINE_PROXY_CONFIG` or
//! `~/.config/offline-proxy/config.json`, then overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for the config directory
const APP_NAME: &str = "offline-proxy";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Env var pointing at an explicit config file
const CONFIG_ENV: &str = "OFFLINE_PROXY_CONFIG";

/// Assets prefetched at install when no list is configured
const DEFAULT_ASSETS: [&str; 4] = [
    "/index.html",
    "/pico.min.css",
    "/fpx.png",
    "/youtube-placeholder.svg",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Origin that relative asset and fetch URLs resolve against
    pub origin: String,
    /// Base cache name
    pub cache_name: String,
    /// When set, caches are named `{cache_name}-v{version}` and older
    /// versions are deleted on activation
    pub version: Option<u32>,
    /// Assets prefetched on install, in order
    pub assets: Vec<String>,
    /// Whether the host offers navigation preload
    pub navigation_preload: bool,
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
    /// Network request timeout
    pub request_timeout_secs: u64,
    /// Directory for persisted caches; in-memory only when unset
    pub persist_dir: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            cache_name: "offline".to_string(),
            version: None,
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            navigation_preload: true,
            socket_path: PathBuf::from("/tmp/offline-proxy.sock"),
            request_timeout_secs: 30,
            persist_dir: None,
        }
    }
}

impl ProxyConfig {
    /// Load from the config file (if any) and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::config_path()?,
        };

        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Apply `OFFLINE_PROXY_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup("OFFLINE_PROXY_ORIGIN") {
            self.origin = origin;
        }
        if let Some(socket) = lookup("OFFLINE_PROXY_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(dir) = lookup("OFFLINE_PROXY_CACHE_DIR") {
            self.persist_dir = Some(PathBuf::from(dir));
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Name of the cache this configuration reads and writes
    pub fn effective_cache_name(&self) -> String {
        match self.version {
            Some(version) => format!("{}-v{}", self.cache_name, version),
            None => self.cache_name.clone(),
        }
    }

    /// Whether `name` is an older (or newer) version of this cache.
    /// Always false when no version is configured.
    pub fn is_stale_cache(&self, name: &str) -> bool {
        if self.version.is_none() || name == self.effective_cache_name() {
            return false;
        }
        let prefix = format!("{}-v", self.cache_name);
        name.strip_prefix(&prefix)
            .is_some_and(|rest| rest.parse::<u32>().is_ok())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.effective_cache_name(), "offline");
        assert_eq!(config.assets.len(), 4);
        assert_eq!(config.assets[0], "/index.html");
    }

    #[test]
    fn test_versioned_cache_name() {
        let config = ProxyConfig {
            version: Some(2),
            ..Default::default()
        };
        assert_eq!(config.effective_cache_name(), "offline-v2");
        assert!(config.is_stale_cache("offline-v1"));
        assert!(!config.is_stale_cache("offline-v2"));
        assert!(!config.is_stale_cache("offline"));
        assert!(!config.is_stale_cache("offline-vintage"));
        assert!(!config.is_stale_cache("images-v1"));
    }

    #[test]
    fn test_unversioned_never_stale() {
        let config = ProxyConfig::default();
        assert!(!config.is_stale_cache("offline-v1"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProxyConfig::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.cache_name, "offline");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"origin":"https://app.example.com","version":3,"assets":["/a.html","/b.css"]}"#,
        )
        .unwrap();

        let config = ProxyConfig::load_from(&path).unwrap();
        assert_eq!(config.origin, "https://app.example.com");
        assert_eq!(config.effective_cache_name(), "offline-v3");
        assert_eq!(config.assets, vec!["/a.html", "/b.css"]);
        assert!(config.navigation_preload);
    }

    #[test]
    fn test_load_invalid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ProxyConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ProxyConfig::default();
        config.apply_overrides(|name| match name {
            "OFFLINE_PROXY_ORIGIN" => Some("http://10.0.0.1:3000".to_string()),
            "OFFLINE_PROXY_CACHE_DIR" => Some("/var/cache/offline".to_string()),
            _ => None,
        });
        assert_eq!(config.origin, "http://10.0.0.1:3000");
        assert_eq!(config.persist_dir, Some(PathBuf::from("/var/cache/offline")));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/offline-proxy.sock"));
    }
}
