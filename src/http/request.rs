//! Request model
//!
//! An intercepted request: method, absolute URL, headers, and the two
//! directives that steer interception (cache mode and request mode).

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ProxyError;

/// Cache directive carried by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    /// Caller wants to be satisfied from cache only
    OnlyIfCached,
}

impl CacheMode {
    /// Whether the network request should bypass intermediate HTTP caches
    pub fn bypasses_http_cache(self) -> bool {
        matches!(self, CacheMode::Reload | CacheMode::NoStore | CacheMode::NoCache)
    }
}

/// Scope of a request relative to the client's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    SameOrigin,
    NoCors,
    #[default]
    Cors,
    Navigate,
}

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value for `name` with a single one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Headers> for Vec<(String, String)> {
    fn from(headers: Headers) -> Self {
        headers.0
    }
}

/// An intercepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Upper-case HTTP method
    pub method: String,
    pub url: Url,
    pub headers: Headers,
    pub cache: CacheMode,
    pub mode: RequestMode,
}

impl Request {
    /// A plain GET request with default directives
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            headers: Headers::new(),
            cache: CacheMode::Default,
            mode: RequestMode::default(),
        }
    }

    /// Resolve `target` (absolute, or a path relative to `base`) into a GET request
    pub fn resolve(base: &Url, target: &str) -> Result<Self, ProxyError> {
        let url = base.join(target)?;
        Ok(Self::get(url))
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Cache-only requests outside the same-origin scope cannot be served
    /// by an intercepting proxy and must be left to default handling.
    pub fn is_cache_only_cross_origin(&self) -> bool {
        self.cache == CacheMode::OnlyIfCached && self.mode != RequestMode::SameOrigin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("http://localhost:8080").unwrap()
    }

    #[test]
    fn test_resolve_relative_path() {
        let req = Request::resolve(&origin(), "/index.html").unwrap();
        assert_eq!(req.url.as_str(), "http://localhost:8080/index.html");
        assert_eq!(req.method, "GET");
        assert_eq!(req.cache, CacheMode::Default);
    }

    #[test]
    fn test_resolve_absolute_url_ignores_base() {
        let req = Request::resolve(&origin(), "https://cdn.example.com/app.js").unwrap();
        assert_eq!(req.url.host_str(), Some("cdn.example.com"));
    }

    #[test]
    fn test_cache_only_cross_origin_detection() {
        let base = Request::resolve(&origin(), "/a.html").unwrap();
        assert!(!base.is_cache_only_cross_origin());

        let cross = base.clone().with_cache(CacheMode::OnlyIfCached);
        assert!(cross.is_cache_only_cross_origin());

        let navigate = cross.clone().with_mode(RequestMode::Navigate);
        assert!(navigate.is_cache_only_cross_origin());

        let same = cross.with_mode(RequestMode::SameOrigin);
        assert!(!same.is_cache_only_cross_origin());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Accept", "text/html");
        assert_eq!(headers.get("accept"), Some("text/html"));

        headers.set("ACCEPT", "image/png");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("Accept"), Some("image/png"));
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: CacheMode = serde_json::from_str("\"only-if-cached\"").unwrap();
        assert_eq!(mode, CacheMode::OnlyIfCached);
        let mode: RequestMode = serde_json::from_str("\"same-origin\"").unwrap();
        assert_eq!(mode, RequestMode::SameOrigin);
        assert!(CacheMode::Reload.bypasses_http_cache());
        assert!(!CacheMode::ForceCache.bypasses_http_cache());
    }
}
