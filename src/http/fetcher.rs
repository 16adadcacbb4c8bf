//! Network fetch interface
//!
//! `Fetcher` is the seam between the proxy and the network. The daemon uses
//! the reqwest-backed `NetworkFetcher`; tests substitute a recording mock.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::debug;

use super::request::{Headers, Request};
use super::response::Response;
use crate::errors::ProxyError;

/// Given a request, returns a response or fails.
///
/// Any HTTP status counts as a response; only transport failures are errors.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, ProxyError>;
}

/// Fetches over HTTP(S) with reqwest
#[derive(Clone)]
pub struct NetworkFetcher {
    http_client: Client,
}

impl NetworkFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Fetcher for NetworkFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, ProxyError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            ProxyError::InvalidRequest(format!("Unsupported method: {}", request.method))
        })?;

        let mut builder = self.http_client.request(method, request.url.clone());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        if request.cache.bypasses_http_cache() {
            builder = builder
                .header("Cache-Control", "no-cache")
                .header("Pragma", "no-cache");
        }

        debug!(method = %request.method, url = %request.url, cache = ?request.cache, "Network fetch");

        let response = builder.send().await.map_err(ProxyError::from_reqwest)?;

        let status = response.status();
        let final_url = response.url().to_string();
        let headers = header_pairs(response.headers());

        let body = response.bytes().await.map_err(ProxyError::from_reqwest)?;

        debug!(
            url = %request.url,
            status = status.as_u16(),
            size = body.len(),
            "Network fetch complete"
        );

        Ok(Response {
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            url: Some(final_url),
            ..Response::new(status.as_u16(), body)
        })
    }
}

/// Copy response headers, keeping non-UTF-8 values lossily
fn header_pairs(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(name, value)| {
            let value = match value.to_str() {
                Ok(v) => v.to_string(),
                Err(_) => {
                    debug!(header = name.as_str(), "Non-UTF-8 header value, storing lossily");
                    String::from_utf8_lossy(value.as_bytes()).into_owned()
                }
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}
