//! IPC protocol definitions for client-proxy communication
//!
//! Newline-delimited JSON exchanged over a Unix domain socket. Each connected
//! client is one page; its `fetch` commands are the intercepted requests.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::errors::ProxyError;
use crate::http::{CacheMode, RequestMode};
use crate::worker::{ActivateReport, FetchOutcome, InstallReport, ProxyStatus, ResponseSource, WorkerState};

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent from clients to the proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Re-run the install prefetch
    Install,
    /// Activate the worker and claim connected clients
    Activate,
    /// Intercept a fetch
    #[serde(rename_all = "camelCase")]
    Fetch {
        /// Absolute URL or a path relative to the proxy origin
        url: String,
        #[serde(default)]
        method: Option<String>,
        /// Request headers as (name, value) pairs
        #[serde(default)]
        headers: Vec<(String, String)>,
        #[serde(default)]
        cache: CacheMode,
        #[serde(default)]
        mode: RequestMode,
    },
    /// Delete a named cache
    DeleteCache { name: String },
    /// List URLs stored in the active cache
    ListEntries,
    /// Evict one URL from the active cache
    DeleteEntry { url: String },
    /// Get proxy status
    GetStatus,
}

/// Responses sent from the proxy to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Success response
    #[serde(rename_all = "camelCase")]
    Success {
        /// Optional success message
        message: Option<String>,
    },
    /// Error response
    #[serde(rename_all = "camelCase")]
    Error {
        /// Error message
        error: String,
        /// Error class, e.g. "network" or "invalidRequest"
        kind: String,
    },
    #[serde(rename_all = "camelCase")]
    Installed {
        cache_name: String,
        cached: Vec<String>,
        failed: Vec<FailedAsset>,
    },
    #[serde(rename_all = "camelCase")]
    Activated {
        navigation_preload: bool,
        claimed: usize,
        deleted_caches: Vec<String>,
    },
    /// The intercepted fetch's response
    #[serde(rename_all = "camelCase")]
    Fetched {
        status: u16,
        status_text: String,
        headers: Vec<(String, String)>,
        /// Base64-encoded body
        body: String,
        source: ResponseSource,
    },
    #[serde(rename_all = "camelCase")]
    Entries { cache_name: String, urls: Vec<String> },
    /// Not intercepted; handle the request with default network behavior
    Passthrough,
    /// Status response with proxy state
    #[serde(rename_all = "camelCase")]
    Status {
        /// Protocol version
        version: u32,
        state: WorkerState,
        cache_name: String,
        caches: Vec<String>,
        entries: usize,
        hits: u64,
        misses: u64,
        clients: usize,
    },
}

/// An asset that could not be prefetched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedAsset {
    pub url: String,
    pub error: String,
}

impl Response {
    pub fn from_error(err: &ProxyError) -> Self {
        Response::Error {
            error: err.to_string(),
            kind: err.kind().to_string(),
        }
    }

    pub fn from_outcome(outcome: FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Respond { response, source } => Response::Fetched {
                status: response.status,
                status_text: response.status_text,
                headers: response.headers.into(),
                body: base64::engine::general_purpose::STANDARD.encode(&response.body),
                source,
            },
            FetchOutcome::Passthrough => Response::Passthrough,
        }
    }
}

impl From<InstallReport> for Response {
    fn from(report: InstallReport) -> Self {
        Response::Installed {
            cache_name: report.cache_name,
            cached: report.cached,
            failed: report
                .failed
                .into_iter()
                .map(|(url, error)| FailedAsset { url, error })
                .collect(),
        }
    }
}

impl From<ActivateReport> for Response {
    fn from(report: ActivateReport) -> Self {
        Response::Activated {
            navigation_preload: report.navigation_preload,
            claimed: report.claimed,
            deleted_caches: report.deleted_caches,
        }
    }
}

impl From<ProxyStatus> for Response {
    fn from(status: ProxyStatus) -> Self {
        Response::Status {
            version: PROTOCOL_VERSION,
            state: status.state,
            cache_name: status.cache_name,
            caches: status.caches,
            entries: status.entries,
            hits: status.hits,
            misses: status.misses,
            clients: status.clients,
        }
    }
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n'); // Add newline delimiter
    Ok(json)
}
