//! Fetch-interception worker: lifecycle, clients, and the cache proxy

pub mod clients;
pub mod lifecycle;
pub mod proxy;

pub use clients::ClientId;
pub use lifecycle::WorkerState;
pub use proxy::{ActivateReport, CacheProxy, FetchOutcome, InstallReport, ProxyStatus, ResponseSource};
