//! HTTP request/response model and the network fetch seam

pub mod fetcher;
pub mod request;
pub mod response;

pub use fetcher::{Fetcher, NetworkFetcher};
pub use request::{CacheMode, Headers, Request, RequestMode};
pub use response::Response;
