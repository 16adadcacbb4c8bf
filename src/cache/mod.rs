//! Response caching layer
//!
//! Named, request-keyed response caches backed by Moka, with optional
//! on-disk persistence so prefetched assets survive restarts.

pub mod disk;
pub mod key;
pub mod storage;
pub mod store;

pub use storage::CacheStorage;
