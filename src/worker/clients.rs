//! Client registry
//!
//! A client is one connected page. Only controlled clients have their
//! fetches intercepted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

pub type ClientId = u64;

/// Tracks connected clients and which of them the worker controls
#[derive(Debug, Default)]
pub struct Clients {
    /// Controlled flag by client ID
    clients: RwLock<HashMap<ClientId, bool>>,
    next_id: AtomicU64,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new client. `controlled` is true when an active worker
    /// already exists for it.
    pub async fn register(&self, controlled: bool) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.clients.write().await.insert(id, controlled);
        debug!(client = id, controlled = controlled, "Client registered");
        id
    }

    pub async fn unregister(&self, id: ClientId) {
        if self.clients.write().await.remove(&id).is_some() {
            debug!(client = id, "Client unregistered");
        }
    }

    /// Take control of every registered client. Returns how many were newly claimed.
    pub async fn claim(&self) -> usize {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for controlled in clients.values_mut().filter(|c| !**c) {
            *controlled = true;
            claimed += 1;
        }
        debug!(claimed = claimed, total = clients.len(), "Claimed clients");
        claimed
    }

    pub async fn is_controlled(&self, id: ClientId) -> bool {
        self.clients.read().await.get(&id).copied().unwrap_or(false)
    }

    pub async fn count(&self) -> usize {
        self.clients.read().await.len()
    }
}
