//! Worker lifecycle state and registration capabilities

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Request header sent on navigation preload fetches
pub const PRELOAD_HEADER: &str = "Service-Worker-Navigation-Preload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; the worker will never control clients
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Navigation preload toggle
#[derive(Debug, Default)]
pub struct NavigationPreload {
    enabled: AtomicBool,
}

impl NavigationPreload {
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        debug!("Navigation preload enabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Capabilities the host exposes to the worker
#[derive(Debug, Default)]
pub struct Registration {
    navigation_preload: Option<NavigationPreload>,
}

impl Registration {
    /// `supports_preload` controls whether navigation preload is exposed at all
    pub fn new(supports_preload: bool) -> Self {
        Self {
            navigation_preload: supports_preload.then(NavigationPreload::default),
        }
    }

    /// Navigation preload, when the host supports it
    pub fn navigation_preload(&self) -> Option<&NavigationPreload> {
        self.navigation_preload.as_ref()
    }

    /// True only when supported and enabled
    pub fn preload_enabled(&self) -> bool {
        self.navigation_preload
            .as_ref()
            .is_some_and(NavigationPreload::is_enabled)
    }
}
