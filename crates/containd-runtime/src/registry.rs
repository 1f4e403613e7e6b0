//! Live containers keyed by friendly name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::container::Container;

/// Concurrency-safe map from friendly name to live container.
///
/// Monitors on different workers register and deregister concurrently;
/// each operation is atomic and never fails.
#[derive(Default)]
pub struct Registry {
    containers: Mutex<HashMap<String, Arc<Container>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn containers(&self) -> MutexGuard<'_, HashMap<String, Arc<Container>>> {
        self.containers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a container under its friendly name.
    ///
    /// Returns `false` and leaves the registry untouched if the name is
    /// already taken.
    pub fn register(&self, container: Arc<Container>) -> bool {
        let mut containers = self.containers();
        if containers.contains_key(container.friendly_name()) {
            return false;
        }
        let _ = containers.insert(container.friendly_name().to_owned(), container);
        true
    }

    /// Removes the container registered under `friendly_name`.
    pub fn deregister(&self, friendly_name: &str) -> Option<Arc<Container>> {
        let removed = self.containers().remove(friendly_name);
        if removed.is_some() {
            tracing::debug!(name = friendly_name, "container deregistered");
        }
        removed
    }

    /// Removes `container` only if it is the entry registered under its name.
    pub fn deregister_instance(&self, container: &Arc<Container>) -> bool {
        let mut containers = self.containers();
        let same = containers
            .get(container.friendly_name())
            .is_some_and(|live| Arc::ptr_eq(live, container));
        if same {
            let _ = containers.remove(container.friendly_name());
            tracing::debug!(name = container.friendly_name(), "container deregistered");
        }
        same
    }

    /// Returns the container registered under `friendly_name`.
    #[must_use]
    pub fn get(&self, friendly_name: &str) -> Option<Arc<Container>> {
        self.containers().get(friendly_name).cloned()
    }

    /// Whether a container is registered under `friendly_name`.
    #[must_use]
    pub fn contains(&self, friendly_name: &str) -> bool {
        self.containers().contains_key(friendly_name)
    }

    /// Returns all live containers, sorted by friendly name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<Container>> {
        let mut all: Vec<_> = self.containers().values().cloned().collect();
        all.sort_by(|a, b| a.friendly_name().cmp(b.friendly_name()));
        all
    }

    /// Number of live containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers().len()
    }

    /// Whether no container is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers().is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.containers().keys()).finish()
    }
}
