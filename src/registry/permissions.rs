//! Endpoint allow-lists derived from the key registry

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{ApiKeyEntry, KeyRegistry, WILDCARD_PERMISSION};

/// Endpoint path -> authorized keys, built from valid entries only
#[derive(Debug, Default)]
pub struct PermissionIndex {
    generation: u64,
    by_endpoint: HashMap<String, Vec<String>>,
    wildcard: Vec<String>,
}

impl PermissionIndex {
    pub fn build(entries: &[ApiKeyEntry], generation: u64) -> Self {
        let mut by_endpoint: HashMap<String, Vec<String>> = HashMap::new();
        let mut wildcard: Vec<String> = Vec::new();

        for entry in entries.iter().filter(|e| e.valid) {
            for perm in &entry.permissions {
                let keys = by_endpoint.entry(perm.clone()).or_default();
                if !keys.contains(&entry.key) {
                    keys.push(entry.key.clone());
                }
            }
            if entry.grants_all() && !wildcard.contains(&entry.key) {
                wildcard.push(entry.key.clone());
            }
        }

        Self {
            generation,
            by_endpoint,
            wildcard,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Keys allowed on `endpoint`: explicit grants first, then wildcard
    /// holders, first occurrence wins. Empty means nobody.
    pub fn authorized_keys(&self, endpoint: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .by_endpoint
            .get(endpoint)
            .cloned()
            .unwrap_or_default();
        for key in &self.wildcard {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    pub fn is_authorized(&self, endpoint: &str, key: &str) -> bool {
        self.wildcard.iter().any(|k| k == key)
            || self
                .by_endpoint
                .get(endpoint)
                .is_some_and(|keys| keys.iter().any(|k| k == key))
    }
}

/// Caches a [`PermissionIndex`] and rebuilds it whenever the registry
/// generation moves on (reload, deactivation).
pub struct PermissionResolver {
    registry: Arc<KeyRegistry>,
    cached: RwLock<Option<Arc<PermissionIndex>>>,
}

impl PermissionResolver {
    pub fn new(registry: Arc<KeyRegistry>) -> Self {
        Self {
            registry,
            cached: RwLock::new(None),
        }
    }

    pub fn index(&self) -> Arc<PermissionIndex> {
        let snapshot = self.registry.snapshot();

        if let Some(index) = self.cached.read().as_ref() {
            if index.generation() == snapshot.generation {
                return index.clone();
            }
        }

        let index = Arc::new(PermissionIndex::build(&snapshot.entries, snapshot.generation));
        debug!(generation = snapshot.generation, "Rebuilt permission index");
        *self.cached.write() = Some(index.clone());
        index
    }

    pub fn authorized_keys(&self, endpoint: &str) -> Vec<String> {
        self.index().authorized_keys(endpoint)
    }

    pub fn is_authorized(&self, endpoint: &str, key: &str) -> bool {
        self.index().is_authorized(endpoint, key)
    }
}
