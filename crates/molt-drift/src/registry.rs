// crates/molt-drift/src/registry.rs
//
// Process-wide drift state, keyed by namespace. One mutex per namespace so
// samples for different namespaces never contend. Created at startup and
// injected into `DriftMonitor`; torn down with `clear`.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::detection::DriftState;

/// Owns one lock-protected `DriftState` per namespace.
#[derive(Debug, Default)]
pub struct DriftRegistry {
    states: DashMap<String, Arc<Mutex<DriftState>>>,
}

impl DriftRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `namespace`, created with `init` on first use.
    ///
    /// The map shard is released before the caller locks the returned state.
    pub fn get_or_create(
        &self,
        namespace: &str,
        init: impl FnOnce() -> DriftState,
    ) -> Arc<Mutex<DriftState>> {
        if let Some(existing) = self.states.get(namespace) {
            return existing.value().clone();
        }
        self.states
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .value()
            .clone()
    }

    /// State for `namespace` if any sample was ever recorded.
    pub fn get(&self, namespace: &str) -> Option<Arc<Mutex<DriftState>>> {
        self.states.get(namespace).map(|s| s.value().clone())
    }

    /// Forget a namespace. Returns whether state existed.
    pub fn remove(&self, namespace: &str) -> bool {
        self.states.remove(namespace).is_some()
    }

    /// Known namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop every namespace's state.
    pub fn clear(&self) {
        self.states.clear();
    }
}
