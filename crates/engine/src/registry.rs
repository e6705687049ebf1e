//! Part manager registry
//!
//! Maps part identity to its [`PartManager`]. Identity is the address of the
//! part's data; the manager holds the part weakly, so the registry never
//! extends a part's lifetime. Because the manager's `Weak` keeps the
//! allocation reserved, an address cannot be reused while its entry exists;
//! an entry whose part has died is treated as absent.
//!
//! The registry lives behind the engine's state lock and is only touched for
//! short lookups and inserts, never while calling into parts.

use composer_core::ComposablePart;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::part_manager::{part_key, PartManager};

// =============================================================================
// Part Registry
// =============================================================================
//
// Dead entries are purged on every write. Purged managers are handed back to
// the caller, which disposes their dependencies and unindexes them outside the
// state lock.

/// Registry of live part managers
#[derive(Debug, Default)]
pub struct PartRegistry {
    managers: FxHashMap<usize, Arc<PartManager>>,
}

impl PartRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager of `part`, if registered
    pub fn get(&self, part: &Arc<dyn ComposablePart>) -> Option<Arc<PartManager>> {
        self.managers
            .get(&part_key(part))
            .filter(|manager| manager.is_for(part))
            .cloned()
    }

    /// Manager of `part`, registering `candidate` if there is none
    ///
    /// `candidate` must be a manager for `part`, built by the caller before
    /// taking the state lock since building one reads the part. It is
    /// dropped unused when another thread registered the part first.
    ///
    /// Returns the registered manager and every dead manager purged by this
    /// write.
    pub fn get_or_insert(
        &mut self,
        part: &Arc<dyn ComposablePart>,
        candidate: Arc<PartManager>,
    ) -> (Arc<PartManager>, Vec<Arc<PartManager>>) {
        debug_assert!(candidate.is_for(part));
        let purged = self.purge_dead();
        if let Some(existing) = self.get(part) {
            return (existing, purged);
        }
        self.managers.insert(candidate.key(), Arc::clone(&candidate));
        (candidate, purged)
    }

    /// Remove `manager` if it is the registered one for its part
    pub fn remove(&mut self, manager: &Arc<PartManager>) -> bool {
        match self.managers.get(&manager.key()) {
            Some(existing) if Arc::ptr_eq(existing, manager) => {
                self.managers.remove(&manager.key());
                true
            }
            _ => false,
        }
    }

    /// Remove every entry whose part has been dropped
    pub fn purge_dead(&mut self) -> Vec<Arc<PartManager>> {
        let dead: Vec<usize> = self
            .managers
            .iter()
            .filter(|(_, manager)| !manager.is_alive())
            .map(|(key, _)| *key)
            .collect();
        dead.into_iter()
            .filter_map(|key| self.managers.remove(&key))
            .collect()
    }

    /// Remove and return every entry
    pub fn drain(&mut self) -> Vec<Arc<PartManager>> {
        self.managers.drain().map(|(_, manager)| manager).collect()
    }

    /// Registered managers (live or not yet purged)
    pub fn managers(&self) -> impl Iterator<Item = &Arc<PartManager>> {
        self.managers.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}
