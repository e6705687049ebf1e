//! Recomposition index
//!
//! Reverse index from contract name to the part managers that import it.
//! When the export pool changes, the engine asks the index which parts are
//! affected and, for each, which of its imports are.
//!
//! Index updates are queued and folded in lazily on the next query, so
//! tracking and untracking stay cheap on the composition hot path.
//!
//! ## Design
//!
//! - **DashMap** for the index: contract lookups for different contracts do
//!   not contend.
//! - **Net change queue**: one pending change per manager, the latest one
//!   wins. An add followed by a remove leaves the manager unindexed.
//! - **Bounded queue**: the queue is folded once it reaches
//!   [`FOLD_THRESHOLD`] entries, so a host that tracks and releases parts
//!   without ever changing exports does not keep released managers alive.

use composer_core::{ExportDefinition, ImportDefinition};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use tracing::trace;

use crate::part_manager::PartManager;

type FxBuildHasher = BuildHasherDefault<FxHasher>;

/// Pending changes folded eagerly once the queue reaches this size
pub const FOLD_THRESHOLD: usize = 64;

#[derive(Debug)]
enum IndexChange {
    Add(Arc<PartManager>),
    Remove(Arc<PartManager>),
}

/// Contract name to interested part managers
#[derive(Debug, Default)]
pub struct RecompositionManager {
    index: DashMap<String, Vec<Arc<PartManager>>, FxBuildHasher>,
    /// Latest pending change per manager, keyed by manager address
    pending: Mutex<FxHashMap<usize, IndexChange>>,
}

impl RecompositionManager {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `manager` for indexing
    pub fn add_part_to_index(&self, manager: &Arc<PartManager>) {
        self.queue(manager, IndexChange::Add(Arc::clone(manager)));
    }

    /// Queue `manager` for removal from the index
    pub fn add_part_to_unindex(&self, manager: &Arc<PartManager>) {
        self.queue(manager, IndexChange::Remove(Arc::clone(manager)));
    }

    fn queue(&self, manager: &Arc<PartManager>, change: IndexChange) {
        let mut pending = self.pending.lock();
        pending.insert(Arc::as_ptr(manager) as usize, change);
        if pending.len() >= FOLD_THRESHOLD {
            trace!(target: "composer::recompose", changes = pending.len(), "Folding full index queue");
            self.apply(&mut pending);
        }
    }

    fn fold_pending(&self) {
        let mut pending = self.pending.lock();
        self.apply(&mut pending);
    }

    /// Apply and clear `pending`; the caller holds the queue lock so a change
    /// queued concurrently is never applied before an older one
    fn apply(&self, pending: &mut FxHashMap<usize, IndexChange>) {
        for (_, change) in pending.drain() {
            match change {
                IndexChange::Add(manager) => self.index_part(manager),
                IndexChange::Remove(manager) => self.unindex_part(&manager),
            }
        }
    }

    /// Number of queued changes not yet folded into the index
    pub fn pending_change_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn index_part(&self, manager: Arc<PartManager>) {
        for import in manager.imports() {
            let mut entry = self
                .index
                .entry(import.contract_name().to_string())
                .or_default();
            if !entry.iter().any(|existing| Arc::ptr_eq(existing, &manager)) {
                entry.push(Arc::clone(&manager));
            }
        }
    }

    fn unindex_part(&self, manager: &Arc<PartManager>) {
        for import in manager.imports() {
            let contract = import.contract_name();
            let now_empty = match self.index.get_mut(contract) {
                Some(mut entry) => {
                    entry.retain(|existing| !Arc::ptr_eq(existing, manager));
                    entry.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.index.remove_if(contract, |_, managers| managers.is_empty());
            }
        }
    }

    /// Managers importing any of `contract_names`, without duplicates
    pub fn get_affected_parts(&self, contract_names: &[String]) -> Vec<Arc<PartManager>> {
        self.fold_pending();

        let mut seen = FxHashSet::default();
        let mut affected = Vec::new();
        for contract in contract_names {
            if let Some(entry) = self.index.get(contract) {
                for manager in entry.iter() {
                    if seen.insert(Arc::as_ptr(manager) as usize) {
                        affected.push(Arc::clone(manager));
                    }
                }
            }
        }
        trace!(target: "composer::recompose", contracts = contract_names.len(), parts = affected.len(), "Affected parts resolved");
        affected
    }

    /// Imports of `manager` whose constraint any of `changed_exports`
    /// satisfies
    pub fn get_affected_imports<'m, 'e>(
        manager: &'m PartManager,
        changed_exports: &'e [ExportDefinition],
    ) -> impl Iterator<Item = &'m ImportDefinition> + 'e
    where
        'm: 'e,
    {
        manager.imports().iter().filter(move |import| {
            changed_exports
                .iter()
                .any(|export| import.is_constraint_satisfied_by(export))
        })
    }

    /// Number of distinct indexed managers
    pub fn indexed_part_count(&self) -> usize {
        self.fold_pending();
        let mut seen = FxHashSet::default();
        for entry in self.index.iter() {
            for manager in entry.value() {
                seen.insert(Arc::as_ptr(manager) as usize);
            }
        }
        seen.len()
    }

    /// Drop the index and every queued change
    pub fn clear(&self) {
        self.pending.lock().clear();
        self.index.clear();
    }
}
