//! Per-transaction shadow index
//!
//! While a transaction is open, tracking changes for an engine are recorded
//! here instead of in the engine's recomposition index. The context is stored
//! in the transaction's value slot under the engine id and applied by a
//! commit action. A context created in a nested transaction chains to the
//! enclosing transaction's context and folds into it on commit.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::engine::ImportEngine;
use crate::part_manager::PartManager;

#[derive(Debug, Default)]
struct Changes {
    added: Vec<Arc<PartManager>>,
    removed: Vec<Arc<PartManager>>,
}

fn remove_manager(list: &mut Vec<Arc<PartManager>>, manager: &Arc<PartManager>) -> bool {
    match list.iter().position(|m| Arc::ptr_eq(m, manager)) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

/// Pending tracking changes of one engine in one transaction
#[derive(Debug)]
pub(crate) struct EngineContext {
    engine: Weak<ImportEngine>,
    parent: Option<Arc<EngineContext>>,
    completed: AtomicBool,
    changes: Mutex<Changes>,
}

impl EngineContext {
    pub(crate) fn new(engine: Weak<ImportEngine>, parent: Option<Arc<EngineContext>>) -> Self {
        Self {
            engine,
            parent,
            completed: AtomicBool::new(false),
            changes: Mutex::new(Changes::default()),
        }
    }

    /// Record that `manager` starts tracking; cancels a pending removal
    pub(crate) fn add_part_manager(&self, manager: &Arc<PartManager>) {
        let mut changes = self.changes.lock();
        if !remove_manager(&mut changes.removed, manager)
            && !changes.added.iter().any(|m| Arc::ptr_eq(m, manager))
        {
            changes.added.push(Arc::clone(manager));
        }
    }

    /// Record that `manager` is released; cancels a pending addition
    ///
    /// The removal itself is always recorded: a released manager must leave
    /// the registry on commit even if it was only tracked in this
    /// transaction.
    pub(crate) fn remove_part_manager(&self, manager: &Arc<PartManager>) {
        let mut changes = self.changes.lock();
        remove_manager(&mut changes.added, manager);
        if !changes.removed.iter().any(|m| Arc::ptr_eq(m, manager)) {
            changes.removed.push(Arc::clone(manager));
        }
    }

    /// Managers added here or in any enclosing context
    pub(crate) fn added_part_managers(&self) -> Vec<Arc<PartManager>> {
        let mut added = self.changes.lock().added.clone();
        if let Some(parent) = &self.parent {
            added.extend(parent.added_part_managers());
        }
        added
    }

    /// Managers removed here or in any enclosing context
    pub(crate) fn removed_part_managers(&self) -> Vec<Arc<PartManager>> {
        let mut removed = self.changes.lock().removed.clone();
        if let Some(parent) = &self.parent {
            removed.extend(parent.removed_part_managers());
        }
        removed
    }

    /// Apply the recorded changes
    ///
    /// Folds into the parent while the parent is still pending; otherwise
    /// applies to the engine directly.
    pub(crate) fn complete(&self) {
        if self.completed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Changes { added, removed } = std::mem::take(&mut *self.changes.lock());

        if let Some(parent) = self.parent.as_ref().filter(|p| !p.is_completed()) {
            for manager in &added {
                parent.add_part_manager(manager);
            }
            for manager in &removed {
                parent.remove_part_manager(manager);
            }
            return;
        }

        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        debug!(target: "composer::txn", added = added.len(), removed = removed.len(), "Applying engine context");
        for manager in &added {
            engine.start_satisfying_imports(manager, None);
        }
        for manager in &removed {
            engine.stop_satisfying_imports(manager, None);
        }
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}
