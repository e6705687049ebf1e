//! Per-part composition bookkeeping
//!
//! A [`PartManager`] is created the first time the engine sees a part and
//! lives in the engine's registry until the part is released, dropped by its
//! owner, or the engine is disposed. It never keeps the part alive.

use composer_concurrency::AtomicComposition;
use composer_core::{
    ComposablePart, CompositionError, CompositionResult, Disposable, Export, ImportDefinition,
    ImportState,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Registry key of a part: the address of its data
pub(crate) fn part_key(part: &Arc<dyn ComposablePart>) -> usize {
    Arc::as_ptr(part) as *const () as usize
}

/// Composition state of one part
pub struct PartManager {
    key: usize,
    part: Weak<dyn ComposablePart>,
    name: String,
    imports: Vec<ImportDefinition>,
    state: Mutex<ImportState>,
    /// Exports captured inside a transaction, applied on the next satisfy
    saved_imports: Mutex<FxHashMap<ImportDefinition, Vec<Export>>>,
    tracking: AtomicBool,
    /// Disposables of the exports currently bound, per import
    dependencies: Mutex<FxHashMap<ImportDefinition, Vec<Arc<dyn Disposable>>>>,
}

impl PartManager {
    /// Create a manager for `part`
    ///
    /// Import definitions are read once here.
    pub fn new(part: &Arc<dyn ComposablePart>) -> Self {
        Self {
            key: part_key(part),
            part: Arc::downgrade(part),
            name: part.display_name(),
            imports: part.import_definitions(),
            state: Mutex::new(ImportState::NoImportsSatisfied),
            saved_imports: Mutex::new(FxHashMap::default()),
            tracking: AtomicBool::new(false),
            dependencies: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn key(&self) -> usize {
        self.key
    }

    /// The part, if its owner still holds it
    pub fn part(&self) -> Option<Arc<dyn ComposablePart>> {
        self.part.upgrade()
    }

    /// Whether the part is still alive
    pub fn is_alive(&self) -> bool {
        self.part.strong_count() > 0
    }

    /// Whether this manager belongs to `part`
    pub fn is_for(&self, part: &Arc<dyn ComposablePart>) -> bool {
        self.is_alive() && self.key == part_key(part)
    }

    /// Display name captured at creation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Import definitions captured at creation
    pub fn imports(&self) -> &[ImportDefinition] {
        &self.imports
    }

    /// Current state
    pub fn state(&self) -> ImportState {
        *self.state.lock()
    }

    /// Replace the state
    pub fn set_state(&self, state: ImportState) {
        let mut current = self.state.lock();
        let from = *current;
        trace!(target: "composer::engine", part = %self.name, from = %from, to = %state, "State change");
        *current = state;
    }

    /// Whether the part is registered for recomposition
    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::Acquire)
    }

    pub(crate) fn set_tracking(&self, tracking: bool) {
        self.tracking.store(tracking, Ordering::Release);
    }

    // ========================================================================
    // Saved imports
    // ========================================================================

    /// Exports saved for `import`, if any
    pub fn try_get_saved_import(&self, import: &ImportDefinition) -> Option<Vec<Export>> {
        self.saved_imports.lock().get(import).cloned()
    }

    /// Save `exports` for `import`
    ///
    /// Inside a transaction a revert action restores the previous entry.
    pub fn set_saved_import(
        self: &Arc<Self>,
        import: &ImportDefinition,
        exports: Vec<Export>,
        atomic: Option<&AtomicComposition<'_>>,
    ) {
        let previous = self.saved_imports.lock().insert(import.clone(), exports);
        if let Some(atomic) = atomic {
            let manager = Arc::clone(self);
            let import = import.clone();
            atomic.add_revert_action(move || {
                let mut saved = manager.saved_imports.lock();
                match previous {
                    Some(exports) => {
                        saved.insert(import, exports);
                    }
                    None => {
                        saved.remove(&import);
                    }
                }
            });
        }
    }

    /// Number of saved entries
    pub fn saved_import_count(&self) -> usize {
        self.saved_imports.lock().len()
    }

    /// Drop every saved entry
    pub fn clear_saved_imports(&self) {
        self.saved_imports.lock().clear();
    }

    // ========================================================================
    // Calls into the part
    // ========================================================================

    /// Bind `exports` to `import` on the part
    ///
    /// On success, disposables of the previous binding that are not part of
    /// the new one are disposed. A dropped part is skipped.
    pub fn try_set_import(&self, import: &ImportDefinition, exports: Vec<Export>) -> CompositionResult {
        let Some(part) = self.part() else {
            return CompositionResult::ok();
        };

        let bound: Vec<Arc<dyn Disposable>> = exports
            .iter()
            .filter_map(|export| export.disposable().cloned())
            .collect();

        if let Err(e) = part.set_import(import, exports) {
            return CompositionResult::from_error(CompositionError::import_failed(
                &self.name, import, e,
            ));
        }

        let previous = {
            let mut dependencies = self.dependencies.lock();
            if bound.is_empty() {
                dependencies.remove(import)
            } else {
                dependencies.insert(import.clone(), bound.clone())
            }
        };
        for stale in previous.unwrap_or_default() {
            if !bound.iter().any(|current| Arc::ptr_eq(current, &stale)) {
                stale.dispose();
            }
        }
        CompositionResult::ok()
    }

    /// Run the part's composed callback
    pub fn try_on_composed(&self) -> CompositionResult {
        let Some(part) = self.part() else {
            return CompositionResult::ok();
        };
        match part.on_composed() {
            Ok(()) => CompositionResult::ok(),
            Err(e) => CompositionResult::from_error(CompositionError::notify_failed(&self.name, e)),
        }
    }

    /// Dispose every tracked disposable
    pub fn dispose_all_dependencies(&self) {
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for disposable in dependencies.into_values().flatten() {
            disposable.dispose();
        }
    }
}

impl fmt::Debug for PartManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartManager")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("tracking", &self.is_tracking())
            .field("alive", &self.is_alive())
            .finish()
    }
}
