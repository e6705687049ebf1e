//! Import engine
//!
//! The [`ImportEngine`] binds the imports of parts to exports supplied by an
//! [`ExportProvider`] and keeps those bindings current as the provider's pool
//! changes.
//!
//! ## Operations
//!
//! - `preview_imports`: check that every `ExactlyOne` import can be bound,
//!   optionally inside a transaction
//! - `satisfy_imports` / `satisfy_imports_once`: bind every import and run
//!   the part's composed callback
//! - `release_imports`: stop tracking a part and dispose what its bindings
//!   owned
//! - `dispose`: detach from the provider and drop all state
//!
//! ## Locking
//!
//! Every operation and every change notification runs under the re-entrant
//! composition lock. The state lock guards the part registry and is never
//! held while calling into parts or the provider.

use composer_concurrency::{AtomicComposition, CompositionLock};
use composer_core::{
    ComposablePart, ComposeError, ComposeResult, CompositionError, CompositionResult, Export,
    ExportDefinition, ImportDefinition, ImportState, ProviderError,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::builder::ImportEngineBuilder;
use crate::config::{ConfigError, EngineConfig};
use crate::engine_context::EngineContext;
use crate::part_manager::PartManager;
use crate::provider::{
    ExportProvider, ExportsChangeEvent, ExportsChangingListener, SubscriptionId,
};
use crate::recomposition::RecompositionManager;
use crate::registry::PartRegistry;
use crate::state_machine::{next_step, ImportSubset, RecursionStack, Step};

/// Resolves part imports against an export provider
///
/// Created through [`ImportEngine::new`] or [`ImportEngine::builder`] and
/// always shared as `Arc<ImportEngine>`: the provider holds it weakly as a
/// change listener.
///
/// # Example
///
/// ```ignore
/// let engine = ImportEngine::new(provider);
/// engine.satisfy_imports(&part)?;
///
/// let txn = AtomicComposition::new();
/// engine.preview_imports(&other, Some(&txn))?;
/// txn.complete()?;
/// ```
pub struct ImportEngine {
    id: Uuid,
    config: EngineConfig,
    provider: Arc<dyn ExportProvider>,
    lock: CompositionLock<PartRegistry>,
    recursion: RecursionStack,
    recomposition: RecompositionManager,
    subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
    weak_self: Weak<ImportEngine>,
}

impl ImportEngine {
    /// Create an engine with the default configuration
    pub fn new(provider: Arc<dyn ExportProvider>) -> Arc<Self> {
        Self::create(provider, EngineConfig::default())
    }

    /// Create an engine with `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_config(
        provider: Arc<dyn ExportProvider>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Self::create(provider, config))
    }

    /// Start a builder
    pub fn builder() -> ImportEngineBuilder {
        ImportEngineBuilder::new()
    }

    fn create(provider: Arc<dyn ExportProvider>, config: EngineConfig) -> Arc<Self> {
        let engine = Arc::new_cyclic(|weak_self| ImportEngine {
            id: Uuid::new_v4(),
            lock: CompositionLock::new(PartRegistry::new(), config.thread_safe),
            recursion: RecursionStack::new(config.max_composition_depth),
            recomposition: RecompositionManager::new(),
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
            weak_self: weak_self.clone(),
            provider,
            config,
        });

        let listener: Weak<dyn ExportsChangingListener> = Arc::downgrade(&engine) as _;
        let subscription = engine.provider.subscribe(listener);
        *engine.subscription.lock() = Some(subscription);

        info!(
            target: "composer::engine",
            id = %engine.id,
            max_depth = engine.config.max_composition_depth,
            thread_safe = engine.config.thread_safe,
            "Import engine created"
        );
        engine
    }

    /// Engine identifier, also the key of its state in transactions
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Check that every `ExactlyOne` import of `part` can be bound
    ///
    /// Inside a transaction, bindings are staged and the composition lock is
    /// held until the transaction commits or reverts; a revert returns the
    /// part to `NoImportsSatisfied`. Without one, imports are bound directly
    /// and the lock is released before returning. On success the part is
    /// tracked for recomposition.
    ///
    /// Does nothing when silent rejection is disabled.
    ///
    /// # Errors
    ///
    /// - `ObjectDisposed` after [`dispose`](Self::dispose)
    /// - `ChangeRejected` inside a transaction, which the caller must drop
    /// - `Composition` otherwise
    pub fn preview_imports(
        &self,
        part: &Arc<dyn ComposablePart>,
        atomic: Option<&AtomicComposition<'_>>,
    ) -> ComposeResult<()> {
        self.ensure_not_disposed()?;
        if !self.config.silent_rejection {
            return Ok(());
        }

        let holder = Arc::new(self.lock.lock_composition());
        // revert actions run newest first, so the release goes in first
        if let Some(atomic) = atomic {
            if holder.is_held() {
                let holder = Arc::clone(&holder);
                atomic.add_revert_action(move || holder.release());
            }
        }

        let manager = self.get_or_create_part_manager(part);
        debug!(target: "composer::engine", part = %manager.name(), transactional = atomic.is_some(), "Previewing imports");

        let result = self.try_preview_imports_state_machine(&manager, atomic);
        if !result.succeeded() {
            warn!(target: "composer::engine", part = %manager.name(), errors = result.errors().len(), "Preview rejected part");
            return result.into_result(atomic.is_some());
        }

        self.start_satisfying_imports(&manager, atomic);

        if let Some(atomic) = atomic {
            if holder.is_held() {
                let holder = Arc::clone(&holder);
                atomic.add_commit_action(move || {
                    holder.release();
                    Ok(())
                });
            }
        }
        Ok(())
    }

    /// Bind every import of `part` and track it for recomposition
    ///
    /// Returns immediately if the part is already composed.
    ///
    /// # Errors
    ///
    /// - `ObjectDisposed` after [`dispose`](Self::dispose)
    /// - `Composition` with every failure of the pass
    pub fn satisfy_imports(&self, part: &Arc<dyn ComposablePart>) -> ComposeResult<()> {
        self.satisfy(part, true)
    }

    /// Bind every import of `part` without tracking it for recomposition
    ///
    /// # Errors
    ///
    /// Same as [`satisfy_imports`](Self::satisfy_imports).
    pub fn satisfy_imports_once(&self, part: &Arc<dyn ComposablePart>) -> ComposeResult<()> {
        self.satisfy(part, false)
    }

    fn satisfy(&self, part: &Arc<dyn ComposablePart>, track: bool) -> ComposeResult<()> {
        self.ensure_not_disposed()?;

        let manager = self.get_or_create_part_manager(part);
        if manager.state() == ImportState::Composed {
            return Ok(());
        }

        let _holder = self.lock.lock_composition();
        debug!(target: "composer::engine", part = %manager.name(), track, "Satisfying imports");

        let result = self.try_satisfy_imports(&manager, track);
        if !result.succeeded() {
            warn!(target: "composer::engine", part = %manager.name(), errors = result.errors().len(), "Satisfying imports failed");
        }
        result.into_result(false)
    }

    /// Stop tracking `part` and dispose resources owned by its bindings
    ///
    /// Unknown parts are ignored. Inside a transaction the release is
    /// applied on commit.
    ///
    /// # Errors
    ///
    /// Returns `ObjectDisposed` after [`dispose`](Self::dispose).
    pub fn release_imports(
        &self,
        part: &Arc<dyn ComposablePart>,
        atomic: Option<&AtomicComposition<'_>>,
    ) -> ComposeResult<()> {
        self.ensure_not_disposed()?;

        let _holder = self.lock.lock_composition();
        let manager = self.lock.read_state().get(part);
        if let Some(manager) = manager {
            debug!(target: "composer::engine", part = %manager.name(), transactional = atomic.is_some(), "Releasing imports");
            self.stop_satisfying_imports(&manager, atomic);
        }
        Ok(())
    }

    /// Detach from the provider and drop all state
    ///
    /// Idempotent. Afterwards every operation fails with `ObjectDisposed` and
    /// change notifications are ignored.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let holder = self.lock.lock_composition();

        if let Some(subscription) = self.subscription.lock().take() {
            self.provider.unsubscribe(subscription);
        }

        let managers = self.lock.write_state().drain();
        for manager in &managers {
            manager.set_tracking(false);
            manager.dispose_all_dependencies();
        }
        self.recomposition.clear();

        drop(holder);
        self.lock.dispose();
        info!(target: "composer::engine", id = %self.id, parts = managers.len(), "Import engine disposed");
    }

    /// Whether [`dispose`](Self::dispose) has run
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// State of `part`, if the engine knows it
    pub fn part_state(&self, part: &Arc<dyn ComposablePart>) -> Option<ImportState> {
        self.lock.read_state().get(part).map(|manager| manager.state())
    }

    /// Number of parts tracked for recomposition
    pub fn tracked_part_count(&self) -> usize {
        self.lock
            .read_state()
            .managers()
            .filter(|manager| manager.is_tracking())
            .count()
    }

    /// Number of parts with a manager in the registry
    pub fn registered_part_count(&self) -> usize {
        self.lock.read_state().len()
    }

    fn ensure_not_disposed(&self) -> ComposeResult<()> {
        if self.is_disposed() {
            return Err(ComposeError::ObjectDisposed);
        }
        Ok(())
    }

    // ========================================================================
    // Registry
    // ========================================================================

    fn get_or_create_part_manager(&self, part: &Arc<dyn ComposablePart>) -> Arc<PartManager> {
        let existing = self.lock.read_state().get(part);
        if let Some(manager) = existing {
            return manager;
        }
        // built before taking the write lock: reading the part may call back into the engine
        let candidate = Arc::new(PartManager::new(part));
        let (manager, purged) = self.lock.write_state().get_or_insert(part, candidate);
        if !purged.is_empty() {
            debug!(target: "composer::engine", purged = purged.len(), "Purged managers of dropped parts");
        }
        for dead in &purged {
            dead.dispose_all_dependencies();
            self.untrack(dead);
        }
        manager
    }

    fn untrack(&self, manager: &Arc<PartManager>) {
        if manager.is_tracking() {
            manager.set_tracking(false);
            self.recomposition.add_part_to_unindex(manager);
        }
    }

    // ========================================================================
    // Tracking
    // ========================================================================

    /// Register `manager` for recomposition, or record it in the
    /// transaction's engine context
    pub(crate) fn start_satisfying_imports(
        &self,
        manager: &Arc<PartManager>,
        atomic: Option<&AtomicComposition<'_>>,
    ) {
        if self.is_disposed() {
            return;
        }
        match atomic {
            Some(atomic) => self.engine_context(atomic).add_part_manager(manager),
            None => {
                if !manager.is_tracking() {
                    manager.set_tracking(true);
                    self.recomposition.add_part_to_index(manager);
                }
            }
        }
    }

    /// Remove `manager` from the registry and the index, or record the
    /// removal in the transaction's engine context
    pub(crate) fn stop_satisfying_imports(
        &self,
        manager: &Arc<PartManager>,
        atomic: Option<&AtomicComposition<'_>>,
    ) {
        if self.is_disposed() {
            return;
        }
        match atomic {
            Some(atomic) => self.engine_context(atomic).remove_part_manager(manager),
            None => {
                self.lock.write_state().remove(manager);
                manager.dispose_all_dependencies();
                self.untrack(manager);
            }
        }
    }

    fn engine_context(&self, atomic: &AtomicComposition<'_>) -> Arc<EngineContext> {
        if let Some(context) = atomic.try_get_value::<EngineContext>(self.id, true) {
            return context;
        }
        let parent = atomic.try_get_value::<EngineContext>(self.id, false);
        let context = Arc::new(EngineContext::new(self.weak_self.clone(), parent));
        atomic.set_value(self.id, Arc::clone(&context));

        let committed = Arc::clone(&context);
        atomic.add_commit_action(move || {
            committed.complete();
            Ok(())
        });
        context
    }

    // ========================================================================
    // Preview
    // ========================================================================

    fn try_preview_imports_state_machine(
        &self,
        manager: &Arc<PartManager>,
        atomic: Option<&AtomicComposition<'_>>,
    ) -> CompositionResult {
        let state = manager.state();
        if state == ImportState::ImportsPreviewing {
            return CompositionError::cycle_detected(manager.name()).into();
        }
        if state > ImportState::ImportsPreviewing {
            return CompositionResult::ok();
        }

        manager.set_state(ImportState::ImportsPreviewing);
        if let Some(atomic) = atomic {
            let reverted = Arc::clone(manager);
            atomic.add_revert_action(move || reverted.set_state(ImportState::NoImportsSatisfied));
        }

        let imports = ImportSubset::Preview.select(manager);
        let result = self.try_satisfy_import_subset(manager, &imports, atomic);
        manager.set_state(if result.succeeded() {
            ImportState::ImportsPreviewed
        } else {
            ImportState::NoImportsSatisfied
        });
        result
    }

    // ========================================================================
    // Satisfaction
    // ========================================================================

    fn try_satisfy_imports(&self, manager: &Arc<PartManager>, track: bool) -> CompositionResult {
        if manager.state() == ImportState::Composed {
            return CompositionResult::ok();
        }

        let result = {
            let _frame = match self.recursion.push(manager) {
                Ok(frame) => frame,
                Err(e) => return e.into(),
            };
            self.try_satisfy_imports_state_machine(manager)
        };

        if track && result.succeeded() && manager.state() == ImportState::Composed {
            self.start_satisfying_imports(manager, None);
        }
        result
    }

    fn try_satisfy_imports_state_machine(&self, manager: &Arc<PartManager>) -> CompositionResult {
        loop {
            let state = manager.state();
            match next_step(state) {
                Step::Done | Step::AlreadyNotifying => return CompositionResult::ok(),
                Step::Reentered => {
                    if self.recursion.in_prerequisite_loop() {
                        return CompositionError::cycle_detected(manager.name()).into();
                    }
                    trace!(target: "composer::engine", part = %manager.name(), "Legal cycle through post-export imports");
                    return CompositionResult::ok();
                }
                Step::ReenteredPreview => {
                    return CompositionError::cycle_detected(manager.name()).into();
                }
                Step::SatisfyPrerequisites => {
                    manager.set_state(ImportState::PreExportImportsSatisfying);
                    let imports = ImportSubset::Prerequisite.select(manager);
                    let result = self.try_satisfy_import_subset(manager, &imports, None);
                    if !result.succeeded() {
                        manager.set_state(state);
                        return result;
                    }
                    manager.set_state(ImportState::PreExportImportsSatisfied);
                }
                Step::SatisfyPostExport => {
                    manager.set_state(ImportState::PostExportImportsSatisfying);
                    let imports = ImportSubset::PostExport.select(manager);
                    let result = self.try_satisfy_import_subset(manager, &imports, None);
                    if !result.succeeded() {
                        manager.set_state(state);
                        return result;
                    }
                    manager.set_state(ImportState::PostExportImportsSatisfied);
                }
                Step::Notify => {
                    manager.set_state(ImportState::ComposedNotifying);
                    manager.clear_saved_imports();
                    let result = manager.try_on_composed();
                    if !result.succeeded() {
                        manager.set_state(state);
                        return result;
                    }
                    manager.set_state(ImportState::Composed);
                }
            }
        }
    }

    /// Bind (or stage, inside a transaction) every import in `imports`
    ///
    /// Saved exports take precedence over the provider. Every import is
    /// attempted and every failure merged.
    fn try_satisfy_import_subset(
        &self,
        manager: &Arc<PartManager>,
        imports: &[ImportDefinition],
        atomic: Option<&AtomicComposition<'_>>,
    ) -> CompositionResult {
        let mut result = CompositionResult::ok();
        for import in imports {
            let exports = match manager.try_get_saved_import(import) {
                Some(saved) => saved,
                None => match self.try_get_exports(manager, import, atomic) {
                    Ok(exports) => exports,
                    Err(e) => {
                        result.merge_error(e);
                        continue;
                    }
                },
            };
            match atomic {
                None => result.merge(manager.try_set_import(import, exports)),
                Some(atomic) => manager.set_saved_import(import, exports, Some(atomic)),
            }
        }
        result
    }

    fn try_get_exports(
        &self,
        manager: &PartManager,
        import: &ImportDefinition,
        atomic: Option<&AtomicComposition<'_>>,
    ) -> Result<Vec<Export>, CompositionError> {
        let exports = self
            .provider
            .get_exports(import, atomic)
            .map_err(|e| match e {
                ProviderError::CardinalityMismatch { found, .. } => {
                    CompositionError::cardinality_mismatch(manager.name(), import, found)
                }
                other => CompositionError::import_failed(manager.name(), import, other),
            })?;
        if !import.cardinality().accepts(exports.len()) {
            return Err(CompositionError::cardinality_mismatch(
                manager.name(),
                import,
                exports.len(),
            ));
        }
        trace!(target: "composer::engine", part = %manager.name(), import = %import, exports = exports.len(), "Resolved import");
        Ok(exports)
    }

    // ========================================================================
    // Recomposition
    // ========================================================================

    fn try_recompose_imports(
        &self,
        manager: &Arc<PartManager>,
        changed_exports: &[ExportDefinition],
        atomic: Option<&AtomicComposition<'_>>,
    ) -> CompositionResult {
        if !manager.is_alive() {
            self.untrack(manager);
            return CompositionResult::ok();
        }

        let state = manager.state();
        if !state.accepts_recomposition() {
            return CompositionError::invalid_state_for_recomposition(manager.name(), state).into();
        }
        let composed = state == ImportState::Composed;

        let imports: Vec<ImportDefinition> =
            RecompositionManager::get_affected_imports(manager, changed_exports)
                .cloned()
                .collect();
        if imports.is_empty() {
            return CompositionResult::ok();
        }

        let mut result = CompositionResult::ok();
        for import in &imports {
            result.merge(self.try_recompose_import(manager, composed, import, atomic));
        }

        if result.succeeded() && composed {
            debug!(target: "composer::recompose", part = %manager.name(), imports = imports.len(), "Recomposed part");
            match atomic {
                None => result.merge(manager.try_on_composed()),
                Some(atomic) => {
                    let notified = Arc::clone(manager);
                    atomic.add_commit_action(move || notified.try_on_composed().into_result(false));
                }
            }
        }
        result
    }

    fn try_recompose_import(
        &self,
        manager: &Arc<PartManager>,
        composed: bool,
        import: &ImportDefinition,
        atomic: Option<&AtomicComposition<'_>>,
    ) -> CompositionResult {
        if composed && !import.is_recomposable() {
            return CompositionError::non_recomposable_import_changed(manager.name(), import).into();
        }

        // never the saved cache: the pool is what changed
        let exports = match self.try_get_exports(manager, import, atomic) {
            Ok(exports) => exports,
            Err(e) => return e.into(),
        };

        if !composed {
            manager.set_saved_import(import, exports, atomic);
            return CompositionResult::ok();
        }
        match atomic {
            None => manager.try_set_import(import, exports),
            Some(atomic) => {
                let rebound = Arc::clone(manager);
                let import = import.clone();
                atomic.add_commit_action(move || rebound.try_set_import(&import, exports).into_result(false));
                CompositionResult::ok()
            }
        }
    }
}

impl ExportsChangingListener for ImportEngine {
    fn on_exports_changing(&self, event: &ExportsChangeEvent<'_>) -> ComposeResult<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let _holder = self.lock.lock_composition();

        let atomic = event.atomic_composition();
        let changed_exports: Vec<ExportDefinition> = event.changed_exports().cloned().collect();
        let mut affected = self
            .recomposition
            .get_affected_parts(&event.changed_contract_names());

        if let Some(context) =
            atomic.and_then(|atomic| atomic.try_get_value::<EngineContext>(self.id, false))
        {
            for added in context.added_part_managers() {
                if !affected.iter().any(|m| Arc::ptr_eq(m, &added)) {
                    affected.push(added);
                }
            }
            let removed = context.removed_part_managers();
            affected.retain(|m| !removed.iter().any(|r| Arc::ptr_eq(r, m)));
        }

        debug!(target: "composer::recompose", parts = affected.len(), changed = changed_exports.len(), "Exports changing");

        let mut result = CompositionResult::ok();
        for manager in &affected {
            result.merge(self.try_recompose_imports(manager, &changed_exports, atomic));
        }
        if !result.succeeded() {
            warn!(target: "composer::recompose", errors = result.errors().len(), "Recomposition rejected export change");
        }
        result.into_result(atomic.is_some())
    }
}

impl Drop for ImportEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ImportEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportEngine")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ListenerSet;
    use crate::recomposition::FOLD_THRESHOLD;
    use composer_core::{Cardinality, ErrorKind, PartError};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    // ========================================================================
    // Test doubles
    // ========================================================================

    #[derive(Default)]
    struct MapProvider {
        exports: Mutex<HashMap<String, Vec<Export>>>,
        queries: AtomicUsize,
        listeners: ListenerSet,
    }

    impl MapProvider {
        fn put(&self, contract: &str, value: u32) -> Export {
            let export = Export::from_value(ExportDefinition::new(contract), value);
            self.exports
                .lock()
                .entry(contract.to_string())
                .or_default()
                .push(export.clone());
            export
        }

        fn replace(&self, contract: &str, value: u32) -> Export {
            self.exports.lock().remove(contract);
            self.put(contract, value)
        }
    }

    impl ExportProvider for MapProvider {
        fn get_exports(
            &self,
            import: &ImportDefinition,
            _atomic: Option<&AtomicComposition<'_>>,
        ) -> Result<Vec<Export>, ProviderError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let exports = self
                .exports
                .lock()
                .get(import.contract_name())
                .cloned()
                .unwrap_or_default();
            if !import.cardinality().accepts(exports.len()) {
                return Err(ProviderError::cardinality_mismatch(import, exports.len()));
            }
            Ok(exports)
        }

        fn subscribe(&self, listener: Weak<dyn ExportsChangingListener>) -> SubscriptionId {
            self.listeners.subscribe(listener)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.listeners.unsubscribe(id);
        }
    }

    struct Consumer {
        imports: Vec<ImportDefinition>,
        bound: Mutex<HashMap<String, Vec<u32>>>,
        composed: AtomicUsize,
    }

    impl Consumer {
        fn new(imports: Vec<ImportDefinition>) -> Arc<Self> {
            Arc::new(Self {
                imports,
                bound: Mutex::new(HashMap::new()),
                composed: AtomicUsize::new(0),
            })
        }

        fn bound(&self, member: &str) -> Vec<u32> {
            self.bound.lock().get(member).cloned().unwrap_or_default()
        }
    }

    impl ComposablePart for Consumer {
        fn display_name(&self) -> String {
            "Consumer".to_string()
        }
        fn import_definitions(&self) -> Vec<ImportDefinition> {
            self.imports.clone()
        }
        fn export_definitions(&self) -> Vec<ExportDefinition> {
            Vec::new()
        }
        fn set_import(&self, import: &ImportDefinition, exports: Vec<Export>) -> Result<(), PartError> {
            let values = exports
                .iter()
                .map(|e| e.value_as::<u32>().map(|v| *v))
                .collect::<Result<Vec<_>, _>>()?;
            self.bound.lock().insert(import.member().to_string(), values);
            Ok(())
        }
        fn on_composed(&self) -> Result<(), PartError> {
            self.composed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (Arc<MapProvider>, Arc<ImportEngine>) {
        let provider = Arc::new(MapProvider::default());
        let engine = ImportEngine::new(Arc::clone(&provider) as Arc<dyn ExportProvider>);
        (provider, engine)
    }

    fn as_part(consumer: &Arc<Consumer>) -> Arc<dyn ComposablePart> {
        Arc::clone(consumer) as Arc<dyn ComposablePart>
    }

    // ========================================================================
    // Tests
    // ========================================================================

    #[test]
    fn test_satisfy_binds_and_composes() {
        let (provider, engine) = setup();
        provider.put("app.Port", 8080);
        let consumer = Consumer::new(vec![ImportDefinition::new("port", "app.Port")]);
        let part = as_part(&consumer);

        engine.satisfy_imports(&part).unwrap();
        assert_eq!(consumer.bound("port"), vec![8080]);
        assert_eq!(consumer.composed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.part_state(&part), Some(ImportState::Composed));
        assert_eq!(engine.tracked_part_count(), 1);
    }

    #[test]
    fn test_satisfy_once_does_not_track() {
        let (provider, engine) = setup();
        provider.put("app.Port", 1);
        let consumer = Consumer::new(vec![ImportDefinition::new("port", "app.Port")]);
        let part = as_part(&consumer);

        engine.satisfy_imports_once(&part).unwrap();
        assert_eq!(engine.part_state(&part), Some(ImportState::Composed));
        assert_eq!(engine.tracked_part_count(), 0);
    }

    #[test]
    fn test_cardinality_failure_reverts_pass() {
        let (_provider, engine) = setup();
        let consumer = Consumer::new(vec![ImportDefinition::new("port", "app.Port")]);
        let part = as_part(&consumer);

        let err = engine.satisfy_imports(&part).unwrap_err();
        assert!(!err.is_change_rejected());
        assert_eq!(err.errors()[0].kind(), ErrorKind::CardinalityMismatch);
        assert_eq!(
            engine.part_state(&part),
            Some(ImportState::PreExportImportsSatisfied)
        );
        assert_eq!(engine.tracked_part_count(), 0);
    }

    #[test]
    fn test_every_failing_import_is_reported() {
        let (_provider, engine) = setup();
        let consumer = Consumer::new(vec![
            ImportDefinition::new("a", "app.A"),
            ImportDefinition::new("b", "app.B"),
            ImportDefinition::new("c", "app.C").with_cardinality(Cardinality::ZeroOrMore),
        ]);
        let err = engine.satisfy_imports(&as_part(&consumer)).unwrap_err();
        assert_eq!(err.errors().len(), 2);
    }

    #[test]
    fn test_recompose_without_transaction() {
        let (provider, engine) = setup();
        provider.put("app.Level", 1);
        let consumer = Consumer::new(vec![ImportDefinition::new("level", "app.Level").recomposable()]);
        let part = as_part(&consumer);
        engine.satisfy_imports(&part).unwrap();

        provider.replace("app.Level", 2);
        let event = ExportsChangeEvent::new(vec![ExportDefinition::new("app.Level")], Vec::new(), None);
        engine.on_exports_changing(&event).unwrap();

        assert_eq!(consumer.bound("level"), vec![2]);
        assert_eq!(consumer.composed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recompose_invalid_state() {
        let (provider, engine) = setup();
        provider.put("app.Level", 1);
        let consumer = Consumer::new(vec![ImportDefinition::new("level", "app.Level").recomposable()]);
        let part = as_part(&consumer);
        engine.satisfy_imports(&part).unwrap();

        let manager = engine.lock.read_state().get(&part).unwrap();
        manager.set_state(ImportState::PostExportImportsSatisfied);

        let event = ExportsChangeEvent::new(vec![ExportDefinition::new("app.Level")], Vec::new(), None);
        let err = engine.on_exports_changing(&event).unwrap_err();
        assert!(!err.is_change_rejected());
        assert_eq!(err.errors()[0].kind(), ErrorKind::InvalidStateForRecomposition);
    }

    #[test]
    fn test_invalid_state_reported_for_unaffected_part() {
        let (provider, engine) = setup();
        provider.put("app.Level", 1);
        let consumer = Consumer::new(vec![ImportDefinition::new("level", "app.Level")
            .recomposable()
            .require_metadata("scope")]);
        let part = as_part(&consumer);
        engine.satisfy_imports(&part).unwrap();

        let manager = engine.lock.read_state().get(&part).unwrap();
        manager.set_state(ImportState::PostExportImportsSatisfied);

        // indexed under the contract, but no import matches the untagged export
        let event = ExportsChangeEvent::new(vec![ExportDefinition::new("app.Level")], Vec::new(), None);
        let err = engine.on_exports_changing(&event).unwrap_err();
        assert!(!err.is_change_rejected());
        assert_eq!(err.errors()[0].kind(), ErrorKind::InvalidStateForRecomposition);
    }

    #[test]
    fn test_unrelated_metadata_does_not_recompose() {
        let (provider, engine) = setup();
        provider.put("app.Level", 1);
        let consumer = Consumer::new(vec![ImportDefinition::new("level", "app.Level")
            .recomposable()
            .require_metadata("scope")]);
        let part = as_part(&consumer);
        // metadata is ignored by this provider, so the import binds
        engine.satisfy_imports(&part).unwrap();
        let queries = provider.queries.load(Ordering::SeqCst);

        let event = ExportsChangeEvent::new(vec![ExportDefinition::new("app.Level")], Vec::new(), None);
        engine.on_exports_changing(&event).unwrap();
        assert_eq!(provider.queries.load(Ordering::SeqCst), queries);
        assert_eq!(consumer.composed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_part_is_skipped_and_untracked() {
        let (provider, engine) = setup();
        provider.put("app.Level", 1);
        let consumer = Consumer::new(vec![ImportDefinition::new("level", "app.Level").recomposable()]);
        let part = as_part(&consumer);
        engine.satisfy_imports(&part).unwrap();
        assert_eq!(engine.tracked_part_count(), 1);

        drop(part);
        drop(consumer);
        let event = ExportsChangeEvent::new(vec![ExportDefinition::new("app.Level")], Vec::new(), None);
        engine.on_exports_changing(&event).unwrap();
        assert_eq!(engine.tracked_part_count(), 0);
        assert_eq!(engine.recomposition.indexed_part_count(), 0);
    }

    #[test]
    fn test_release_cycles_keep_index_queue_bounded() {
        let (provider, engine) = setup();
        provider.put("app.Port", 1);
        let consumer = Consumer::new(vec![ImportDefinition::new("port", "app.Port")]);
        let part = as_part(&consumer);

        engine.satisfy_imports(&part).unwrap();
        let first = Arc::downgrade(&engine.lock.read_state().get(&part).unwrap());
        engine.release_imports(&part, None).unwrap();

        for _ in 0..1000 {
            engine.satisfy_imports(&part).unwrap();
            engine.release_imports(&part, None).unwrap();
            assert!(engine.recomposition.pending_change_count() < FOLD_THRESHOLD);
        }

        assert!(first.upgrade().is_none());
        assert_eq!(engine.recomposition.indexed_part_count(), 0);
        assert_eq!(consumer.composed.load(Ordering::SeqCst), 1001);
    }

    /// Reads engine state from its own metadata accessors
    struct Introspective {
        engine: Weak<ImportEngine>,
        reads: AtomicUsize,
    }

    impl Introspective {
        fn observe(&self) {
            if let Some(engine) = self.engine.upgrade() {
                engine.registered_part_count();
                self.reads.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    impl ComposablePart for Introspective {
        fn display_name(&self) -> String {
            self.observe();
            "Introspective".to_string()
        }
        fn import_definitions(&self) -> Vec<ImportDefinition> {
            self.observe();
            vec![ImportDefinition::new("port", "app.Port")]
        }
        fn export_definitions(&self) -> Vec<ExportDefinition> {
            Vec::new()
        }
        fn set_import(&self, _import: &ImportDefinition, _exports: Vec<Export>) -> Result<(), PartError> {
            Ok(())
        }
        fn on_composed(&self) -> Result<(), PartError> {
            Ok(())
        }
    }

    #[test]
    fn test_part_may_query_engine_while_registered() {
        let (provider, engine) = setup();
        provider.put("app.Port", 1);
        let introspective = Arc::new(Introspective {
            engine: Arc::downgrade(&engine),
            reads: AtomicUsize::new(0),
        });
        let part = Arc::clone(&introspective) as Arc<dyn ComposablePart>;

        engine.satisfy_imports(&part).unwrap();
        assert!(introspective.reads.load(Ordering::SeqCst) >= 2);
        assert_eq!(engine.part_state(&part), Some(ImportState::Composed));
        assert_eq!(engine.registered_part_count(), 1);
    }

    #[test]
    fn test_engine_subscribes_and_unsubscribes() {
        let (provider, engine) = setup();
        assert_eq!(provider.listeners.len(), 1);
        engine.dispose();
        assert!(provider.listeners.is_empty());
        assert!(engine.is_disposed());
    }

    #[test]
    fn test_drop_disposes() {
        let (provider, engine) = setup();
        drop(engine);
        assert!(provider.listeners.is_empty());
    }
}
