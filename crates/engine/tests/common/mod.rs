//! Shared test doubles for engine integration tests
//!
//! - TestProvider: in-memory export pool whose changes are vetoable by
//!   listeners, staged in a transaction the way a catalog would stage them
//! - TestPart: a part that records what it was bound to
//! - composing_export: an export whose value satisfies its exporting part

#![allow(dead_code)]

use composer_concurrency::AtomicComposition;
use composer_core::{
    ComposablePart, ComposeResult, Disposable, Export, ExportDefinition, ExportedValue,
    ImportDefinition, PartError, ProviderError,
};
use composer_engine::{
    ExportProvider, ExportsChangeEvent, ExportsChangingListener, ImportEngine, ListenerSet,
    SubscriptionId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

// ============================================================================
// TestProvider
// ============================================================================

/// Pool contents pending in a transaction
struct PendingPool(Vec<Export>);

/// In-memory export provider
pub struct TestProvider {
    id: Uuid,
    pool: Arc<Mutex<Vec<Export>>>,
    listeners: ListenerSet,
    queries: AtomicUsize,
}

impl TestProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            pool: Arc::new(Mutex::new(Vec::new())),
            listeners: ListenerSet::new(),
            queries: AtomicUsize::new(0),
        })
    }

    /// Add exports without notifying anyone
    pub fn seed(&self, exports: impl IntoIterator<Item = Export>) {
        self.pool.lock().extend(exports);
    }

    /// Add one export, notifying listeners first
    pub fn publish(&self, export: Export) -> ComposeResult<()> {
        self.change(vec![export], Vec::new(), None)
    }

    /// Swap `old` for `new`, notifying listeners first
    pub fn replace(&self, old: &Export, new: Export) -> ComposeResult<()> {
        self.change(vec![new], vec![old.clone()], None)
    }

    /// Apply a change
    ///
    /// The change is staged in a scope nested in `outer` (or a fresh one),
    /// listeners are notified with that scope, and the pool is updated by a
    /// commit action. A listener error drops the scope and leaves the pool
    /// untouched.
    pub fn change(
        &self,
        added: Vec<Export>,
        removed: Vec<Export>,
        outer: Option<&AtomicComposition<'_>>,
    ) -> ComposeResult<()> {
        let scope = match outer {
            Some(outer) => AtomicComposition::nested(outer),
            None => AtomicComposition::new(),
        };

        let mut next = self.visible_pool(outer);
        next.retain(|export| !removed.iter().any(|r| r.ptr_eq(export)));
        next.extend(added.iter().cloned());
        scope.set_value(self.id, Arc::new(PendingPool(next.clone())));

        {
            let event = ExportsChangeEvent::new(
                added.iter().map(|e| e.definition().clone()).collect(),
                removed.iter().map(|e| e.definition().clone()).collect(),
                Some(&scope),
            );
            self.listeners.notify(&event)?;
        }

        let pool = Arc::clone(&self.pool);
        scope.add_commit_action(move || {
            *pool.lock() = next;
            Ok(())
        });
        scope.complete()
    }

    fn visible_pool(&self, atomic: Option<&AtomicComposition<'_>>) -> Vec<Export> {
        atomic
            .and_then(|atomic| atomic.try_get_value::<PendingPool>(self.id, false))
            .map(|pending| pending.0.clone())
            .unwrap_or_else(|| self.pool.lock().clone())
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn pool_len(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn contains(&self, export: &Export) -> bool {
        self.pool.lock().iter().any(|e| e.ptr_eq(export))
    }
}

impl ExportProvider for TestProvider {
    fn get_exports(
        &self,
        import: &ImportDefinition,
        atomic: Option<&AtomicComposition<'_>>,
    ) -> Result<Vec<Export>, ProviderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let matching: Vec<Export> = self
            .visible_pool(atomic)
            .into_iter()
            .filter(|export| import.is_constraint_satisfied_by(export.definition()))
            .collect();
        if !import.cardinality().accepts(matching.len()) {
            return Err(ProviderError::cardinality_mismatch(import, matching.len()));
        }
        Ok(matching)
    }

    fn subscribe(&self, listener: Weak<dyn ExportsChangingListener>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.unsubscribe(id);
    }
}

pub fn engine_for(provider: &Arc<TestProvider>) -> Arc<ImportEngine> {
    ImportEngine::new(Arc::clone(provider) as Arc<dyn ExportProvider>)
}

// ============================================================================
// TestPart
// ============================================================================

/// A part that records its bindings
pub struct TestPart {
    name: String,
    imports: Vec<ImportDefinition>,
    exports: Vec<ExportDefinition>,
    eager: bool,
    bindings: Mutex<HashMap<String, Vec<Export>>>,
    binding_order: Mutex<Vec<String>>,
    composed: AtomicUsize,
    fail_on_composed: AtomicBool,
}

impl TestPart {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            imports: Vec::new(),
            exports: Vec::new(),
            eager: false,
            bindings: Mutex::new(HashMap::new()),
            binding_order: Mutex::new(Vec::new()),
            composed: AtomicUsize::new(0),
            fail_on_composed: AtomicBool::new(false),
        }
    }

    pub fn import(mut self, import: ImportDefinition) -> Self {
        self.imports.push(import);
        self
    }

    pub fn export(mut self, contract: &str) -> Self {
        self.exports.push(ExportDefinition::new(contract));
        self
    }

    /// Create every bound value inside `set_import`
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn bound(&self, member: &str) -> Vec<Export> {
        self.bindings.lock().get(member).cloned().unwrap_or_default()
    }

    pub fn bound_values<T: Clone + Send + Sync + 'static>(&self, member: &str) -> Vec<T> {
        self.bound(member)
            .iter()
            .map(|export| (*export.value_as::<T>().unwrap()).clone())
            .collect()
    }

    pub fn binding_order(&self) -> Vec<String> {
        self.binding_order.lock().clone()
    }

    pub fn set_import_count(&self) -> usize {
        self.binding_order.lock().len()
    }

    pub fn composed_count(&self) -> usize {
        self.composed.load(Ordering::SeqCst)
    }

    pub fn fail_on_composed(&self, fail: bool) {
        self.fail_on_composed.store(fail, Ordering::SeqCst);
    }
}

impl ComposablePart for TestPart {
    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn import_definitions(&self) -> Vec<ImportDefinition> {
        self.imports.clone()
    }

    fn export_definitions(&self) -> Vec<ExportDefinition> {
        self.exports.clone()
    }

    fn set_import(&self, import: &ImportDefinition, exports: Vec<Export>) -> Result<(), PartError> {
        if self.eager {
            for export in &exports {
                export.value()?;
            }
        }
        self.binding_order.lock().push(import.member().to_string());
        self.bindings
            .lock()
            .insert(import.member().to_string(), exports);
        Ok(())
    }

    fn on_composed(&self) -> Result<(), PartError> {
        if self.fail_on_composed.load(Ordering::SeqCst) {
            return Err(PartError::failed(format!("{} refused activation", self.name)));
        }
        self.composed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// View a test part as the engine sees it
pub fn dyn_part(part: &Arc<TestPart>) -> Arc<dyn ComposablePart> {
    Arc::clone(part) as Arc<dyn ComposablePart>
}

// ============================================================================
// Exports
// ============================================================================

/// Export of a plain value
pub fn value_export<T: Send + Sync + 'static>(contract: &str, value: T) -> Export {
    Export::from_value(ExportDefinition::new(contract), value)
}

/// Export whose value is the exporting part's name, produced only after the
/// engine has satisfied that part
pub fn composing_export(
    engine: &Arc<ImportEngine>,
    part: &Arc<dyn ComposablePart>,
    contract: &str,
) -> Export {
    let engine = Arc::downgrade(engine);
    let exporter = Arc::downgrade(part);
    Export::new(ExportDefinition::new(contract), move || {
        let engine = engine
            .upgrade()
            .ok_or_else(|| PartError::failed("engine dropped"))?;
        let exporter = exporter
            .upgrade()
            .ok_or_else(|| PartError::failed("exporting part dropped"))?;
        engine.satisfy_imports(&exporter)?;
        Ok(Arc::new(exporter.display_name()) as ExportedValue)
    })
}

/// Disposable that counts how often it was disposed
#[derive(Default)]
pub struct DisposeCounter(AtomicUsize);

impl DisposeCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Disposable for DisposeCounter {
    fn dispose(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Export owning `counter`
pub fn disposable_export(contract: &str, value: u32, counter: &Arc<DisposeCounter>) -> Export {
    let disposable: Arc<dyn Disposable> = Arc::clone(counter) as Arc<dyn Disposable>;
    Export::with_disposable(
        ExportDefinition::new(contract),
        move || Ok(Arc::new(value) as ExportedValue),
        disposable,
    )
}
