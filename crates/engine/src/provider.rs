//! Export provider interface
//!
//! The provider is the engine's only source of exports. It answers
//! per-import queries and announces pool changes *before* they become
//! durable, so listeners can veto a change by returning an error.
//!
//! A provider that wants its change to be vetoable runs the notification
//! inside an [`AtomicComposition`]: while notifying, `get_exports` called with
//! that transaction must already reflect the new pool; the provider commits
//! its pool change from a commit action.

use composer_concurrency::AtomicComposition;
use composer_core::{ComposeResult, Export, ExportDefinition, ImportDefinition, ProviderError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Source of exports
pub trait ExportProvider: Send + Sync {
    /// Exports matching `import`'s constraint
    ///
    /// Inside a transaction the answer reflects changes pending in that
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::CardinalityMismatch`] when the number of
    /// matching exports violates the import's cardinality.
    fn get_exports(
        &self,
        import: &ImportDefinition,
        atomic: Option<&AtomicComposition<'_>>,
    ) -> Result<Vec<Export>, ProviderError>;

    /// Register a listener for change notifications
    ///
    /// The provider holds the listener weakly; a dropped listener is skipped.
    fn subscribe(&self, listener: Weak<dyn ExportsChangingListener>) -> SubscriptionId;

    /// Remove a listener; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Receiver of "exports changing" notifications
pub trait ExportsChangingListener: Send + Sync {
    /// Called before a change to the export pool becomes durable
    ///
    /// # Errors
    ///
    /// An error vetoes the change.
    fn on_exports_changing(&self, event: &ExportsChangeEvent<'_>) -> ComposeResult<()>;
}

/// Handle returned by [`ExportProvider::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A pending change to the export pool
pub struct ExportsChangeEvent<'a> {
    added_exports: Vec<ExportDefinition>,
    removed_exports: Vec<ExportDefinition>,
    atomic_composition: Option<&'a AtomicComposition<'a>>,
}

impl<'a> ExportsChangeEvent<'a> {
    /// Describe a change
    pub fn new(
        added_exports: Vec<ExportDefinition>,
        removed_exports: Vec<ExportDefinition>,
        atomic_composition: Option<&'a AtomicComposition<'a>>,
    ) -> Self {
        Self {
            added_exports,
            removed_exports,
            atomic_composition,
        }
    }

    /// Exports about to appear
    pub fn added_exports(&self) -> &[ExportDefinition] {
        &self.added_exports
    }

    /// Exports about to disappear
    pub fn removed_exports(&self) -> &[ExportDefinition] {
        &self.removed_exports
    }

    /// Added and removed exports together
    pub fn changed_exports(&self) -> impl Iterator<Item = &ExportDefinition> {
        self.added_exports.iter().chain(self.removed_exports.iter())
    }

    /// Distinct contract names touched by the change, sorted
    pub fn changed_contract_names(&self) -> Vec<String> {
        self.changed_exports()
            .map(|export| export.contract_name().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Transaction the change runs in, if any
    pub fn atomic_composition(&self) -> Option<&'a AtomicComposition<'a>> {
        self.atomic_composition
    }
}

impl fmt::Debug for ExportsChangeEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportsChangeEvent")
            .field("added_exports", &self.added_exports)
            .field("removed_exports", &self.removed_exports)
            .field("transactional", &self.atomic_composition.is_some())
            .finish()
    }
}

// ============================================================================
// ListenerSet
// ============================================================================

/// Subscription bookkeeping for provider implementations
///
/// Listeners are notified in subscription order; the first error stops the
/// notification and is returned.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Weak<dyn ExportsChangingListener>)>>,
}

impl ListenerSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener
    pub fn subscribe(&self, listener: Weak<dyn ExportsChangingListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }

    /// Number of live listeners
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|(_, listener)| listener.strong_count() > 0)
            .count()
    }

    /// Check if no live listener remains
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every live listener
    ///
    /// Dead listeners are dropped. The set is not locked while listeners run,
    /// so a listener may subscribe or unsubscribe from its callback.
    ///
    /// # Errors
    ///
    /// Returns the first listener error.
    pub fn notify(&self, event: &ExportsChangeEvent<'_>) -> ComposeResult<()> {
        let live: Vec<Arc<dyn ExportsChangingListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|(_, listener)| listener.strong_count() > 0);
            listeners
                .iter()
                .filter_map(|(_, listener)| listener.upgrade())
                .collect()
        };
        for listener in live {
            listener.on_exports_changing(event)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
