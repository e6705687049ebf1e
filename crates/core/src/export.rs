//! Exports
//!
//! An [`Export`] pairs an [`ExportDefinition`] with a factory for the exported
//! value. The value is created on first access and cached, so a part that
//! never touches an import never forces its creation. Exports are cheap to
//! clone; clones share the cached value.
//!
//! An export may carry a [`Disposable`] resource. The engine tracks the
//! disposables of every export bound to a part and disposes them when the
//! binding is replaced or the part is released.

use crate::definition::ExportDefinition;
use crate::error::PartError;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Type-erased exported value
pub type ExportedValue = Arc<dyn Any + Send + Sync>;

type ValueFactory = dyn Fn() -> Result<ExportedValue, PartError> + Send + Sync;

/// Resource released when the import binding that owns it goes away
pub trait Disposable: Send + Sync {
    /// Release the resource
    fn dispose(&self);
}

/// An export: definition plus lazily created value
#[derive(Clone)]
pub struct Export {
    inner: Arc<ExportInner>,
}

struct ExportInner {
    definition: ExportDefinition,
    factory: Box<ValueFactory>,
    value: OnceCell<ExportedValue>,
    disposable: Option<Arc<dyn Disposable>>,
}

impl Export {
    /// Create an export whose value is produced by `factory` on first access
    pub fn new<F>(definition: ExportDefinition, factory: F) -> Self
    where
        F: Fn() -> Result<ExportedValue, PartError> + Send + Sync + 'static,
    {
        Self::build(definition, Box::new(factory), None)
    }

    /// Create an export of an already existing value
    pub fn from_value<T>(definition: ExportDefinition, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let value: ExportedValue = Arc::new(value);
        Self::new(definition, move || Ok(Arc::clone(&value)))
    }

    /// Create an export that owns a disposable resource
    pub fn with_disposable<F>(
        definition: ExportDefinition,
        factory: F,
        disposable: Arc<dyn Disposable>,
    ) -> Self
    where
        F: Fn() -> Result<ExportedValue, PartError> + Send + Sync + 'static,
    {
        Self::build(definition, Box::new(factory), Some(disposable))
    }

    fn build(
        definition: ExportDefinition,
        factory: Box<ValueFactory>,
        disposable: Option<Arc<dyn Disposable>>,
    ) -> Self {
        Self {
            inner: Arc::new(ExportInner {
                definition,
                factory,
                value: OnceCell::new(),
                disposable,
            }),
        }
    }

    /// Export definition
    pub fn definition(&self) -> &ExportDefinition {
        &self.inner.definition
    }

    /// Get the exported value, creating it on first access
    ///
    /// A failed creation is not cached; the next access retries.
    pub fn value(&self) -> Result<ExportedValue, PartError> {
        self.inner
            .value
            .get_or_try_init(|| (self.inner.factory)())
            .map(Arc::clone)
    }

    /// Get the exported value downcast to `T`
    pub fn value_as<T>(&self) -> Result<Arc<T>, PartError>
    where
        T: Any + Send + Sync,
    {
        self.value()?
            .downcast::<T>()
            .map_err(|_| PartError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Whether the value has been created
    pub fn is_value_created(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// Disposable resource owned by this export
    pub fn disposable(&self) -> Option<&Arc<dyn Disposable>> {
        self.inner.disposable.as_ref()
    }

    /// Whether both handles refer to the same export
    pub fn ptr_eq(&self, other: &Export) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Export")
            .field("definition", &self.inner.definition)
            .field("value_created", &self.is_value_created())
            .field("disposable", &self.inner.disposable.is_some())
            .finish()
    }
}
