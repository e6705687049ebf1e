//! Error types for Composer
//!
//! Three layers:
//! - [`CompositionError`]: one failure of one part/import, as produced inside
//!   the engine.
//! - [`CompositionResult`]: an accumulator of composition errors. A pass over
//!   a set of imports merges every failure instead of stopping at the first.
//! - [`ComposeError`]: what a caller sees. A non-transactional call fails with
//!   `Composition`; a call running inside a transaction fails with
//!   `ChangeRejected`, meaning the transaction will be rolled back and nothing
//!   observable changed.
//!
//! [`PartError`] and [`ProviderError`] are the error types of the two external
//! collaborators (parts and export providers). They are preserved as the
//! `source` of the composition error that wraps them.

use crate::definition::{Cardinality, ImportDefinition};
use crate::state::ImportState;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for caller-facing operations
pub type ComposeResult<T> = std::result::Result<T, ComposeError>;

/// Shared, clonable error cause
pub type SharedCause = Arc<dyn StdError + Send + Sync>;

/// Discriminant of a composition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A cycle closed through a prerequisite import
    CycleDetected,
    /// The provider found the wrong number of exports
    CardinalityMismatch,
    /// Nested composition exceeded the configured depth
    TooManyIterations,
    /// A part was not in a state that allows recomposition
    InvalidStateForRecomposition,
    /// A non-recomposable import of a composed part would change
    NonRecomposableImportChanged,
    /// Setting an import or running the composed callback failed
    ExportOrNotifyFailed,
    /// The engine has been disposed
    ObjectDisposed,
}

/// A single composition failure
#[derive(Debug, Clone, Error)]
pub enum CompositionError {
    /// A cycle closed through a prerequisite import
    #[error("part '{part}' is part of a cycle that crosses a prerequisite import")]
    CycleDetected {
        /// Part that was re-entered
        part: String,
    },

    /// The provider found the wrong number of exports for an import
    #[error(
        "import '{import}' of part '{part}' expects {cardinality} export(s) of contract '{contract_name}', found {found}"
    )]
    CardinalityMismatch {
        /// Importing part
        part: String,
        /// Importing member
        import: String,
        /// Contract name of the import
        contract_name: String,
        /// Declared cardinality
        cardinality: Cardinality,
        /// Number of matching exports
        found: usize,
    },

    /// Nested composition exceeded the configured depth
    #[error("composing part '{part}' exceeded the limit of {limit} nested iterations")]
    TooManyIterations {
        /// Part whose composition was refused
        part: String,
        /// Configured limit
        limit: usize,
    },

    /// A part was not in a state that allows recomposition
    #[error("part '{part}' cannot be recomposed in state {state}")]
    InvalidStateForRecomposition {
        /// Affected part
        part: String,
        /// State it was found in
        state: ImportState,
    },

    /// A non-recomposable import of a composed part would change
    #[error("import '{import}' of composed part '{part}' is not recomposable")]
    NonRecomposableImportChanged {
        /// Affected part
        part: String,
        /// Importing member
        import: String,
    },

    /// Setting an import, querying the provider, or notifying the part failed
    #[error("part '{part}' failed {}: {source}", stage(.import))]
    ExportOrNotifyFailed {
        /// Affected part
        part: String,
        /// Importing member, `None` when the composed callback failed
        import: Option<String>,
        /// Original cause
        #[source]
        source: SharedCause,
    },
}

fn stage(import: &Option<String>) -> String {
    match import {
        Some(member) => format!("to set import '{}'", member),
        None => "its composed notification".to_string(),
    }
}

impl CompositionError {
    /// Cycle through a prerequisite import
    pub fn cycle_detected(part: &str) -> Self {
        CompositionError::CycleDetected {
            part: part.to_string(),
        }
    }

    /// Wrong number of exports for `import`
    pub fn cardinality_mismatch(part: &str, import: &ImportDefinition, found: usize) -> Self {
        CompositionError::CardinalityMismatch {
            part: part.to_string(),
            import: import.member().to_string(),
            contract_name: import.contract_name().to_string(),
            cardinality: import.cardinality(),
            found,
        }
    }

    /// Depth limit reached
    pub fn too_many_iterations(part: &str, limit: usize) -> Self {
        CompositionError::TooManyIterations {
            part: part.to_string(),
            limit,
        }
    }

    /// Recomposition attempted in a state other than previewed or composed
    pub fn invalid_state_for_recomposition(part: &str, state: ImportState) -> Self {
        CompositionError::InvalidStateForRecomposition {
            part: part.to_string(),
            state,
        }
    }

    /// A non-recomposable import of a composed part would change
    pub fn non_recomposable_import_changed(part: &str, import: &ImportDefinition) -> Self {
        CompositionError::NonRecomposableImportChanged {
            part: part.to_string(),
            import: import.member().to_string(),
        }
    }

    /// Setting `import` or querying its exports failed
    pub fn import_failed<E>(part: &str, import: &ImportDefinition, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CompositionError::ExportOrNotifyFailed {
            part: part.to_string(),
            import: Some(import.member().to_string()),
            source: Arc::new(cause),
        }
    }

    /// The composed callback failed
    pub fn notify_failed<E>(part: &str, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CompositionError::ExportOrNotifyFailed {
            part: part.to_string(),
            import: None,
            source: Arc::new(cause),
        }
    }

    /// Discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompositionError::CycleDetected { .. } => ErrorKind::CycleDetected,
            CompositionError::CardinalityMismatch { .. } => ErrorKind::CardinalityMismatch,
            CompositionError::TooManyIterations { .. } => ErrorKind::TooManyIterations,
            CompositionError::InvalidStateForRecomposition { .. } => {
                ErrorKind::InvalidStateForRecomposition
            }
            CompositionError::NonRecomposableImportChanged { .. } => {
                ErrorKind::NonRecomposableImportChanged
            }
            CompositionError::ExportOrNotifyFailed { .. } => ErrorKind::ExportOrNotifyFailed,
        }
    }

    /// Name of the part the error is about
    pub fn part(&self) -> &str {
        match self {
            CompositionError::CycleDetected { part }
            | CompositionError::CardinalityMismatch { part, .. }
            | CompositionError::TooManyIterations { part, .. }
            | CompositionError::InvalidStateForRecomposition { part, .. }
            | CompositionError::NonRecomposableImportChanged { part, .. }
            | CompositionError::ExportOrNotifyFailed { part, .. } => part,
        }
    }

    /// Whether this error, or any composition failure nested in its cause
    /// chain, has the given kind
    ///
    /// Nested failures appear when a part's import triggers composition of
    /// another part and reports that failure through [`PartError::Composition`].
    pub fn contains_kind(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        let CompositionError::ExportOrNotifyFailed { source, .. } = self else {
            return false;
        };
        let root: &(dyn StdError + 'static) = &**source;
        let mut cause = Some(root);
        while let Some(err) = cause {
            if let Some(PartError::Composition(inner)) = err.downcast_ref::<PartError>() {
                if inner.contains_kind(kind) {
                    return true;
                }
            }
            if let Some(inner) = err.downcast_ref::<ComposeError>() {
                if inner.contains_kind(kind) {
                    return true;
                }
            }
            cause = err.source();
        }
        false
    }
}

/// Accumulator of composition errors
///
/// Starts out successful; every merged error is kept so a single pass can
/// report all of its failures.
#[derive(Debug, Clone, Default)]
#[must_use = "composition errors must be merged or surfaced"]
pub struct CompositionResult {
    errors: Vec<CompositionError>,
}

impl CompositionResult {
    /// A successful result
    pub fn ok() -> Self {
        Self { errors: Vec::new() }
    }

    /// A result holding one error
    pub fn from_error(error: CompositionError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    /// Check if no error was recorded
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: CompositionResult) {
        self.errors.extend(other.errors);
    }

    /// Record one error
    pub fn merge_error(&mut self, error: CompositionError) {
        self.errors.push(error);
    }

    /// Recorded errors
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Consume into the recorded errors
    pub fn into_errors(self) -> Vec<CompositionError> {
        self.errors
    }

    /// Surface the result to a caller
    ///
    /// `transactional` selects between the terminal `Composition` failure and
    /// the `ChangeRejected` failure of a call made inside a transaction.
    pub fn into_result(self, transactional: bool) -> ComposeResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else if transactional {
            Err(ComposeError::ChangeRejected {
                errors: self.errors,
            })
        } else {
            Err(ComposeError::Composition {
                errors: self.errors,
            })
        }
    }
}

impl From<CompositionError> for CompositionResult {
    fn from(error: CompositionError) -> Self {
        CompositionResult::from_error(error)
    }
}

/// Caller-facing failure of an engine operation
#[derive(Debug, Clone, Error)]
pub enum ComposeError {
    /// Terminal failure of a call made without a transaction
    #[error("composition failed with {} error(s): {}", .errors.len(), join_errors(.errors))]
    Composition {
        /// Every failure of the call
        errors: Vec<CompositionError>,
    },

    /// Failure inside a transaction; the transaction must be rolled back and
    /// the prior state is preserved
    #[error("change rejected with {} error(s): {}", .errors.len(), join_errors(.errors))]
    ChangeRejected {
        /// Every failure of the call
        errors: Vec<CompositionError>,
    },

    /// The engine has been disposed
    #[error("the import engine has been disposed")]
    ObjectDisposed,
}

fn join_errors(errors: &[CompositionError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ComposeError {
    /// Composition errors carried by this failure (empty for `ObjectDisposed`)
    pub fn errors(&self) -> &[CompositionError] {
        match self {
            ComposeError::Composition { errors } | ComposeError::ChangeRejected { errors } => {
                errors
            }
            ComposeError::ObjectDisposed => &[],
        }
    }

    /// Whether this is a rejected transactional change
    pub fn is_change_rejected(&self) -> bool {
        matches!(self, ComposeError::ChangeRejected { .. })
    }

    /// Whether the engine was disposed
    pub fn is_disposed(&self) -> bool {
        matches!(self, ComposeError::ObjectDisposed)
    }

    /// Whether any carried error, directly or nested, has the given kind
    pub fn contains_kind(&self, kind: ErrorKind) -> bool {
        match self {
            ComposeError::ObjectDisposed => kind == ErrorKind::ObjectDisposed,
            _ => self.errors().iter().any(|e| e.contains_kind(kind)),
        }
    }
}

/// Failure reported by a part
#[derive(Debug, Clone, Error)]
pub enum PartError {
    /// Generic failure with a message
    #[error("{message}")]
    Failed {
        /// Description of the failure
        message: String,
    },

    /// Composing a dependency of the part failed
    #[error("dependency composition failed: {0}")]
    Composition(#[source] Box<ComposeError>),

    /// An exported value was not of the requested type
    #[error("exported value is not a {expected}")]
    TypeMismatch {
        /// Requested type name
        expected: &'static str,
    },
}

impl PartError {
    /// Generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        PartError::Failed {
            message: message.into(),
        }
    }
}

impl From<ComposeError> for PartError {
    fn from(e: ComposeError) -> Self {
        PartError::Composition(Box::new(e))
    }
}

/// Failure reported by an export provider
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The number of matching exports violates the import's cardinality
    #[error("expected {cardinality} export(s) of contract '{contract_name}', found {found}")]
    CardinalityMismatch {
        /// Contract name queried
        contract_name: String,
        /// Cardinality of the import
        cardinality: Cardinality,
        /// Number of matching exports
        found: usize,
    },

    /// Any other provider failure
    #[error("export provider failed: {message}")]
    Failed {
        /// Description of the failure
        message: String,
    },
}

impl ProviderError {
    /// Cardinality violation for `import`
    pub fn cardinality_mismatch(import: &ImportDefinition, found: usize) -> Self {
        ProviderError::CardinalityMismatch {
            contract_name: import.contract_name().to_string(),
            cardinality: import.cardinality(),
            found,
        }
    }
}
