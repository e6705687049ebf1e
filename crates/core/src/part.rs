//! Composable part trait
//!
//! A part is owned by its creator; the engine only ever holds it weakly and
//! drives it through this trait. Implementations use interior mutability since
//! parts are shared across threads as `Arc<dyn ComposablePart>`.

use crate::definition::{ExportDefinition, ImportDefinition};
use crate::error::PartError;
use crate::export::Export;

/// A composable unit declaring imports and exports
///
/// # Thread Safety
///
/// The engine serializes all calls it makes into parts under its composition
/// lock, but parts may also be touched by their owners concurrently, so the
/// trait requires `Send + Sync`.
pub trait ComposablePart: Send + Sync {
    /// Human readable name used in errors and logs
    fn display_name(&self) -> String;

    /// Ordered import definitions
    ///
    /// Read once when the engine first sees the part; must not change
    /// afterwards.
    fn import_definitions(&self) -> Vec<ImportDefinition>;

    /// Export definitions
    fn export_definitions(&self) -> Vec<ExportDefinition>;

    /// Bind `exports` to `import`
    ///
    /// Called once per import during composition and again for recomposable
    /// imports whenever their exports change.
    ///
    /// # Errors
    ///
    /// Returns an error if the part cannot accept the exports (for example
    /// because creating an exported value failed).
    fn set_import(&self, import: &ImportDefinition, exports: Vec<Export>) -> Result<(), PartError>;

    /// Called once all imports are set, and again after a recomposition
    /// changed any of them
    ///
    /// # Errors
    ///
    /// Returns an error if the part cannot complete its activation.
    fn on_composed(&self) -> Result<(), PartError>;
}
