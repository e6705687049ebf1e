//! Core types and traits for Composer
//!
//! This crate defines the foundational types shared by the concurrency and
//! engine layers:
//! - ImportDefinition / ExportDefinition: immutable contract descriptors
//! - Cardinality: how many exports an import accepts
//! - Export: a definition plus a lazily created value
//! - ComposablePart: the trait a part implements to receive its imports
//! - ImportState: the per-part satisfaction state
//! - Error: CompositionError, CompositionResult, ComposeError hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod definition;
pub mod error;
pub mod export;
pub mod part;
pub mod state;

pub use definition::{Cardinality, ExportDefinition, ImportDefinition};
pub use error::{
    ComposeError, ComposeResult, CompositionError, CompositionResult, ErrorKind, PartError,
    ProviderError,
};
pub use export::{Disposable, Export, ExportedValue};
pub use part::ComposablePart;
pub use state::ImportState;
