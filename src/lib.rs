//! Composer - transactional import/export composition for plugin hosts
//!
//! Parts declare imports (what they need) and exports (what they offer). An
//! [`ImportEngine`] binds imports to exports supplied by an
//! [`ExportProvider`], composes parts that need each other, and rebinds
//! recomposable imports when the provider's export pool changes.
//!
//! # Quick Start
//!
//! ```ignore
//! use composer::{AtomicComposition, ImportEngine};
//!
//! let engine = ImportEngine::new(provider);
//!
//! // Bind everything and activate the part
//! engine.satisfy_imports(&part)?;
//!
//! // Check a batch of parts all-or-nothing
//! let txn = AtomicComposition::new();
//! for candidate in &candidates {
//!     engine.preview_imports(candidate, Some(&txn))?;
//! }
//! txn.complete()?;
//! ```
//!
//! # Architecture
//!
//! - `composer-core`: definitions, parts, exports, states and errors
//! - `composer-concurrency`: the composition lock and atomic composition
//!   scopes
//! - `composer-engine`: the import engine, part managers and the
//!   recomposition index

pub use composer_concurrency::{AtomicComposition, CompositionLock, CompositionLockHolder};
pub use composer_core::*;
pub use composer_engine::{
    EngineConfig, ExportProvider, ExportsChangeEvent, ExportsChangingListener, ImportEngine,
    ImportEngineBuilder, ListenerSet, SubscriptionId,
};
