//! Concurrency layer for Composer
//!
//! This crate provides the two primitives the engine builds its
//! transactional envelope from:
//! - CompositionLock: state RwLock plus a re-entrant composition-wide lock,
//!   with a no-op mode for single-threaded hosts
//! - AtomicComposition: a nestable transaction scope with ordered commit and
//!   revert actions and an owner-keyed value slot

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod atomic_composition;
pub mod lock;

pub use atomic_composition::AtomicComposition;
pub use lock::{CompositionLock, CompositionLockHolder};
