//! Import engine for Composer
//!
//! This crate resolves part imports and keeps them current:
//! - ImportEngine: preview/satisfy/release and change notifications
//! - PartManager: per-part state, saved imports, bound disposables
//! - RecompositionManager: contract name to interested parts
//! - ExportProvider: the trait export sources implement
//! - EngineConfig: tuning knobs, loadable from `composer.toml`
//!
//! The engine is the only component that knows about:
//! - The satisfaction state machine and cycle rules
//! - Per-transaction shadow tracking
//! - Recomposition

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod config;
pub mod engine;
mod engine_context;
pub mod part_manager;
pub mod provider;
pub mod recomposition;
pub mod registry;
pub mod state_machine;

pub use builder::ImportEngineBuilder;
pub use config::{ConfigError, EngineConfig, CONFIG_FILE_NAME, DEFAULT_MAX_COMPOSITION_DEPTH};
pub use engine::ImportEngine;
pub use part_manager::PartManager;
pub use provider::{
    ExportProvider, ExportsChangeEvent, ExportsChangingListener, ListenerSet, SubscriptionId,
};
pub use recomposition::RecompositionManager;
pub use state_machine::{next_step, Step};
