//! Satisfaction state machine
//!
//! [`next_step`] maps a part's [`ImportState`] to what the satisfaction loop
//! does next. The loop itself lives in the engine, which owns the provider
//! and the parts; this module holds the pure parts: the transition function
//! and the recursion stack with its cycle predicate.
//!
//! ```text
//! NoImportsSatisfied ─┐
//! ImportsPreviewed  ──┴─► PreExportImportsSatisfying ─► PreExportImportsSatisfied
//!                                                         │
//!     PostExportImportsSatisfied ◄─ PostExportImportsSatisfying ◄┘
//!       │
//!       └─► ComposedNotifying ─► Composed
//! ```

use composer_core::{CompositionError, ImportDefinition, ImportState};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::part_manager::PartManager;

/// What the satisfaction loop does for a part in a given state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Satisfy prerequisite imports, ending in `PreExportImportsSatisfied`
    SatisfyPrerequisites,
    /// Satisfy the remaining imports, ending in `PostExportImportsSatisfied`
    SatisfyPostExport,
    /// Clear the saved imports and run the composed callback
    Notify,
    /// The part is already being satisfied further up the stack
    Reentered,
    /// The part is being previewed further up the stack
    ReenteredPreview,
    /// The part is running its composed callback further up the stack
    AlreadyNotifying,
    /// Nothing left to do
    Done,
}

/// Transition function of the satisfaction loop
pub fn next_step(state: ImportState) -> Step {
    match state {
        ImportState::NoImportsSatisfied | ImportState::ImportsPreviewed => {
            Step::SatisfyPrerequisites
        }
        ImportState::ImportsPreviewing => Step::ReenteredPreview,
        ImportState::PreExportImportsSatisfying | ImportState::PostExportImportsSatisfying => {
            Step::Reentered
        }
        ImportState::PreExportImportsSatisfied => Step::SatisfyPostExport,
        ImportState::PostExportImportsSatisfied => Step::Notify,
        ImportState::ComposedNotifying => Step::AlreadyNotifying,
        ImportState::Composed => Step::Done,
    }
}

/// Which imports a satisfaction pass covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSubset {
    /// `ExactlyOne` imports, checked by preview
    Preview,
    /// Prerequisite imports
    Prerequisite,
    /// Everything else
    PostExport,
}

impl ImportSubset {
    /// Whether `import` belongs to this subset
    pub fn contains(&self, import: &ImportDefinition) -> bool {
        match self {
            ImportSubset::Preview => {
                import.cardinality() == composer_core::Cardinality::ExactlyOne
            }
            ImportSubset::Prerequisite => import.is_prerequisite(),
            ImportSubset::PostExport => !import.is_prerequisite(),
        }
    }

    /// Imports of `manager` in this subset, in declaration order
    pub fn select(self, manager: &PartManager) -> Vec<ImportDefinition> {
        manager
            .imports()
            .iter()
            .filter(|import| self.contains(import))
            .cloned()
            .collect()
    }
}

// =============================================================================
// Recursion Stack
// =============================================================================

/// Part managers currently being satisfied, innermost last
///
/// Only the composition lock holder pushes frames.
#[derive(Debug)]
pub struct RecursionStack {
    max_depth: usize,
    frames: Mutex<SmallVec<[Arc<PartManager>; 10]>>,
}

impl RecursionStack {
    /// Create an empty stack allowing `max_depth` frames
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            frames: Mutex::new(SmallVec::new()),
        }
    }

    /// Push `manager`, failing with `TooManyIterations` at the depth cap
    ///
    /// The frame is popped when the returned guard drops.
    pub fn push(&self, manager: &Arc<PartManager>) -> Result<RecursionFrame<'_>, CompositionError> {
        let mut frames = self.frames.lock();
        if frames.len() >= self.max_depth {
            return Err(CompositionError::too_many_iterations(
                manager.name(),
                self.max_depth,
            ));
        }
        frames.push(Arc::clone(manager));
        Ok(RecursionFrame { stack: self })
    }

    /// Current depth
    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether the re-entry of the top frame closed an illegal cycle
    ///
    /// Walks down from just below the top to the earlier frame of the same
    /// part (inclusive). The cycle is illegal if any frame on the way is
    /// still satisfying prerequisites: those exports cannot exist yet.
    pub fn in_prerequisite_loop(&self) -> bool {
        let frames = self.frames.lock();
        let Some((top, below)) = frames.split_last() else {
            return false;
        };
        for frame in below.iter().rev() {
            if frame.state() == ImportState::PreExportImportsSatisfying {
                return true;
            }
            if Arc::ptr_eq(frame, top) {
                return false;
            }
        }
        false
    }
}

/// Guard for one recursion stack frame
#[derive(Debug)]
pub struct RecursionFrame<'a> {
    stack: &'a RecursionStack,
}

impl Drop for RecursionFrame<'_> {
    fn drop(&mut self) {
        self.stack.frames.lock().pop();
    }
}
