//! Atomic composition scopes
//!
//! An [`AtomicComposition`] batches composition changes so they become
//! visible all at once or not at all:
//!
//! - **Commit actions** run in registration order when the outermost scope
//!   completes.
//! - **Revert actions** run in reverse registration order when a scope is
//!   dropped without completing.
//! - **Values** are a per-scope map keyed by owner id. An engine keeps its
//!   shadow index there so pending changes stay out of its global state until
//!   commit.
//!
//! Scopes nest. Completing an inner scope moves its actions and values into
//! the outer one; only the outermost completion runs commit actions.
//!
//! ## Lifecycle
//!
//! ```text
//! 1. AtomicComposition::new() / nested(&outer)
//! 2. add_commit_action / add_revert_action / set_value (via &self)
//! 3a. complete(self)  -> commit actions run (outermost) or move outward (nested)
//! 3b. drop(self)      -> revert actions run, newest first
//! ```
//!
//! A scope is a single-thread value: its actions may own the composition
//! lock, which must be released on the thread that took it.

use composer_core::{ComposeError, ComposeResult};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

type CommitAction = Box<dyn FnOnce() -> ComposeResult<()>>;
type RevertAction = Box<dyn FnOnce()>;
type ScopeValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct ScopeState {
    completed: bool,
    commit_actions: Vec<CommitAction>,
    revert_actions: Vec<RevertAction>,
    values: HashMap<Uuid, ScopeValue>,
}

/// A transaction scope for composition changes
pub struct AtomicComposition<'a> {
    id: Uuid,
    outer: Option<&'a AtomicComposition<'a>>,
    state: RefCell<ScopeState>,
}

impl AtomicComposition<'static> {
    /// Begin an outermost scope
    pub fn new() -> Self {
        let scope = AtomicComposition {
            id: Uuid::new_v4(),
            outer: None,
            state: RefCell::new(ScopeState::default()),
        };
        debug!(target: "composer::txn", id = %scope.id, "Atomic composition started");
        scope
    }
}

impl Default for AtomicComposition<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> AtomicComposition<'a> {
    /// Begin a scope nested in `outer`
    pub fn nested(outer: &'a AtomicComposition<'a>) -> Self {
        let scope = AtomicComposition {
            id: Uuid::new_v4(),
            outer: Some(outer),
            state: RefCell::new(ScopeState::default()),
        };
        debug!(target: "composer::txn", id = %scope.id, outer = %outer.id, "Nested atomic composition started");
        scope
    }

    /// Scope identifier (for logging)
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Enclosing scope, if any
    pub fn outer(&self) -> Option<&'a AtomicComposition<'a>> {
        self.outer
    }

    /// Queue an action to run when the outermost scope commits
    pub fn add_commit_action<F>(&self, action: F)
    where
        F: FnOnce() -> ComposeResult<()> + 'static,
    {
        self.state.borrow_mut().commit_actions.push(Box::new(action));
    }

    /// Queue an action to run if this scope is rolled back
    pub fn add_revert_action<F>(&self, action: F)
    where
        F: FnOnce() + 'static,
    {
        self.state.borrow_mut().revert_actions.push(Box::new(action));
    }

    /// Store a value under `key` in this scope
    pub fn set_value<T>(&self, key: Uuid, value: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        self.state.borrow_mut().values.insert(key, value);
    }

    /// Look up the value stored under `key`
    ///
    /// With `local_only == false` the lookup continues through the enclosing
    /// scopes until a value is found.
    pub fn try_get_value<T>(&self, key: Uuid, local_only: bool) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let local = self.state.borrow().values.get(&key).cloned();
        match local {
            Some(value) => value.downcast::<T>().ok(),
            None if local_only => None,
            None => self.outer.and_then(|outer| outer.try_get_value(key, false)),
        }
    }

    /// Number of queued (commit, revert) actions
    pub fn pending_actions(&self) -> (usize, usize) {
        let state = self.state.borrow();
        (state.commit_actions.len(), state.revert_actions.len())
    }

    /// Complete the scope
    ///
    /// For a nested scope, moves everything into the enclosing scope and
    /// returns `Ok(())`. For the outermost scope, runs every commit action in
    /// order; all actions run even if one fails, and the first failure is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the first error reported by a commit action.
    pub fn complete(self) -> ComposeResult<()> {
        let (commit_actions, revert_actions, values) = {
            let mut state = self.state.borrow_mut();
            state.completed = true;
            (
                mem::take(&mut state.commit_actions),
                mem::take(&mut state.revert_actions),
                mem::take(&mut state.values),
            )
        };

        if let Some(outer) = self.outer {
            let mut outer_state = outer.state.borrow_mut();
            outer_state.commit_actions.extend(commit_actions);
            outer_state.revert_actions.extend(revert_actions);
            outer_state.values.extend(values);
            debug!(target: "composer::txn", id = %self.id, outer = %outer.id, "Nested atomic composition folded into outer scope");
            return Ok(());
        }

        let total = commit_actions.len();
        let mut first_error: Option<ComposeError> = None;
        for action in commit_actions {
            if let Err(e) = action() {
                warn!(target: "composer::txn", id = %self.id, error = %e, "Commit action failed");
                first_error.get_or_insert(e);
            }
        }
        // revert actions may own resources (lock holders); keep them until
        // every commit action has run
        drop(revert_actions);
        drop(values);

        match first_error {
            None => {
                debug!(target: "composer::txn", id = %self.id, actions = total, "Atomic composition committed");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }
}

impl Drop for AtomicComposition<'_> {
    fn drop(&mut self) {
        let revert_actions = {
            let mut state = self.state.borrow_mut();
            if state.completed {
                return;
            }
            state.completed = true;
            state.commit_actions.clear();
            state.values.clear();
            mem::take(&mut state.revert_actions)
        };

        let total = revert_actions.len();
        for action in revert_actions.into_iter().rev() {
            action();
        }
        debug!(target: "composer::txn", id = %self.id, actions = total, "Atomic composition reverted");
    }
}

impl fmt::Debug for AtomicComposition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (commits, reverts) = self.pending_actions();
        f.debug_struct("AtomicComposition")
            .field("id", &self.id)
            .field("nested", &self.outer.is_some())
            .field("commit_actions", &commits)
            .field("revert_actions", &reverts)
            .finish()
    }
}
