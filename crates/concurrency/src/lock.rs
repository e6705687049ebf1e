//! Composition locking
//!
//! Two lock domains:
//! - **State lock**: a short-lived `RwLock` around the engine's registry
//!   state. Held only for lookups and inserts, never across calls into parts
//!   or providers.
//! - **Composition lock**: one re-entrant exclusive lock serializing whole
//!   preview/satisfy/release calls and change notifications. Re-entrant
//!   because composing one part routinely composes others on the same thread
//!   (an export's value factory satisfies the exporting part).
//!
//! The composition lock is handed out as a [`CompositionLockHolder`] that owns
//! an `Arc` to the lock, so a transaction can keep it held past the call that
//! acquired it and release it from a commit or revert action.
//!
//! In "not thread-safe" mode the composition lock is a no-op. The state lock
//! stays real; it is uncontended in single-threaded use.

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Re-entrant exclusive lock with explicit release
#[derive(Debug, Default)]
struct ReentrantLock {
    /// Owning thread and recursion count
    owner: Mutex<Option<(ThreadId, usize)>>,
    released: Condvar,
}

impl ReentrantLock {
    fn acquire(&self) {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match owner.as_mut() {
                None => {
                    *owner = Some((me, 1));
                    return;
                }
                Some((thread, count)) if *thread == me => {
                    *count += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut owner),
            }
        }
    }

    fn release(&self) {
        let mut owner = self.owner.lock();
        if let Some((_, count)) = owner.as_mut() {
            *count -= 1;
            if *count == 0 {
                *owner = None;
                self.released.notify_one();
            }
        }
    }

    fn is_held_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        matches!(*self.owner.lock(), Some((thread, _)) if thread == me)
    }
}

/// One acquisition of the composition lock
///
/// Released on drop or by an explicit [`release`](Self::release), whichever
/// comes first. A holder from a no-op lock holds nothing.
#[derive(Debug)]
pub struct CompositionLockHolder {
    lock: Option<Arc<ReentrantLock>>,
    released: AtomicBool,
}

impl CompositionLockHolder {
    fn noop() -> Self {
        Self {
            lock: None,
            released: AtomicBool::new(true),
        }
    }

    /// Whether this holder actually holds the lock
    pub fn is_held(&self) -> bool {
        self.lock.is_some() && !self.released.load(Ordering::Acquire)
    }

    /// Release the lock; later calls are no-ops
    pub fn release(&self) {
        if let Some(lock) = &self.lock {
            if !self.released.swap(true, Ordering::AcqRel) {
                lock.release();
            }
        }
    }
}

impl Drop for CompositionLockHolder {
    fn drop(&mut self) {
        self.release();
    }
}

/// Dual-mode lock guarding engine state `T`
///
/// # Example
///
/// ```
/// use composer_concurrency::CompositionLock;
///
/// let lock = CompositionLock::new(Vec::<u32>::new(), true);
/// {
///     let _composition = lock.lock_composition();
///     // re-entrant on the same thread
///     let _nested = lock.lock_composition();
///     lock.write_state().push(1);
/// }
/// assert_eq!(lock.read_state().len(), 1);
/// ```
#[derive(Debug)]
pub struct CompositionLock<T> {
    thread_safe: bool,
    state: RwLock<T>,
    composition: Arc<ReentrantLock>,
    disposed: AtomicBool,
}

impl<T> CompositionLock<T> {
    /// Create a lock around `state`
    ///
    /// With `thread_safe == false` the composition lock never blocks.
    pub fn new(state: T, thread_safe: bool) -> Self {
        Self {
            thread_safe,
            state: RwLock::new(state),
            composition: Arc::new(ReentrantLock::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Whether the composition lock is real
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    /// Acquire the state for reading
    pub fn read_state(&self) -> RwLockReadGuard<'_, T> {
        self.state.read()
    }

    /// Acquire the state for writing
    pub fn write_state(&self) -> RwLockWriteGuard<'_, T> {
        self.state.write()
    }

    /// Acquire the composition lock
    ///
    /// Blocks while another thread holds it. Returns a no-op holder when the
    /// lock is not thread-safe or has been disposed.
    pub fn lock_composition(&self) -> CompositionLockHolder {
        if !self.thread_safe || self.disposed.load(Ordering::Acquire) {
            return CompositionLockHolder::noop();
        }
        self.composition.acquire();
        CompositionLockHolder {
            lock: Some(Arc::clone(&self.composition)),
            released: AtomicBool::new(false),
        }
    }

    /// Whether the current thread holds the composition lock
    pub fn is_composition_locked(&self) -> bool {
        self.thread_safe && self.composition.is_held_by_current_thread()
    }

    /// Stop handing out real composition lock holders
    ///
    /// Holders already handed out still release normally.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Whether [`dispose`](Self::dispose) was called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Duration;

    #[test]
    fn test_composition_lock_is_reentrant() {
        let lock = CompositionLock::new((), true);
        let outer = lock.lock_composition();
        let inner = lock.lock_composition();
        assert!(outer.is_held());
        assert!(inner.is_held());
        drop(inner);
        assert!(lock.is_composition_locked());
        drop(outer);
        assert!(!lock.is_composition_locked());
    }

    #[test]
    fn test_release_is_idempotent() {
        let lock = CompositionLock::new((), true);
        let outer = lock.lock_composition();
        let holder = lock.lock_composition();
        holder.release();
        holder.release();
        drop(holder);
        // one release for the inner acquisition only
        assert!(lock.is_composition_locked());
        drop(outer);
        assert!(!lock.is_composition_locked());
    }

    #[test]
    fn test_composition_lock_excludes_other_threads() {
        let lock = Arc::new(CompositionLock::new((), true));
        let entered = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let holder = lock.lock_composition();

        let handle = {
            let lock = Arc::clone(&lock);
            let entered = Arc::clone(&entered);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let _holder = lock.lock_composition();
                entered.fetch_add(1, Ordering::SeqCst);
            })
        };

        barrier.wait();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(entered.load(Ordering::SeqCst), 0);

        drop(holder);
        handle.join().unwrap();
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_not_thread_safe_mode_is_noop() {
        let lock = CompositionLock::new((), false);
        let holder = lock.lock_composition();
        assert!(!holder.is_held());
        assert!(!lock.is_composition_locked());
        assert!(!lock.is_thread_safe());
    }

    #[test]
    fn test_disposed_lock_hands_out_noop_holders() {
        let lock = CompositionLock::new((), true);
        lock.dispose();
        assert!(lock.is_disposed());
        let holder = lock.lock_composition();
        assert!(!holder.is_held());
    }

    #[test]
    fn test_state_lock_guards_data() {
        let lock = CompositionLock::new(0u32, true);
        *lock.write_state() += 5;
        assert_eq!(*lock.read_state(), 5);
    }
}
