//! Weak handle registry
//!
//! The coordinator's map of live handles. Each entry holds a *weak*
//! reference to a handle's shared core plus the identity of the thread
//! that owns it, so the dispatch sweep can reach every handle without
//! extending its lifetime and without ever touching it from the wrong
//! thread: a wake is always delivered by posting a task onto the
//! owning thread's execution context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::executor::ExecutionContext;
use crate::handle::HandleCore;

/// One registered handle
struct NotifierEntry {
    /// Weak reference to the handle's core; never upgraded except to
    /// post work back to the owning thread
    core: Weak<HandleCore>,

    /// Execution context of the owning thread. Held strongly — the
    /// context outliving the handle is harmless, the reverse is not.
    context: Arc<dyn ExecutionContext>,

    /// Thread that opened the handle, captured at registration
    thread: ThreadId,

    /// Token for O(1) removal
    key: u64,

    /// Whether this core may be reused by later opens on the same thread
    thread_cached: bool,
}

impl NotifierEntry {
    /// Liveness check without resurrecting a strong reference
    fn is_expired(&self) -> bool {
        self.core.strong_count() == 0
    }
}

/// Registry of live handles for one coordinator
///
/// ## Concurrency:
/// - Mutated from handle open/close (arbitrary threads) and swept from
///   the listener thread; a single mutex covers both
/// - The sweep snapshots entries and posts outside the lock, so a
///   posted task can re-enter `unregister` without deadlocking
pub struct HandleRegistry {
    entries: Mutex<Vec<NotifierEntry>>,
    next_key: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_key: AtomicU64::new(1),
        }
    }

    /// Register a handle core; returns the removal token
    pub fn register(
        &self,
        core: &Arc<HandleCore>,
        context: Arc<dyn ExecutionContext>,
        thread_cached: bool,
    ) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(NotifierEntry {
            core: Arc::downgrade(core),
            context,
            thread: thread::current().id(),
            key,
            thread_cached,
        });
        key
    }

    /// Remove the entry for `token`, if still present
    ///
    /// Already-removed tokens are a no-op: an entry may have been
    /// pruned by a sweep after its handle dropped.
    pub fn unregister(&self, token: u64) {
        let mut entries = self.entries.lock();
        if let Some(idx) = entries.iter().position(|e| e.key == token) {
            entries.swap_remove(idx);
        }
    }

    /// Fan a commit notification out to every live handle
    ///
    /// Expired entries are pruned in the same pass. The posted task
    /// re-checks liveness itself: the handle may die between this
    /// sweep and the task actually running on its thread.
    pub fn dispatch_wake(&self) {
        // Snapshot under the lock, post outside it
        let targets: Vec<(Weak<HandleCore>, Arc<dyn ExecutionContext>)> = {
            let mut entries = self.entries.lock();
            entries.retain(|e| !e.is_expired());
            entries
                .iter()
                .map(|e| (e.core.clone(), e.context.clone()))
                .collect()
        };

        for (core, context) in targets {
            context.post(Box::new(move || {
                // Second liveness check, on the owning thread
                if let Some(core) = core.upgrade() {
                    core.handle_wake();
                }
            }));
        }
    }

    /// A live, thread-cached core registered by the calling thread
    ///
    /// Used by `Handle::open` to reuse an existing core instead of
    /// opening the version file again.
    pub fn cached_core_for_current_thread(&self) -> Option<Arc<HandleCore>> {
        let current = thread::current().id();
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|e| e.thread_cached && e.thread == current)
            .find_map(|e| e.core.upgrade())
    }

    /// Number of registered entries, counting not-yet-pruned expired ones
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
