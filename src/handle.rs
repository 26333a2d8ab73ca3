//! Handles
//!
//! A `Handle` is the thread-confined object a caller holds onto an
//! open version file. It stays live-updated: when any thread or
//! process commits a new version, a refresh task is posted onto the
//! opening thread's execution context and the handle advances the next
//! time that thread pumps its queue.
//!
//! The shareable state lives in `HandleCore`; the coordinator's
//! registry holds only a weak reference to it, so dropping the handle
//! is enough to stop receiving wake-ups.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::cache::InstanceCache;
use crate::config::{LiveUpdatePolicy, OpenOptions};
use crate::coordinator::InstanceCoordinator;
use crate::error::{Result, WakeError};
use crate::executor;
use crate::version_file::{SharedVersionFile, VersionId, VersionedFile};

/// Callback invoked on the owning thread after the handle advances
pub type RefreshObserver = Box<dyn FnMut(VersionId) + Send>;

// =============================================================================
// HandleCore
// =============================================================================

/// State shared between a handle, its posted refresh tasks, and
/// (weakly) the coordinator's registry
pub struct HandleCore {
    /// The storage engine's handle to the versioned file
    file: Box<dyn VersionedFile>,

    /// Thread the owning handle was opened on
    thread: ThreadId,

    /// Wake tasks that actually ran (diagnostics)
    wakes_handled: AtomicU64,

    /// Observer to run after each advance. Only ever invoked on the
    /// owning thread, but stored behind a lock because posted tasks
    /// reach it through the shared core.
    observer: Mutex<Option<RefreshObserver>>,
}

impl HandleCore {
    fn new(file: Box<dyn VersionedFile>) -> Arc<Self> {
        Arc::new(Self {
            file,
            thread: thread::current().id(),
            wakes_handled: AtomicU64::new(0),
            observer: Mutex::new(None),
        })
    }

    /// Advance to the latest committed version, running the observer
    /// if the version actually moved
    fn refresh(&self) -> Result<VersionId> {
        let before = self.file.current_version();
        let after = self.file.advance_to_latest()?;
        if after > before {
            if let Some(observer) = self.observer.lock().as_mut() {
                observer(after);
            }
        }
        Ok(after)
    }

    /// Entry point for posted wake tasks (owning thread only)
    pub(crate) fn handle_wake(&self) {
        debug_assert_eq!(thread::current().id(), self.thread);
        self.wakes_handled.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.refresh() {
            // A failed refresh leaves the handle on its last-seen
            // version; the next explicit refresh surfaces the error
            tracing::warn!("refresh after commit wake failed: {}", e);
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Thread-confined, live-updated view of a shared versioned file
///
/// Not `Send`: a handle must be used only on the thread that opened
/// it, because refresh tasks are posted to that thread's execution
/// context.
pub struct Handle {
    core: Arc<HandleCore>,
    coordinator: Arc<InstanceCoordinator>,
    canonical: PathBuf,

    /// Registry token; `None` when opened without live updates
    token: Option<u64>,

    /// Opt out of Send/Sync
    _not_send: PhantomData<*const ()>,
}

impl Handle {
    /// Open a handle with default options
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    /// Open a handle on `path` with explicit options
    ///
    /// Steps:
    /// 1. Open or create the version file (so the path exists and can
    ///    be canonicalized)
    /// 2. Find or create the coordinator for the canonical path
    /// 3. Resolve the current thread's execution context per policy
    /// 4. Register for wake-ups, lazily starting the listener
    pub fn open_with(path: &Path, options: OpenOptions) -> Result<Self> {
        // Step 1: Storage first; a failure here touches no global state
        let file = SharedVersionFile::open_or_create(path, options.read_only)?;
        let canonical = std::fs::canonicalize(path)?;

        // Step 2: Coordinator lookup attaches us atomically
        let cache = InstanceCache::global();
        let coordinator = cache.get_or_create(&canonical, options.identity())?;

        // Everything past this point must detach on failure
        match Self::finish_open(file, &coordinator, &options) {
            Ok((core, token)) => Ok(Self {
                core,
                coordinator,
                canonical,
                token,
                _not_send: PhantomData,
            }),
            Err(e) => {
                coordinator.detach_handle();
                cache.remove_if_unreferenced(&canonical);
                Err(e)
            }
        }
    }

    fn finish_open(
        file: SharedVersionFile,
        coordinator: &Arc<InstanceCoordinator>,
        options: &OpenOptions,
    ) -> Result<(Arc<HandleCore>, Option<u64>)> {
        // Resolve the owning thread's execution context
        let context = match options.live_updates {
            LiveUpdatePolicy::Disabled => None,
            LiveUpdatePolicy::BestEffort => executor::current(),
            LiveUpdatePolicy::Required => Some(executor::current().ok_or_else(|| {
                WakeError::UnsupportedThread(format!(
                    "thread {:?} has no execution context",
                    thread::current().id()
                ))
            })?),
        };

        // Reuse a live core from this thread when asked to
        let core = options
            .thread_cache
            .then(|| coordinator.registry().cached_core_for_current_thread())
            .flatten()
            .unwrap_or_else(|| HandleCore::new(Box::new(file)));

        let token = match context {
            Some(context) => {
                Some(coordinator.register_handle(&core, context, options.thread_cache)?)
            }
            None => None,
        };

        Ok((core, token))
    }

    // =========================================================================
    // Versions
    // =========================================================================

    /// Version this handle currently sees (no I/O)
    pub fn version(&self) -> VersionId {
        self.core.file.current_version()
    }

    /// Manually advance to the latest committed version
    ///
    /// Always available, even when live updates are disabled or the
    /// listener has faulted. Monotonic: never returns an older version
    /// than a previous call.
    pub fn refresh(&self) -> Result<VersionId> {
        self.core.refresh()
    }

    /// Commit a write, producing a new version, and wake everyone else
    ///
    /// Same-process peers are dispatched to directly; other processes
    /// are signaled through the rendezvous channel.
    pub fn commit(&self) -> Result<VersionId> {
        let version = self.core.file.commit_write()?;
        self.coordinator.on_local_commit();
        Ok(version)
    }

    /// Install an observer invoked (on this thread) after each advance
    pub fn set_on_refresh(&self, observer: RefreshObserver) {
        *self.core.observer.lock() = Some(observer);
    }

    // =========================================================================
    // Accessors (for testing and diagnostics)
    // =========================================================================

    /// Canonical path of the version file
    pub fn path(&self) -> &Path {
        &self.canonical
    }

    /// Whether this handle receives async wake-ups
    pub fn is_live_updating(&self) -> bool {
        self.token.is_some()
    }

    /// Number of wake tasks that have run for this handle's core
    pub fn wakes_handled(&self) -> u64 {
        self.core.wakes_handled.load(Ordering::Acquire)
    }

    /// The coordinator serving this handle's path
    pub fn coordinator(&self) -> &Arc<InstanceCoordinator> {
        &self.coordinator
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.coordinator.unregister_handle(token);
        }
        self.coordinator.detach_handle();
        InstanceCache::global().remove_if_unreferenced(&self.canonical);
    }
}
