//! Instance coordinator
//!
//! One coordinator per canonical file path per process. It owns the
//! commit helper (and through it the transport and listener thread)
//! and the registry of live handles, and is the only object that
//! signals other processes or fans wake-ups out to handles.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::OptionsIdentity;
use crate::error::Result;
use crate::executor::ExecutionContext;
use crate::handle::HandleCore;
use crate::helper::ExternalCommitHelper;
use crate::registry::HandleRegistry;
use crate::transport;

/// Binds one helper and one registry to one file
///
/// ## Lifecycle
/// - Created by `InstanceCache::get_or_create` on first open of a path
/// - The helper (transport + listener thread) is constructed lazily on
///   the first handle *registration*, never at cache-insert time, so a
///   path that is opened and immediately closed spawns no thread
/// - Evicted from the cache when the last handle detaches; dropping
///   the coordinator stops and joins the listener before anything else
///   is torn down
pub struct InstanceCoordinator {
    /// Canonical path of the version file
    path: PathBuf,

    /// Open-options identity every handle on this path must share
    identity: OptionsIdentity,

    /// Weak references to live handles plus their owning threads
    registry: HandleRegistry,

    /// Lazily constructed signal transport, shared with the helper.
    /// Created on first registration or first local commit, whichever
    /// comes first, so commit-only handles can still signal other
    /// processes without spawning a listener.
    transport: Mutex<Option<Arc<dyn transport::SignalTransport>>>,

    /// Lazily constructed commit helper (owns the listener thread)
    helper: Mutex<Option<ExternalCommitHelper>>,

    /// Number of open handles, registered for wake-ups or not.
    /// Governs cache eviction.
    live_handles: AtomicUsize,
}

impl InstanceCoordinator {
    pub(crate) fn new(path: PathBuf, identity: OptionsIdentity) -> Arc<Self> {
        Arc::new(Self {
            path,
            identity,
            registry: HandleRegistry::new(),
            transport: Mutex::new(None),
            helper: Mutex::new(None),
            live_handles: AtomicUsize::new(0),
        })
    }

    /// Register a handle core for async wake-ups
    ///
    /// The first registration constructs the transport and starts the
    /// listener; construction failures propagate to the opening caller.
    /// The listener callback holds only a weak reference back to the
    /// coordinator, so helper -> coordinator never forms a cycle.
    pub fn register_handle(
        self: &Arc<Self>,
        core: &Arc<HandleCore>,
        context: Arc<dyn ExecutionContext>,
        thread_cached: bool,
    ) -> Result<u64> {
        {
            let transport = self.ensure_transport()?;
            let mut helper = self.helper.lock();
            if helper.is_none() {
                let started = ExternalCommitHelper::new(transport);

                let weak = Arc::downgrade(self);
                started.start(Box::new(move || {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.registry.dispatch_wake();
                    }
                }))?;

                *helper = Some(started);
            }
        }

        Ok(self.registry.register(core, context, thread_cached))
    }

    /// Open the transport for this path if it isn't open yet
    fn ensure_transport(&self) -> Result<Arc<dyn transport::SignalTransport>> {
        let mut slot = self.transport.lock();
        if let Some(existing) = &*slot {
            return Ok(existing.clone());
        }
        let created = transport::open(&self.path, self.identity.transport)?;
        *slot = Some(created.clone());
        Ok(created)
    }

    /// Remove a registration; safe during a concurrent dispatch sweep
    pub fn unregister_handle(&self, token: u64) {
        self.registry.unregister(token);
    }

    /// Called by a handle right after it commits a write
    ///
    /// Signals the transport for other processes, then dispatches to
    /// same-process peers directly. The local dispatch is a latency
    /// optimization: the listener would also receive the self-signal.
    pub fn on_local_commit(&self) {
        match self.ensure_transport() {
            Ok(transport) => transport.signal(),
            // Best-effort by contract: a peer that cannot be signaled
            // re-checks the version file on its next read
            Err(e) => tracing::warn!("could not signal peers of {}: {}", self.path.display(), e),
        }
        self.registry.dispatch_wake();
    }

    // =========================================================================
    // Handle accounting (cache eviction)
    // =========================================================================

    pub(crate) fn attach_handle(&self) {
        self.live_handles.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn detach_handle(&self) {
        self.live_handles.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of open handles on this coordinator
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::Acquire)
    }

    // =========================================================================
    // Accessors (for testing and diagnostics)
    // =========================================================================

    /// Canonical path this coordinator serves
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn identity(&self) -> OptionsIdentity {
        self.identity
    }

    pub(crate) fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Whether the background listener has been started
    pub fn listener_started(&self) -> bool {
        self.helper.lock().is_some()
    }

    /// Whether the listener thread is currently alive
    pub fn listener_running(&self) -> bool {
        self.helper
            .lock()
            .as_ref()
            .map(ExternalCommitHelper::is_running)
            .unwrap_or(false)
    }

    /// Error that killed the listener, if any
    pub fn listener_fault(&self) -> Option<String> {
        self.helper
            .lock()
            .as_ref()
            .and_then(ExternalCommitHelper::listener_fault)
    }

    /// Number of registry entries (expired ones included until pruned)
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }
}

impl Drop for InstanceCoordinator {
    fn drop(&mut self) {
        // Join the listener before the registry goes away, so no
        // callback can fire into a partially-destroyed coordinator
        if let Some(helper) = self.helper.get_mut().take() {
            helper.stop();
        }
    }
}
