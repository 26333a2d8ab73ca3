//! Owning-thread execution contexts
//!
//! A handle is confined to the thread that opened it, so wake-ups are
//! never delivered by calling into the handle from the listener thread.
//! Instead the listener posts a task onto the owning thread's
//! `ExecutionContext`, and the owning thread runs it whenever it pumps
//! its queue.
//!
//! Contexts are installed per thread in a process-wide registry keyed
//! by `ThreadId`; `Handle::open` resolves the current thread's context
//! at registration time.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// A unit of work posted to an owning thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that can run tasks on its associated thread
///
/// `post` must be callable from any thread and must not block: it only
/// enqueues the task. The associated thread runs queued tasks whenever
/// it gets around to pumping its queue.
pub trait ExecutionContext: Send + Sync {
    fn post(&self, task: Task);
}

// =============================================================================
// Per-thread context registry
// =============================================================================

type ContextMap = Mutex<HashMap<ThreadId, Weak<dyn ExecutionContext>>>;

fn contexts() -> &'static ContextMap {
    static CONTEXTS: OnceLock<ContextMap> = OnceLock::new();
    CONTEXTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Install a context for the calling thread, replacing any previous one
///
/// The registry holds only a weak reference; dropping the last `Arc`
/// to the context effectively uninstalls it.
pub fn install(ctx: Arc<dyn ExecutionContext>) {
    let mut map = contexts().lock();
    map.retain(|_, weak| weak.strong_count() > 0);
    map.insert(thread::current().id(), Arc::downgrade(&ctx));
}

/// Remove the calling thread's context, if any
pub fn uninstall() {
    contexts().lock().remove(&thread::current().id());
}

/// Resolve the calling thread's installed context
pub fn current() -> Option<Arc<dyn ExecutionContext>> {
    contexts()
        .lock()
        .get(&thread::current().id())
        .and_then(Weak::upgrade)
}

// =============================================================================
// WorkerContext
// =============================================================================

/// Channel-backed execution context for threads without a native run loop
///
/// The owning thread creates one, installs it, and pumps it with
/// `run_pending` / `run_one` at points where running posted work is
/// safe. Posting is multi-producer and lock-free.
pub struct WorkerContext {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

impl WorkerContext {
    /// Create a new context (not yet installed)
    pub fn new() -> Arc<Self> {
        let (tx, rx) = unbounded();
        Arc::new(Self { tx, rx })
    }

    /// Create a context and install it for the calling thread
    pub fn install_for_current_thread() -> Arc<Self> {
        let ctx = Self::new();
        install(ctx.clone());
        ctx
    }

    /// Run every task currently queued; returns how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one task and run it
    pub fn run_one(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Pump tasks until `deadline` duration has elapsed; returns how many ran
    pub fn run_for(&self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return ran;
            }
            if self.run_one(deadline - now) {
                ran += 1;
            }
        }
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl ExecutionContext for WorkerContext {
    fn post(&self, task: Task) {
        // The receiver lives as long as self, so this cannot fail
        let _ = self.tx.send(task);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_post_and_run_pending() {
        let ctx = WorkerContext::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = count.clone();
            ctx.post(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(ctx.run_pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.run_pending(), 0);
    }

    #[test]
    fn test_post_from_other_thread() {
        let ctx = WorkerContext::new();
        let posted = Arc::new(AtomicUsize::new(0));

        let remote: Arc<dyn ExecutionContext> = ctx.clone();
        let count = posted.clone();
        let t = std::thread::spawn(move || {
            remote.post(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        });
        t.join().unwrap();

        assert!(ctx.run_one(Duration::from_secs(1)));
        assert_eq!(posted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_install_and_current() {
        assert!(current().is_none());
        let ctx = WorkerContext::install_for_current_thread();
        assert!(current().is_some());
        drop(ctx);
        // Weak entry expires with the last strong reference
        assert!(current().is_none());
        uninstall();
    }

    #[test]
    fn test_contexts_are_per_thread() {
        let _ctx = WorkerContext::install_for_current_thread();
        let t = std::thread::spawn(|| current().is_none());
        assert!(t.join().unwrap());
        uninstall();
    }
}
