//! External commit helper
//!
//! Runs the one background listener thread per coordinator against the
//! coordinator's signal transport. The listener blocks in `wait()`; on each
//! commit wake it runs the coordinator's fan-out callback (which only
//! marks handles and posts tasks — never I/O), and on shutdown it
//! exits. Stopping joins the thread; no listener ever outlives its
//! helper.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::error::{Result, WakeError};
use crate::transport::{SignalTransport, WakeReason};

/// Listener lifecycle: `Unstarted -> Running -> Stopped`
///
/// (`Stopping` is the transient window inside `stop()` between the
/// shutdown request and the join; it needs no representation because
/// `stop()` holds the state lock throughout.)
enum ListenerState {
    Unstarted,
    Running(JoinHandle<()>),
    Stopped,
}

/// Runs the background listener for one coordinator
pub struct ExternalCommitHelper {
    /// The wake primitive, shared with the owning coordinator. Never
    /// shared across coordinators.
    transport: Arc<dyn SignalTransport>,

    /// Listener thread state
    state: Mutex<ListenerState>,

    /// First unrecoverable listener error, if any. Liveness is degraded
    /// after a fault — no more async wakes — but reads stay correct
    /// because every read re-checks the version file.
    fault: Arc<Mutex<Option<String>>>,
}

impl ExternalCommitHelper {
    pub fn new(transport: Arc<dyn SignalTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(ListenerState::Unstarted),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the listener thread; at most once per helper
    ///
    /// `on_commit` runs on the listener thread for every commit wake
    /// and must be cheap and non-blocking.
    pub fn start(&self, on_commit: Box<dyn Fn() + Send + Sync>) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ListenerState::Unstarted => {}
            // Restarting a stopped helper is not supported; the
            // coordinator is torn down with it
            ListenerState::Running(_) | ListenerState::Stopped => return Ok(()),
        }

        let transport = self.transport.clone();
        let fault = self.fault.clone();

        let handle = std::thread::Builder::new()
            .name("wakeline-notify-listener".to_string())
            // The loop needs almost no stack
            .stack_size(256 * 1024)
            .spawn(move || loop {
                match transport.wait() {
                    Ok(WakeReason::Commit) => on_commit(),
                    Ok(WakeReason::Shutdown) => return,
                    Err(e) => {
                        tracing::error!("commit listener failed, live updates disabled: {}", e);
                        let mut fault = fault.lock();
                        if fault.is_none() {
                            *fault = Some(e.to_string());
                        }
                        return;
                    }
                }
            })
            .map_err(|e| WakeError::Transport(format!("failed to spawn listener: {}", e)))?;

        *state = ListenerState::Running(handle);
        Ok(())
    }

    /// Signal every other open instance of the file that a commit happened
    ///
    /// Safe from any thread; delivery is best-effort by contract.
    pub fn notify_others(&self) {
        self.transport.signal();
    }

    /// Stop and join the listener; idempotent
    ///
    /// The join happens outside the state lock so `is_running()` and
    /// `listener_fault()` stay responsive during shutdown. When the
    /// listener thread itself drops the last reference to its owner,
    /// `stop()` runs *on* the listener thread; joining there would be
    /// a self-join, so it is skipped — the thread observes the shutdown
    /// request and exits its loop on its own.
    pub fn stop(&self) {
        let handle = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, ListenerState::Stopped) {
                ListenerState::Running(handle) => handle,
                ListenerState::Unstarted | ListenerState::Stopped => return,
            }
        };

        self.transport.request_shutdown();

        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("commit listener panicked during shutdown");
        }
    }

    // =========================================================================
    // Accessors (for testing and diagnostics)
    // =========================================================================

    /// Whether the listener thread is currently running
    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), ListenerState::Running(_))
    }

    /// The error that killed the listener, if it died
    pub fn listener_fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }
}

impl Drop for ExternalCommitHelper {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Tests
// =============================================================================
