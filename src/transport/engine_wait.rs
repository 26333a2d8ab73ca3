//! Engine-wait commit signal transport
//!
//! The generic fallback for platforms (or file locations) where a named
//! rendezvous channel is unavailable. Waiting is modeled the way a
//! storage engine's own "block until a new version is available"
//! primitive behaves: a monotonically increasing commit epoch plus a
//! condvar. Cross-process delivery is the engine's job on such
//! platforms; this transport only fans out within the process.

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::transport::{SignalTransport, WakeReason};

#[derive(Default)]
struct EpochState {
    /// Bumped once per signal
    epoch: u64,

    /// Epoch the listener has already consumed
    consumed: u64,

    /// Latched by `request_shutdown`
    shutdown: bool,
}

/// In-process epoch/condvar transport
pub struct EngineWaitTransport {
    state: Mutex<EpochState>,
    cond: Condvar,
}

impl EngineWaitTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EpochState::default()),
            cond: Condvar::new(),
        }
    }
}

impl Default for EngineWaitTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalTransport for EngineWaitTransport {
    fn signal(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        self.cond.notify_all();
    }

    fn wait(&self) -> Result<WakeReason> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Ok(WakeReason::Shutdown);
            }
            if state.epoch > state.consumed {
                // Consume every pending signal at once: N signals
                // before a wait produce one Commit wake
                state.consumed = state.epoch;
                return Ok(WakeReason::Commit);
            }
            self.cond.wait(&mut state);
        }
    }

    fn request_shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.cond.notify_all();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_signals_coalesce_into_one_wake() {
        let t = EngineWaitTransport::new();
        for _ in 0..50 {
            t.signal();
        }
        assert_eq!(t.wait().unwrap(), WakeReason::Commit);
        // All fifty were consumed by the single wake
        t.signal();
        assert_eq!(t.wait().unwrap(), WakeReason::Commit);
    }

    #[test]
    fn test_shutdown_interrupts_and_stays_shut() {
        let t = Arc::new(EngineWaitTransport::new());
        let waiter = {
            let t = t.clone();
            std::thread::spawn(move || t.wait().unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));
        t.request_shutdown();
        assert_eq!(waiter.join().unwrap(), WakeReason::Shutdown);
        assert_eq!(t.wait().unwrap(), WakeReason::Shutdown);
    }

    #[test]
    fn test_signal_wakes_blocked_waiter() {
        let t = Arc::new(EngineWaitTransport::new());
        let waiter = {
            let t = t.clone();
            std::thread::spawn(move || t.wait().unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));
        t.signal();
        assert_eq!(waiter.join().unwrap(), WakeReason::Commit);
    }
}
