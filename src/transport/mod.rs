//! Commit signal transports
//!
//! A transport is the per-file wake primitive: anyone who commits calls
//! `signal()`, and the coordinator's listener thread blocks in `wait()`
//! until a commit or a shutdown request arrives.
//!
//! Two implementations sit behind the `SignalTransport` trait:
//! - [`fifo::FifoTransport`] — a named FIFO next to the database file,
//!   visible to every process with the file open
//! - [`engine_wait::EngineWaitTransport`] — an in-process epoch/condvar
//!   pair standing in for the storage engine's own blocking wait

use std::path::Path;
use std::sync::Arc;

use crate::config::TransportKind;
use crate::error::Result;

pub mod engine_wait;
pub mod fifo;

pub use engine_wait::EngineWaitTransport;
pub use fifo::FifoTransport;

/// Why a blocked `wait()` call returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Someone committed a write to the file
    Commit,

    /// `request_shutdown()` was called; the listener must exit
    Shutdown,
}

/// Cross-thread (and, for the FIFO variant, cross-process) wake primitive
///
/// ## Contract
/// - `signal` is best-effort and non-blocking: delivery failures are
///   swallowed because an unread pending signal already guarantees the
///   next wake, and readers re-check state on their next read anyway
/// - `wait` blocks only the listener thread and must return `Shutdown`
///   (without re-blocking) once `request_shutdown` has been called
/// - `request_shutdown` is idempotent and callable from any thread
pub trait SignalTransport: Send + Sync {
    /// Post one wake to every waiter, in this process or another
    fn signal(&self);

    /// Block until a commit signal or shutdown arrives
    fn wait(&self) -> Result<WakeReason>;

    /// Interrupt a blocked `wait()`, exactly-once semantics
    fn request_shutdown(&self);
}

/// Construct the transport selected by the open options
pub fn open(path: &Path, kind: TransportKind) -> Result<Arc<dyn SignalTransport>> {
    match kind {
        TransportKind::Fifo => Ok(Arc::new(FifoTransport::open(path)?)),
        TransportKind::EngineWait => Ok(Arc::new(EngineWaitTransport::new())),
    }
}
