//! Error types for wakeline
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using WakeError
pub type Result<T> = std::result::Result<T, WakeError>;

/// Unified error type for wakeline operations
#[derive(Debug, Error)]
pub enum WakeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("Transport setup failed: {0}")]
    Transport(String),

    // -------------------------------------------------------------------------
    // Version File Errors
    // -------------------------------------------------------------------------
    #[error("Version file corruption detected: {0}")]
    Corruption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Handle Errors
    // -------------------------------------------------------------------------
    /// The opening thread has no installed execution context and the
    /// configured policy requires live updates.
    #[error("Thread has no execution context for live updates: {0}")]
    UnsupportedThread(String),

    /// The same file is already open with conflicting options.
    #[error("File already open with different options: {0}")]
    MismatchedOptions(String),
}
