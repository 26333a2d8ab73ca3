//! # wakeline
//!
//! A cross-process commit-notification and live-update layer for
//! shared, versioned database files:
//! - Detect, from any process, that another process or thread
//!   committed a new version of the file
//! - Wake every thread in this process with an open handle and advance
//!   it to the latest readable version on its own thread
//! - No ownership cycles, no cross-thread strong references, no
//!   detached threads
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────┐ commit  ┌─────────────────────┐  signal   ┌──────────────┐
//! │  Handle    ├────────▶│ InstanceCoordinator │──────────▶│  Transport   │
//! │ (thread A) │         │  (one per path)     │           │ (named FIFO) │
//! └────────────┘         │  ┌───────────────┐  │   wait    └──────┬───────┘
//! ┌────────────┐  weak   │  │HandleRegistry │  │◀─────────────────┘
//! │  Handle    │◀────────┤  └───────────────┘  │      listener thread
//! │ (thread B) │  post   │  ┌───────────────┐  │   (ExternalCommitHelper)
//! └────────────┘ refresh │  │ CommitHelper  │  │
//!                        │  └───────────────┘  │
//!                        └─────────▲───────────┘
//!                                  │ get_or_create
//!                        ┌─────────┴───────────┐
//!                        │   InstanceCache     │
//!                        │ (path → coordinator)│
//!                        └─────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod version_file;
pub mod executor;
pub mod transport;
pub mod registry;
pub mod helper;
pub mod coordinator;
pub mod cache;
pub mod handle;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cache::InstanceCache;
pub use config::{LiveUpdatePolicy, OpenOptions, TransportKind};
pub use coordinator::InstanceCoordinator;
pub use error::{Result, WakeError};
pub use executor::{ExecutionContext, WorkerContext};
pub use handle::Handle;
pub use version_file::{SharedVersionFile, VersionId, VersionedFile};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of wakeline
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
