//! Configuration for wakeline handles
//!
//! Centralized open options with sensible defaults.

/// Which commit-signal transport a coordinator should use.
///
/// Selected once per file when the first handle opens it; all later
/// opens of the same file must agree (see `WakeError::MismatchedOptions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Named FIFO next to the database file plus poll(2) on a listener
    /// thread. Works across processes.
    Fifo,

    /// Delegate waiting to the storage engine's own "new version
    /// available" primitive. In-process only; cross-process delivery is
    /// the engine's responsibility.
    EngineWait,
}

/// What to do when a handle is opened on a thread that has no
/// installed execution context to receive async wake-ups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveUpdatePolicy {
    /// Fail the open with `UnsupportedThread`.
    Required,

    /// Open the handle without live updates; the caller must call
    /// `Handle::refresh()` manually to advance.
    BestEffort,

    /// Never register for async wake-ups, even if a context exists.
    Disabled,
}

/// Options controlling how a handle is opened
#[derive(Debug, Clone)]
pub struct OpenOptions {
    // -------------------------------------------------------------------------
    // File Identity
    // -------------------------------------------------------------------------
    /// Open the version file read-only. Read-only handles cannot commit
    /// but still receive wake-ups.
    pub read_only: bool,

    // -------------------------------------------------------------------------
    // Notification Configuration
    // -------------------------------------------------------------------------
    /// Transport used by this file's coordinator.
    pub transport: TransportKind,

    /// Policy for threads without an execution context.
    pub live_updates: LiveUpdatePolicy,

    /// Reuse an already-open core for the current thread instead of
    /// opening the version file again.
    pub thread_cache: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            transport: TransportKind::Fifo,
            live_updates: LiveUpdatePolicy::BestEffort,
            thread_cache: false,
        }
    }
}

impl OpenOptions {
    /// Create a new options builder
    pub fn builder() -> OpenOptionsBuilder {
        OpenOptionsBuilder::default()
    }

    /// The parts of the options that must match across every open of
    /// the same file. Two opens with differing identities are a
    /// configuration conflict, not two coordinators.
    pub(crate) fn identity(&self) -> OptionsIdentity {
        OptionsIdentity {
            read_only: self.read_only,
            transport: self.transport,
        }
    }
}

/// The coordinator-level identity of a set of open options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OptionsIdentity {
    pub read_only: bool,
    pub transport: TransportKind,
}

/// Builder for OpenOptions
#[derive(Default)]
pub struct OpenOptionsBuilder {
    options: OpenOptions,
}

impl OpenOptionsBuilder {
    /// Open the file read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.options.read_only = read_only;
        self
    }

    /// Select the commit-signal transport
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.options.transport = transport;
        self
    }

    /// Set the live-update policy
    pub fn live_updates(mut self, policy: LiveUpdatePolicy) -> Self {
        self.options.live_updates = policy;
        self
    }

    /// Enable per-thread core reuse
    pub fn thread_cache(mut self, enabled: bool) -> Self {
        self.options.thread_cache = enabled;
        self
    }

    pub fn build(self) -> OpenOptions {
        self.options
    }
}
