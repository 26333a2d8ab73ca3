//! FIFO-based commit signal transport
//!
//! Cross-process notification is done with a named FIFO in the
//! filesystem next to the database file. Everyone who wants to be woken
//! polls the FIFO for readable data, and anyone who commits writes a
//! byte to it after the commit is durable. The byte itself carries no
//! information; only "data became available" matters.
//!
//! A second, anonymous pipe pair belongs to this process alone and is
//! used purely to interrupt the poll when the coordinator shuts down.
//!
//! If the filesystem holding the database refuses FIFOs (some network
//! mounts do), the FIFO is created in the temp directory instead, named
//! by a hash of the original path. Hash collisions only cause spurious
//! wake-ups, never missed state, because every wake is followed by a
//! re-read of the version file.

use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::error::{Result, WakeError};
use crate::transport::{SignalTransport, WakeReason};

/// Suffix appended to the database path to form the rendezvous path
const NOTE_SUFFIX: &str = ".note";

/// Named-FIFO transport
///
/// ## Descriptor ownership
/// All three descriptors are owned exclusively by this object and are
/// closed exactly once when it drops, on every path including
/// construction failure (each is an RAII `File`/`OwnedFd`).
pub struct FifoTransport {
    /// The named FIFO, opened read-write and non-blocking.
    ///
    /// Read-write matters: a FIFO with both ends held by the same
    /// descriptor never reports EOF, and writes succeed even when no
    /// other process currently has it open.
    fifo: File,

    /// Where the FIFO actually lives (may be the tmp-dir fallback)
    note_path: PathBuf,

    /// Read end of the shutdown pipe, polled alongside the FIFO
    shutdown_read: OwnedFd,

    /// Write end of the shutdown pipe
    shutdown_write: OwnedFd,

    /// Set once by `request_shutdown`
    shutdown_requested: AtomicBool,
}

impl FifoTransport {
    /// Create or attach to the rendezvous FIFO for `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        // Step 1: Derive the rendezvous path next to the database file
        let mut os = db_path.as_os_str().to_os_string();
        os.push(NOTE_SUFFIX);
        let mut note_path = PathBuf::from(os);

        // Step 2: Create the FIFO; an existing one is shared, not an error
        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        match unistd::mkfifo(&note_path, mode) {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(Errno::EOPNOTSUPP) => {
                // Filesystem doesn't support FIFOs; fall back to tmp.
                // The hash keys the fallback to the original location so
                // two databases don't share a channel by accident.
                let mut hasher = DefaultHasher::new();
                note_path.hash(&mut hasher);
                note_path = std::env::temp_dir()
                    .join(format!("wakeline_{:016x}{}", hasher.finish(), NOTE_SUFFIX));
                match unistd::mkfifo(&note_path, mode) {
                    Ok(()) | Err(Errno::EEXIST) => {}
                    Err(e) => return Err(WakeError::Io(e.into())),
                }
            }
            Err(e) => return Err(WakeError::Io(e.into())),
        }

        // Step 3: Open it non-blocking so signal() fails fast on a full
        // buffer instead of stalling a committer
        let fifo = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&note_path)?;

        // Step 4: Anonymous pipe for same-process shutdown interruption
        let (shutdown_read, shutdown_write) =
            unistd::pipe().map_err(|e| WakeError::Io(e.into()))?;

        Ok(Self {
            fifo,
            note_path,
            shutdown_read,
            shutdown_write,
            shutdown_requested: AtomicBool::new(false),
        })
    }

    /// Path of the FIFO actually in use (tests, diagnostics)
    pub fn note_path(&self) -> &Path {
        &self.note_path
    }

    /// Write one byte to a descriptor, making room if the buffer is full
    ///
    /// Mirrors the behavior needed for a fan-out pipe: we never read in
    /// the waiting code so that one write can wake several pollers, so
    /// on a full buffer the *writer* drains old bytes and retries. The
    /// drained bytes were unconsumed wakes; the byte written afterwards
    /// re-arms all of them at once.
    fn notify_fd(fd: impl AsFd + Copy) {
        loop {
            match unistd::write(fd, &[0u8]) {
                Ok(_) => return,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    let mut buf = [0u8; 1024];
                    let _ = unistd::read(fd, &mut buf);
                }
                Err(e) => {
                    // Best-effort: a lost signal costs latency, not
                    // correctness (next read re-checks the version file)
                    tracing::debug!("commit signal not delivered: {}", e);
                    return;
                }
            }
        }
    }
}

impl SignalTransport for FifoTransport {
    fn signal(&self) {
        Self::notify_fd(self.fifo.as_fd());
    }

    fn wait(&self) -> Result<WakeReason> {
        if self.shutdown_requested.load(Ordering::Acquire) {
            return Ok(WakeReason::Shutdown);
        }

        loop {
            let mut fds = [
                PollFd::new(self.fifo.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.shutdown_read.as_fd(), PollFlags::POLLIN),
            ];

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(0) => continue, // spurious
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(WakeError::Io(e.into())),
            }

            // Shutdown wins over a concurrent commit signal. The
            // shutdown pipe is never drained, so every later wait()
            // returns immediately.
            let shutdown = fds[1]
                .revents()
                .map(|r| !r.is_empty())
                .unwrap_or(false);
            if shutdown {
                return Ok(WakeReason::Shutdown);
            }

            let commit = fds[0]
                .revents()
                .map(|r| r.contains(PollFlags::POLLIN))
                .unwrap_or(false);
            if commit {
                // Drain what's there so poll() blocks again next time.
                // One read is enough: anything written after this read
                // re-arms the poll.
                let mut buf = [0u8; 1024];
                let _ = unistd::read(self.fifo.as_fd(), &mut buf);
                return Ok(WakeReason::Commit);
            }

            // Neither fd was the culprit (e.g. POLLHUP on the FIFO from
            // a peer closing); treat as spurious and wait again
        }
    }

    fn request_shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::AcqRel) {
            Self::notify_fd(self.shutdown_write.as_fd());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
