//! Versioned File
//!
//! The storage-engine collaborator: a shared, on-disk version counter
//! standing in for the multi-version storage engine's "current version"
//! state. Commits from any process serialize on an advisory whole-file
//! lock, so every reader observes a single monotonic version sequence.
//!
//! ## On-disk format (16 bytes)
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────┐
//! │ magic u32│   version u64    │ crc32    │
//! │  (LE)    │      (LE)        │ (LE)     │
//! └──────────┴──────────────────┴──────────┘
//! ```
//!
//! The CRC covers the magic and version fields and catches torn or
//! foreign writes to the rendezvous file.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, WakeError};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes identifying a wakeline version file ("WKV1")
const MAGIC: u32 = 0x3156_4B57;

/// Total record size in bytes
const RECORD_LEN: usize = 16;

// =============================================================================
// VersionId
// =============================================================================

/// Identifier of a committed version. Monotonically increasing per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VersionId(pub u64);

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// VersionedFile trait
// =============================================================================

/// Interface the notification subsystem requires from the storage engine.
///
/// `advance_to_latest` is monotonic: the returned version is always
/// equal to or newer than every version previously returned for the
/// same object.
pub trait VersionedFile: Send + Sync {
    /// Last version this object has observed (no I/O)
    fn current_version(&self) -> VersionId;

    /// Re-read the shared state and advance the observed version
    fn advance_to_latest(&self) -> Result<VersionId>;

    /// Commit a write, producing a new version
    fn commit_write(&self) -> Result<VersionId>;
}

// =============================================================================
// Advisory lock guard
// =============================================================================

/// Holds a flock(2) advisory lock on a file; unlocks on drop.
struct FlockGuard<'a> {
    file: &'a File,
}

impl<'a> FlockGuard<'a> {
    /// Acquire the lock, blocking until available
    fn acquire(file: &'a File, exclusive: bool) -> io::Result<Self> {
        let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
        // SAFETY: fd is valid for the lifetime of `file`
        let ret = unsafe { libc::flock(file.as_raw_fd(), op) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { file })
    }
}

impl Drop for FlockGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: fd is still open; unlock cannot meaningfully fail here
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

// =============================================================================
// SharedVersionFile
// =============================================================================

/// File-backed version counter shared between threads and processes
///
/// ## Concurrency:
/// - `seen`: the highest version this object has observed (atomic, lock-free)
/// - On-disk record: two-tier locking. The in-process mutex serializes
///   threads sharing this instance; flock(2) serializes across
///   processes (and across other instances in this process)
/// - All methods take `&self`
pub struct SharedVersionFile {
    /// Path to the version file
    path: PathBuf,

    /// Open file handle (position-independent access via pread/pwrite)
    file: File,

    /// Serializes this instance's flock critical sections. flock(2)
    /// locks belong to the open file description, not the thread, so
    /// threads sharing this fd cannot exclude each other with flock
    /// alone.
    lock: Mutex<()>,

    /// Highest version observed so far (monotonic)
    seen: AtomicU64,

    /// Whether commits are forbidden
    read_only: bool,
}

impl SharedVersionFile {
    /// Open or create a version file at the given path
    ///
    /// On creation the record is initialized to version 0 under an
    /// exclusive lock, so two racing creators cannot both write it.
    pub fn open_or_create(path: &Path, read_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)?;

        let this = Self {
            path: path.to_path_buf(),
            file,
            lock: Mutex::new(()),
            seen: AtomicU64::new(0),
            read_only,
        };

        // Initialize an empty file; re-check length under the lock in
        // case another process won the race.
        if !read_only && this.file.metadata()?.len() == 0 {
            let _serial = this.lock.lock();
            let _guard = FlockGuard::acquire(&this.file, true)?;
            if this.file.metadata()?.len() == 0 {
                this.write_record(0)?;
                this.file.sync_data()?;
            }
        }

        // Pick up whatever version is already on disk
        this.advance_to_latest()?;
        Ok(this)
    }

    /// Path this version file was opened at
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file was opened read-only
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    // =========================================================================
    // Record I/O (lock must be held by the caller)
    // =========================================================================

    /// Read and validate the on-disk record
    fn read_record(&self) -> Result<u64> {
        let mut buf = [0u8; RECORD_LEN];
        if let Err(e) = self.file.read_exact_at(&mut buf, 0) {
            // A zero-length file means a writer has not initialized it
            // yet; treat it as version 0.
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(0);
            }
            return Err(e.into());
        }

        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let version = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let crc = u32::from_le_bytes(buf[12..16].try_into().unwrap());

        if magic != MAGIC {
            return Err(WakeError::Corruption(format!(
                "bad magic {:#010x} in {}",
                magic,
                self.path.display()
            )));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[0..12]);
        if hasher.finalize() != crc {
            return Err(WakeError::Corruption(format!(
                "crc mismatch in {}",
                self.path.display()
            )));
        }

        Ok(version)
    }

    /// Write the record for the given version
    fn write_record(&self, version: u64) -> Result<()> {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..12].copy_from_slice(&version.to_le_bytes());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[0..12]);
        buf[12..16].copy_from_slice(&hasher.finalize().to_le_bytes());

        self.file.write_all_at(&buf, 0)?;
        Ok(())
    }

    /// Advance `seen` to at least `version` and return the result
    fn observe(&self, version: u64) -> VersionId {
        let prev = self.seen.fetch_max(version, Ordering::AcqRel);
        VersionId(prev.max(version))
    }
}

impl VersionedFile for SharedVersionFile {
    fn current_version(&self) -> VersionId {
        VersionId(self.seen.load(Ordering::Acquire))
    }

    fn advance_to_latest(&self) -> Result<VersionId> {
        // A sibling thread taking the shared flock on this fd would
        // silently downgrade a commit's exclusive lock; serialize first
        let _serial = self.lock.lock();
        let _guard = FlockGuard::acquire(&self.file, false)?;
        let disk = self.read_record()?;
        Ok(self.observe(disk))
    }

    fn commit_write(&self) -> Result<VersionId> {
        if self.read_only {
            return Err(WakeError::Storage(format!(
                "cannot commit to read-only file {}",
                self.path.display()
            )));
        }

        // Step 1: Serialize threads sharing this instance; flock on a
        // shared fd is granted to all of them at once
        let _serial = self.lock.lock();

        // Step 2: Take the exclusive lock so commits serialize across
        // processes and other instances
        let _guard = FlockGuard::acquire(&self.file, true)?;

        // Step 3: Read-modify-write the version record
        let next = self.read_record()? + 1;
        self.write_record(next)?;

        // Step 4: Make the new version durable before anyone is woken
        self.file.sync_data()?;

        Ok(self.observe(next))
    }
}

// =============================================================================
// Tests
// =============================================================================
