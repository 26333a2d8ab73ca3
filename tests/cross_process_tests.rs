//! Cross-process notification tests
//!
//! Spawns the `wakeline` binary as a second process committing to the
//! same file; the named FIFO is the only channel between the two.

use std::process::Command;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use wakeline::{Handle, LiveUpdatePolicy, OpenOptions, VersionId, WorkerContext};

#[test]
fn test_subprocess_commit_wakes_watcher() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("shared.db");

    let ctx = WorkerContext::install_for_current_thread();
    let handle = Handle::open_with(
        &path,
        OpenOptions::builder()
            .live_updates(LiveUpdatePolicy::Required)
            .build(),
    )
    .unwrap();
    assert_eq!(handle.version(), VersionId(0));

    // The child signals through the rendezvous FIFO; nothing in this
    // process calls on_local_commit
    let status = Command::new(env!("CARGO_BIN_EXE_wakeline"))
        .arg("commit")
        .arg(&path)
        .args(["--count", "3"])
        .status()
        .expect("failed to spawn wakeline binary");
    assert!(status.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.version() < VersionId(3) && Instant::now() < deadline {
        ctx.run_one(Duration::from_millis(50));
    }

    assert_eq!(handle.version(), VersionId(3));
    assert!(handle.wakes_handled() >= 1);
}
