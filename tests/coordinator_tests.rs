//! Tests for coordinator lookup and lifecycle
//!
//! These tests verify:
//! - One coordinator per canonical path, even under concurrent opens
//! - Lazy listener startup (no thread for open-and-close)
//! - Clean teardown with concurrent notifications
//! - Open-options identity conflicts

use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use tempfile::TempDir;

use wakeline::{
    Handle, LiveUpdatePolicy, OpenOptions, TransportKind, WakeError, WorkerContext,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    (temp_dir, path)
}

fn opts(policy: LiveUpdatePolicy) -> OpenOptions {
    OpenOptions::builder().live_updates(policy).build()
}

// =============================================================================
// Identity Tests
// =============================================================================

#[test]
fn test_single_coordinator_per_path_under_concurrent_opens() {
    let (_temp, path) = setup_temp_db();
    const K: usize = 8;

    let barrier = Arc::new(Barrier::new(K));
    let mut threads = Vec::new();
    for _ in 0..K {
        let barrier = barrier.clone();
        let path = path.clone();
        threads.push(std::thread::spawn(move || {
            barrier.wait();
            let handle = Handle::open_with(&path, opts(LiveUpdatePolicy::Disabled)).unwrap();
            let coordinator = handle.coordinator().clone();
            // Hold the handle until everyone has opened, so no thread
            // races an eviction in between
            barrier.wait();
            drop(handle);
            coordinator
        }));
    }

    let coordinators: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    for other in &coordinators[1..] {
        assert!(Arc::ptr_eq(&coordinators[0], other));
    }
}

#[test]
fn test_mismatched_transport_rejected() {
    let (_temp, path) = setup_temp_db();

    let _h1 = Handle::open_with(&path, opts(LiveUpdatePolicy::Disabled)).unwrap();

    let conflicting = OpenOptions::builder()
        .transport(TransportKind::EngineWait)
        .live_updates(LiveUpdatePolicy::Disabled)
        .build();
    let result = Handle::open_with(&path, conflicting);

    assert!(matches!(result, Err(WakeError::MismatchedOptions(_))));
}

#[test]
fn test_mismatched_read_only_rejected() {
    let (_temp, path) = setup_temp_db();

    let _h1 = Handle::open_with(&path, opts(LiveUpdatePolicy::Disabled)).unwrap();

    let conflicting = OpenOptions::builder()
        .read_only(true)
        .live_updates(LiveUpdatePolicy::Disabled)
        .build();
    let result = Handle::open_with(&path, conflicting);

    assert!(matches!(result, Err(WakeError::MismatchedOptions(_))));
}

// =============================================================================
// Lazy Listener Tests
// =============================================================================

#[test]
fn test_open_close_spawns_no_listener() {
    let (_temp, path) = setup_temp_db();

    // An existence-check style open: in and out without registering
    let handle = Handle::open_with(&path, opts(LiveUpdatePolicy::Disabled)).unwrap();
    assert!(!handle.coordinator().listener_started());
    assert!(!handle.coordinator().listener_running());
    drop(handle);
}

#[test]
fn test_listener_starts_on_first_registration() {
    let (_temp, path) = setup_temp_db();
    let _ctx = WorkerContext::install_for_current_thread();

    let handle = Handle::open_with(&path, opts(LiveUpdatePolicy::Required)).unwrap();
    assert!(handle.coordinator().listener_started());
    assert!(handle.coordinator().listener_running());
    assert_eq!(handle.coordinator().registered_count(), 1);
    assert!(handle.coordinator().listener_fault().is_none());
}

// =============================================================================
// Teardown Tests
// =============================================================================

#[test]
fn test_coordinator_destroyed_after_last_handle() {
    let (_temp, path) = setup_temp_db();
    let _ctx = WorkerContext::install_for_current_thread();

    let handle = Handle::open_with(&path, opts(LiveUpdatePolicy::Required)).unwrap();
    let weak = Arc::downgrade(handle.coordinator());

    drop(handle);
    // Eviction dropped the cache's reference; ours was weak
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_teardown_with_concurrent_notifications() {
    let (_temp, path) = setup_temp_db();
    let _ctx = WorkerContext::install_for_current_thread();

    let handle = Handle::open_with(&path, opts(LiveUpdatePolicy::Required)).unwrap();
    let coordinator = handle.coordinator().clone();

    // Hammer on_local_commit from another thread while the last handle
    // closes; teardown must neither deadlock nor panic
    let hammer = std::thread::spawn(move || {
        for _ in 0..200 {
            coordinator.on_local_commit();
            std::thread::sleep(Duration::from_micros(100));
        }
        coordinator
    });

    std::thread::sleep(Duration::from_millis(5));
    let weak = Arc::downgrade(handle.coordinator());
    drop(handle);

    let coordinator = hammer.join().unwrap();
    drop(coordinator);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_unregister_during_dispatch_is_safe() {
    let (_temp, path) = setup_temp_db();
    let ctx = WorkerContext::install_for_current_thread();

    let live = Handle::open_with(&path, opts(LiveUpdatePolicy::Required)).unwrap();
    let committer = Handle::open_with(&path, opts(LiveUpdatePolicy::Disabled)).unwrap();

    // Interleave commits (which sweep the registry) with open/close of
    // more handles on this thread
    for _ in 0..20 {
        let extra = Handle::open_with(&path, opts(LiveUpdatePolicy::Required)).unwrap();
        committer.commit().unwrap();
        drop(extra);
        ctx.run_pending();
    }

    live.refresh().unwrap();
    assert!(live.version() >= wakeline::VersionId(20));
}
