//! Tests for the test-only cache reset
//!
//! Kept in their own binary: `reset_all` tears down every coordinator
//! in the process and would interfere with suites running in parallel
//! threads of the same test binary.

use tempfile::TempDir;

use wakeline::{Handle, InstanceCache, LiveUpdatePolicy, OpenOptions};

#[test]
fn test_reset_all_tears_down_every_coordinator() {
    let temp = TempDir::new().unwrap();
    let opts = OpenOptions::builder()
        .live_updates(LiveUpdatePolicy::Disabled)
        .build();

    let h1 = Handle::open_with(&temp.path().join("a.db"), opts.clone()).unwrap();
    let h2 = Handle::open_with(&temp.path().join("b.db"), opts).unwrap();

    let cache = InstanceCache::global();
    assert_eq!(cache.len(), 2);

    cache.reset_all();
    assert!(cache.is_empty());

    // Handles hold their own references and keep working; they just
    // belong to orphaned coordinators now
    h1.commit().unwrap();
    assert_eq!(h2.refresh().unwrap().0, 0); // b.db is untouched
}
