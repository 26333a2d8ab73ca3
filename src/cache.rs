//! Instance cache
//!
//! Process-wide map from canonical file path to its coordinator. All
//! coordinator lookup and lifecycle flows through here; there are no
//! other process-level globals in the crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::config::OptionsIdentity;
use crate::coordinator::InstanceCoordinator;
use crate::error::{Result, WakeError};

/// Global coordinator cache
///
/// ## Invariant
/// At most one coordinator exists per canonical path at a time;
/// concurrent opens converge on the same instance because creation is
/// serialized under the map's mutex.
pub struct InstanceCache {
    coordinators: Mutex<HashMap<PathBuf, Arc<InstanceCoordinator>>>,
}

impl InstanceCache {
    /// The process-wide cache
    pub fn global() -> &'static InstanceCache {
        static CACHE: OnceLock<InstanceCache> = OnceLock::new();
        CACHE.get_or_init(|| InstanceCache {
            coordinators: Mutex::new(HashMap::new()),
        })
    }

    /// Find or create the coordinator for a canonical path
    ///
    /// The returned coordinator already counts the caller as a live
    /// handle (attach happens under the map lock), so a concurrent
    /// close of the path's last other handle cannot evict it from
    /// underneath the caller. The caller must balance with
    /// `detach_handle` + `remove_if_unreferenced`.
    pub(crate) fn get_or_create(
        &self,
        canonical: &Path,
        identity: OptionsIdentity,
    ) -> Result<Arc<InstanceCoordinator>> {
        let mut map = self.coordinators.lock();

        let coordinator = match map.get(canonical) {
            Some(existing) => {
                if existing.identity() != identity {
                    return Err(WakeError::MismatchedOptions(format!(
                        "{} is already open with {:?}",
                        canonical.display(),
                        existing.identity()
                    )));
                }
                existing.clone()
            }
            None => {
                let created = InstanceCoordinator::new(canonical.to_path_buf(), identity);
                map.insert(canonical.to_path_buf(), created.clone());
                created
            }
        };

        coordinator.attach_handle();
        Ok(coordinator)
    }

    /// Evict the path's coordinator if no handle references it anymore
    ///
    /// Called opportunistically on handle close. A no-op when another
    /// handle raced in: the live-handle count is re-checked under the
    /// same lock `get_or_create` attaches under.
    pub fn remove_if_unreferenced(&self, canonical: &Path) {
        let removed = {
            let mut map = self.coordinators.lock();
            match map.get(canonical) {
                Some(c) if c.live_handles() == 0 => map.remove(canonical),
                _ => None,
            }
        };
        // Dropping outside the lock: this joins the listener thread
        drop(removed);
    }

    /// Tear down every coordinator. Test-only escape hatch; must not be
    /// called while handles are live.
    pub fn reset_all(&self) {
        let drained: Vec<_> = {
            let mut map = self.coordinators.lock();
            map.drain().map(|(_, c)| c).collect()
        };
        for coordinator in drained {
            if coordinator.live_handles() != 0 {
                tracing::warn!(
                    "reset_all tearing down {} with {} live handles",
                    coordinator.path().display(),
                    coordinator.live_handles()
                );
            }
        }
    }

    // =========================================================================
    // Accessors (for testing and diagnostics)
    // =========================================================================

    /// Number of cached coordinators
    pub fn len(&self) -> usize {
        self.coordinators.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.lock().is_empty()
    }

    /// The coordinator for a path, if one is currently cached
    pub fn get_existing(&self, canonical: &Path) -> Option<Arc<InstanceCoordinator>> {
        self.coordinators.lock().get(canonical).cloned()
    }
}
