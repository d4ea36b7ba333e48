//! Per-volume operation locks
//!
//! Publish and unpublish for the same volume id are serialized; different
//! volumes proceed in parallel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Registry of exclusive locks keyed by volume id
#[derive(Debug, Default)]
pub struct VolumeLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held lock on one volume id
pub struct VolumeGuard {
    _guard: OwnedMutexGuard<()>,
}

impl VolumeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `volume_id`.
    pub async fn lock(&self, volume_id: &str) -> VolumeGuard {
        let lock = {
            let mut locks = self.locks.lock();
            // Drop entries nobody holds or waits on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(volume_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        debug!("Waiting for lock on volume {}", volume_id);
        VolumeGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of volume ids currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
