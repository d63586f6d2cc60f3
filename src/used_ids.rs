//! Registry of cluster IDs held by connected remote clusters.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::ClusterIdError;

/// Set of cluster IDs currently reserved by remote clusters.
///
/// Guarantees that no two connected remotes hold the same ID. ID 0 means
/// "no cluster mesh" and is never passed here.
#[derive(Debug, Default)]
pub struct ClusterIdRegistry {
    used: Mutex<HashSet<u32>>,
}

impl ClusterIdRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `cluster_id`, failing without side effects if it is taken.
    pub fn reserve(&self, cluster_id: u32) -> Result<(), ClusterIdError> {
        let mut used = self.used.lock();
        if !used.insert(cluster_id) {
            return Err(ClusterIdError::AlreadyUsed { cluster_id });
        }
        debug!(cluster_id, "reserved cluster ID");
        Ok(())
    }

    /// Release `cluster_id`. Releasing an unreserved ID is a no-op.
    pub fn release(&self, cluster_id: u32) {
        if self.used.lock().remove(&cluster_id) {
            debug!(cluster_id, "released cluster ID");
        }
    }

    /// Returns true if `cluster_id` is currently reserved.
    pub fn is_reserved(&self, cluster_id: u32) -> bool {
        self.used.lock().contains(&cluster_id)
    }

    /// Number of reserved IDs.
    pub fn len(&self) -> usize {
        self.used.lock().len()
    }

    /// Returns true if no ID is reserved.
    pub fn is_empty(&self) -> bool {
        self.used.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_duplicate_fails() {
        let ids = ClusterIdRegistry::new();
        ids.reserve(7).unwrap();
        assert_eq!(ids.reserve(7), Err(ClusterIdError::AlreadyUsed { cluster_id: 7 }));
        assert!(ids.is_reserved(7));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_release_then_reserve_again() {
        let ids = ClusterIdRegistry::new();
        ids.reserve(3).unwrap();
        ids.release(3);
        assert!(!ids.is_reserved(3));
        ids.reserve(3).unwrap();
    }

    #[test]
    fn test_release_unreserved_is_noop() {
        let ids = ClusterIdRegistry::new();
        ids.release(42);
        assert!(ids.is_empty());
    }

    #[test]
    fn test_concurrent_reserve_single_winner() {
        let ids = std::sync::Arc::new(ClusterIdRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || ids.reserve(9).is_ok())
            })
            .collect();
        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(winners, 1);
    }
}
