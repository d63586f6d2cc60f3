//! Cache of services shared across clusters.
//!
//! Maps every global service to the remote clusters currently advertising it
//! together with each cluster's view of the service. One service watcher per
//! remote cluster mutates the cache; different remotes touching the same
//! service are serialized by the per-shard locks of the underlying map, so
//! hot services shared by many clusters do not contend on a global lock.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::debug;

use crate::metrics::MeshMetrics;
use crate::types::ClusterService;
use crate::types::ServiceId;

/// One global service and the clusters contributing to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalService {
    /// Per-cluster view, keyed by cluster name.
    pub cluster_services: BTreeMap<String, ClusterService>,
}

/// Result of removing a (cluster, service) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The pair was not present.
    NotFound,
    /// The pair was removed; other clusters still advertise the service.
    Removed,
    /// The pair was removed and it was the last contributor, so the service is
    /// no longer globally available.
    ServiceRemoved,
}

/// Concurrent cache of global services.
#[derive(Debug)]
pub struct GlobalServiceCache {
    services: DashMap<ServiceId, GlobalService>,
    per_cluster: DashMap<String, usize>,
    metrics: MeshMetrics,
}

impl GlobalServiceCache {
    /// Create an empty cache reporting through `metrics`.
    pub fn new(metrics: MeshMetrics) -> Self {
        Self {
            services: DashMap::new(),
            per_cluster: DashMap::new(),
            metrics,
        }
    }

    /// Insert or replace `cluster_name`'s view of `service`.
    ///
    /// Returns true if the pair was not present before.
    pub fn upsert(&self, cluster_name: &str, service: ClusterService) -> bool {
        let id = service.service_id();
        let inserted = {
            let mut global = self.services.entry(id.clone()).or_default();
            global.cluster_services.insert(cluster_name.to_string(), service).is_none()
        };

        if inserted {
            let count = {
                let mut count = self.per_cluster.entry(cluster_name.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            self.metrics.set_remote_cluster_services(cluster_name, count);
            debug!(service = %id, remote_cluster = cluster_name, "added cluster to global service");
        } else {
            debug!(service = %id, remote_cluster = cluster_name, "updated global service");
        }
        self.metrics.set_global_services(self.size());
        inserted
    }

    /// Remove `cluster_name`'s view of `service_id`.
    ///
    /// Removing an absent pair is a no-op: watch streams may redeliver
    /// deletions after a restart.
    pub fn remove(&self, cluster_name: &str, service_id: &ServiceId) -> RemoveOutcome {
        let mut removed = false;
        let emptied = self.services.remove_if_mut(service_id, |_, global| {
            removed = global.cluster_services.remove(cluster_name).is_some();
            global.cluster_services.is_empty()
        });

        if !removed {
            debug!(service = %service_id, remote_cluster = cluster_name, "ignoring removal of unknown global service entry");
            return RemoveOutcome::NotFound;
        }

        let remaining = {
            let remaining = match self.per_cluster.get_mut(cluster_name) {
                Some(mut count) => {
                    *count = count.saturating_sub(1);
                    *count
                }
                None => 0,
            };
            if remaining == 0 {
                self.per_cluster.remove_if(cluster_name, |_, count| *count == 0);
            }
            remaining
        };
        self.metrics.set_remote_cluster_services(cluster_name, remaining);
        self.metrics.set_global_services(self.size());

        if emptied.is_some() {
            debug!(service = %service_id, remote_cluster = cluster_name, "removed global service");
            RemoveOutcome::ServiceRemoved
        } else {
            debug!(service = %service_id, remote_cluster = cluster_name, "removed cluster from global service");
            RemoveOutcome::Removed
        }
    }

    /// Number of distinct global services.
    pub fn size(&self) -> usize {
        self.services.len()
    }

    /// Returns true if any cluster advertises `service_id`.
    pub fn contains(&self, service_id: &ServiceId) -> bool {
        self.services.contains_key(service_id)
    }

    /// Snapshot of a global service.
    pub fn get(&self, service_id: &ServiceId) -> Option<GlobalService> {
        self.services.get(service_id).map(|global| global.clone())
    }

    /// Number of services contributed by `cluster_name`.
    pub fn services_for_cluster(&self, cluster_name: &str) -> usize {
        self.per_cluster.get(cluster_name).map(|count| *count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(cluster: &str, backend: &str) -> ClusterService {
        let mut svc = ClusterService {
            cluster: cluster.to_string(),
            namespace: "ns".to_string(),
            name: "svc".to_string(),
            frontends: BTreeMap::new(),
            backends: BTreeMap::new(),
            labels: BTreeMap::new(),
            shared: true,
            include_external: false,
            cluster_id: 1,
        };
        svc.backends.insert(backend.to_string(), BTreeMap::new());
        svc
    }

    fn cache() -> GlobalServiceCache {
        GlobalServiceCache::new(MeshMetrics::new("local", "node-1"))
    }

    #[test]
    fn test_upsert_same_pair_replaces() {
        let cache = cache();
        let id = ServiceId::new("ns", "svc");
        assert!(cache.upsert("eu-west", service("eu-west", "10.0.0.1")));
        assert!(!cache.upsert("eu-west", service("eu-west", "10.0.0.2")));

        let global = cache.get(&id).unwrap();
        assert_eq!(global.cluster_services.len(), 1);
        assert!(global.cluster_services["eu-west"].backends.contains_key("10.0.0.2"));
        assert_eq!(cache.services_for_cluster("eu-west"), 1);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_last_contributor_removes_service() {
        let cache = cache();
        let id = ServiceId::new("ns", "svc");
        cache.upsert("eu-west", service("eu-west", "10.0.0.1"));
        cache.upsert("us-east", service("us-east", "10.1.0.1"));

        assert_eq!(cache.remove("eu-west", &id), RemoveOutcome::Removed);
        assert!(cache.contains(&id));
        assert_eq!(cache.size(), 1);

        assert_eq!(cache.remove("us-east", &id), RemoveOutcome::ServiceRemoved);
        assert!(!cache.contains(&id));
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.services_for_cluster("us-east"), 0);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let cache = cache();
        let id = ServiceId::new("ns", "svc");
        assert_eq!(cache.remove("eu-west", &id), RemoveOutcome::NotFound);

        cache.upsert("us-east", service("us-east", "10.1.0.1"));
        assert_eq!(cache.remove("eu-west", &id), RemoveOutcome::NotFound);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.services_for_cluster("us-east"), 1);
    }

    #[test]
    fn test_concurrent_clusters_same_service() {
        let cache = std::sync::Arc::new(cache());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let cluster = format!("cluster-{i}");
                    for _ in 0..100 {
                        cache.upsert(&cluster, service(&cluster, "10.0.0.1"));
                        cache.remove(&cluster, &ServiceId::new("ns", "svc"));
                    }
                    cache.upsert(&cluster, service(&cluster, "10.0.0.1"));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let global = cache.get(&ServiceId::new("ns", "svc")).unwrap();
        assert_eq!(global.cluster_services.len(), 8);
        assert_eq!(cache.size(), 1);
    }
}
