//! Property-based tests for the cluster mesh bookkeeping.
//!
//! Verifies that the cluster ID registry and the global service cache agree
//! with a simple sequential model under arbitrary operation sequences.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashSet;

use aspen_clustermesh::ClusterIdError;
use aspen_clustermesh::ClusterIdRegistry;
use aspen_clustermesh::ClusterService;
use aspen_clustermesh::GlobalServiceCache;
use aspen_clustermesh::RemoveOutcome;
use aspen_clustermesh::ServiceId;
use aspen_clustermesh::config::validate_cluster_id;
use aspen_clustermesh::metrics::MeshMetrics;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum IdOp {
    Reserve(u32),
    Release(u32),
}

fn id_op() -> impl Strategy<Value = IdOp> {
    prop_oneof![(1u32..16).prop_map(IdOp::Reserve), (1u32..16).prop_map(IdOp::Release),]
}

#[derive(Debug, Clone)]
enum ServiceOp {
    Upsert { cluster: usize, service: usize },
    Remove { cluster: usize, service: usize },
}

fn service_op() -> impl Strategy<Value = ServiceOp> {
    prop_oneof![
        (0usize..4, 0usize..4).prop_map(|(cluster, service)| ServiceOp::Upsert { cluster, service }),
        (0usize..4, 0usize..4).prop_map(|(cluster, service)| ServiceOp::Remove { cluster, service }),
    ]
}

fn cluster_service(cluster: &str, name: &str) -> ClusterService {
    ClusterService {
        cluster: cluster.to_string(),
        namespace: "default".to_string(),
        name: name.to_string(),
        frontends: Default::default(),
        backends: Default::default(),
        labels: Default::default(),
        shared: true,
        include_external: false,
        cluster_id: 0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Reservations never hand out an ID twice and releases make it reusable.
    #[test]
    fn prop_registry_matches_model(ops in prop::collection::vec(id_op(), 0..64)) {
        let registry = ClusterIdRegistry::new();
        let mut model: HashSet<u32> = HashSet::new();

        for op in ops {
            match op {
                IdOp::Reserve(id) => {
                    let result = registry.reserve(id);
                    if model.insert(id) {
                        prop_assert_eq!(result, Ok(()));
                    } else {
                        prop_assert_eq!(result, Err(ClusterIdError::AlreadyUsed { cluster_id: id }));
                    }
                }
                IdOp::Release(id) => {
                    registry.release(id);
                    model.remove(&id);
                }
            }
            prop_assert_eq!(registry.len(), model.len());
        }

        for id in 1u32..16 {
            prop_assert_eq!(registry.is_reserved(id), model.contains(&id));
        }
    }

    /// A service is present exactly while at least one cluster advertises it.
    #[test]
    fn prop_global_services_match_model(ops in prop::collection::vec(service_op(), 0..64)) {
        let cache = GlobalServiceCache::new(MeshMetrics::new("local", "node-0"));
        let mut model: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for op in ops {
            match op {
                ServiceOp::Upsert { cluster, service } => {
                    let (cluster, name) = (format!("c{}", cluster), format!("s{}", service));
                    cache.upsert(&cluster, cluster_service(&cluster, &name));
                    model.entry(name).or_default().insert(cluster);
                }
                ServiceOp::Remove { cluster, service } => {
                    let (cluster, name) = (format!("c{}", cluster), format!("s{}", service));
                    let outcome = cache.remove(&cluster, &ServiceId::new("default", name.as_str()));

                    let expected = match model.get_mut(&name) {
                        Some(clusters) if clusters.contains(&cluster) => {
                            clusters.remove(&cluster);
                            if clusters.is_empty() {
                                model.remove(&name);
                                RemoveOutcome::ServiceRemoved
                            } else {
                                RemoveOutcome::Removed
                            }
                        }
                        _ => RemoveOutcome::NotFound,
                    };
                    prop_assert_eq!(outcome, expected);
                }
            }
            prop_assert_eq!(cache.size(), model.len());
        }

        for (name, clusters) in &model {
            let service = cache.get(&ServiceId::new("default", name.as_str()));
            prop_assert!(service.is_some());
            let contributors: BTreeSet<String> = service.unwrap().cluster_services.into_keys().collect();
            prop_assert_eq!(&contributors, clusters);
        }
    }

    /// Cluster IDs are accepted exactly within `1..=max`.
    #[test]
    fn prop_cluster_id_range(id in 0u32..1024, extended in any::<bool>()) {
        let max = if extended { 511 } else { 255 };
        prop_assert_eq!(validate_cluster_id(id, max).is_ok(), id >= 1 && id <= max);
    }
}
