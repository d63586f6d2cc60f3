//! Cluster mesh metrics.
//!
//! Recorded through the `metrics` facade; when no recorder is installed
//! every call is a no-op. Failing to record is never a correctness failure.

use metrics::Gauge;
use metrics::gauge;

/// Distinct global services.
pub const GLOBAL_SERVICES: &str = "clustermesh_global_services";
/// Registered remote clusters.
pub const REMOTE_CLUSTERS: &str = "clustermesh_remote_clusters";
/// Services contributed by one remote cluster.
pub const REMOTE_CLUSTER_SERVICES: &str = "clustermesh_remote_cluster_services";
/// Node entries learned from one remote cluster.
pub const REMOTE_CLUSTER_NODES: &str = "clustermesh_remote_cluster_nodes";
/// Connection failures of one remote cluster.
pub const REMOTE_CLUSTER_FAILURES: &str = "clustermesh_remote_cluster_failures";

/// Metric handles labelled with the local cluster and node.
#[derive(Debug, Clone)]
pub struct MeshMetrics {
    source_cluster: String,
    source_node_name: String,
}

impl MeshMetrics {
    /// Create metrics labelled with the local cluster name and node name.
    pub fn new(source_cluster: impl Into<String>, source_node_name: impl Into<String>) -> Self {
        Self {
            source_cluster: source_cluster.into(),
            source_node_name: source_node_name.into(),
        }
    }

    /// Record the number of distinct global services.
    pub fn set_global_services(&self, count: usize) {
        gauge!(
            GLOBAL_SERVICES,
            "source_cluster" => self.source_cluster.clone(),
            "source_node_name" => self.source_node_name.clone()
        )
        .set(count as f64);
    }

    /// Record the number of registered remote clusters.
    pub fn set_remote_clusters(&self, count: usize) {
        gauge!(
            REMOTE_CLUSTERS,
            "source_cluster" => self.source_cluster.clone(),
            "source_node_name" => self.source_node_name.clone()
        )
        .set(count as f64);
    }

    /// Record the number of services contributed by `target_cluster`.
    pub fn set_remote_cluster_services(&self, target_cluster: &str, count: usize) {
        self.remote_gauge(REMOTE_CLUSTER_SERVICES, target_cluster).set(count as f64);
    }

    /// Record the number of connection failures of `target_cluster`.
    pub fn set_remote_cluster_failures(&self, target_cluster: &str, count: u32) {
        self.remote_gauge(REMOTE_CLUSTER_FAILURES, target_cluster).set(count as f64);
    }

    /// Gauge tracking node entries learned from `target_cluster`.
    pub fn remote_cluster_nodes(&self, target_cluster: &str) -> Gauge {
        self.remote_gauge(REMOTE_CLUSTER_NODES, target_cluster)
    }

    fn remote_gauge(&self, name: &'static str, target_cluster: &str) -> Gauge {
        gauge!(
            name,
            "source_cluster" => self.source_cluster.clone(),
            "source_node_name" => self.source_node_name.clone(),
            "target_cluster" => target_cluster.to_string()
        )
    }
}
