//! Status snapshots reported by the cluster mesh.

use serde::Serialize;

use crate::synced::SyncedStatus;

/// Connection state of a remote, as tracked by the connection layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// A backend is attached and its watchers are running.
    pub connected: bool,
    /// The connection is healthy and the remote's cluster ID is reserved.
    pub ready: bool,
    /// Number of connection failures since registration.
    pub num_failures: u32,
    /// Most recent failure, if any.
    pub last_failure: Option<String>,
}

/// Status of one remote cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteClusterStatus {
    /// Remote cluster name.
    pub name: String,
    /// Reserved cluster ID, if any.
    pub cluster_id: Option<u32>,
    /// A backend is attached.
    pub connected: bool,
    /// The remote is healthy and usable.
    pub ready: bool,
    /// Number of connection failures.
    pub num_failures: u32,
    /// Most recent failure, if any.
    pub last_failure: Option<String>,
    /// Node entries learned from the remote.
    pub num_nodes: usize,
    /// Services the remote contributes to the global service cache.
    pub num_shared_services: usize,
    /// IP to identity mappings learned from the remote.
    pub num_ip_entries: usize,
    /// Initial sync state per resource kind.
    pub synced: SyncedStatus,
    /// Human readable summary.
    pub status: String,
}

/// Aggregate status of the cluster mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterMeshStatus {
    /// Distinct global services.
    pub num_global_services: usize,
    /// One entry per registered remote, sorted by name.
    pub clusters: Vec<RemoteClusterStatus>,
}

impl ClusterMeshStatus {
    /// Number of remotes reporting ready.
    pub fn num_ready(&self) -> usize {
        self.clusters.iter().filter(|c| c.ready).count()
    }
}
