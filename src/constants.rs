//! Fixed limits and well-known values for the cluster mesh.
//!
//! Tiger Style: every bound the mesh enforces lives here so resource usage
//! stays predictable as the number of remote clusters grows.

/// Cluster ID reserved for "no cluster mesh configured".
pub const CLUSTER_ID_UNSET: u32 = 0;

/// Smallest cluster ID a remote (or the local cluster) may hold.
pub const CLUSTER_ID_MIN: u32 = 1;

/// Default upper bound on cluster IDs and on connected remote clusters.
pub const DEFAULT_MAX_CONNECTED_CLUSTERS: u32 = 255;

/// Extended upper bound on cluster IDs, trading identity bits for more clusters.
pub const EXTENDED_MAX_CONNECTED_CLUSTERS: u32 = 511;

/// Key prefix under which remote clusters publish their node entries.
pub const NODES_KEY_PREFIX: &str = "cilium/state/nodes/v1";

/// Key prefix under which remote clusters publish their shared services.
pub const SERVICES_KEY_PREFIX: &str = "cilium/state/services/v1";

/// Key prefix under which remote clusters publish IP to identity mappings.
pub const IP_IDENTITIES_KEY_PREFIX: &str = "cilium/state/ip/v1";

/// Maximum length of a remote cluster name.
pub const MAX_CLUSTER_NAME_LEN: usize = 32;
