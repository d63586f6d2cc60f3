//! Multi-cluster state orchestration.
//!
//! Connects a local cluster to a set of remote clusters and keeps a local view
//! of what each remote publishes:
//!
//! - Remote nodes, forwarded to a [`traits::Observer`]
//! - Shared services, aggregated in the [`GlobalServiceCache`] and merged
//!   through a [`traits::ServiceMerger`]
//! - IP to identity mappings, forwarded to a [`traits::IpCacheSink`]
//! - Remote identities, delegated to a [`traits::RemoteIdentityWatcher`]
//!
//! Each remote gets a [`RemoteCluster`] handle with one [`SyncBarrier`] per
//! resource kind. [`ClusterMesh`] owns the handles and answers "has every
//! remote delivered its initial listing" for each kind, ignoring remotes that
//! disconnect while being waited on.
//!
//! Cluster IDs are unique across connected remotes: the [`ClusterIdRegistry`]
//! rejects a connection whose ID is already held by another remote.
//!
//! ## Example
//!
//! ```ignore
//! use aspen_clustermesh::{ClusterMesh, ClusterMeshConfig, RemoteClusterConfig, WaitContext};
//!
//! let config = ClusterMeshConfig::load_with_file("clustermesh.toml")?;
//! let Some(mesh) = ClusterMesh::new(config, collaborators)? else {
//!     return Ok(()); // mesh disabled
//! };
//!
//! mesh.on_remote_connected("eu-west", backend, RemoteClusterConfig::new(2)).await?;
//!
//! let ctx = WaitContext::new().with_timeout(Duration::from_secs(30));
//! mesh.nodes_synced(&ctx).await?;
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod global_services;
pub mod mesh;
pub mod metrics;
pub mod remote_cluster;
pub mod status;
pub mod synced;
pub mod testing;
pub mod traits;
pub mod types;
pub mod used_ids;
pub mod watch_store;

pub use config::ClusterMeshConfig;
pub use config::RemoteClusterConfig;
pub use error::ClusterIdError;
pub use error::ClusterMeshError;
pub use error::ConfigError;
pub use error::SyncWaitError;
pub use error::WatchError;
pub use global_services::GlobalService;
pub use global_services::GlobalServiceCache;
pub use global_services::RemoveOutcome;
pub use mesh::ClusterMesh;
pub use remote_cluster::Collaborators;
pub use remote_cluster::RemoteCluster;
pub use remote_cluster::RemoteClusterHandle;
pub use status::ClusterMeshStatus;
pub use status::RemoteClusterStatus;
pub use synced::BarrierState;
pub use synced::SyncBarrier;
pub use synced::WaitContext;
pub use types::ClusterService;
pub use types::IpIdentityPair;
pub use types::RemoteNode;
pub use types::ResourceKind;
pub use types::ServiceId;
pub use used_ids::ClusterIdRegistry;
pub use watch_store::RestartableWatchStore;
