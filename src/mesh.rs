//! Cluster mesh orchestrator.
//!
//! Owns the registry of remote clusters and exposes mesh-wide operations:
//! reacting to connect/disconnect notifications from the connection layer,
//! waiting for the initial sync of every remote, and reporting status.
//!
//! # Concurrency
//!
//! ```text
//!  connection layer ──connect/lost/disconnect──► lifecycle lock (one at a time)
//!                                                   │
//!                                                   ▼
//!                                   remotes: RwLock<HashMap<name, entry>>
//!                                                   ▲
//!  nodes_synced / services_synced / status ─snapshot┘ (read, then iterate unlocked)
//! ```
//!
//! Lifecycle notifications are serialized by an async lock held for the whole
//! transition, including waiting for a previous watch run to stop. Aggregate
//! operations take a snapshot of the registry under the read lock and iterate
//! without holding it, so a remote connecting or disconnecting mid-fan-out is
//! either fully in that snapshot or not in it at all.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::ClusterMeshConfig;
use crate::config::RemoteClusterConfig;
use crate::config::validate_cluster_name;
use crate::error::ClusterMeshError;
use crate::error::SyncWaitError;
use crate::global_services::GlobalServiceCache;
use crate::metrics::MeshMetrics;
use crate::remote_cluster::Collaborators;
use crate::remote_cluster::MeshShared;
use crate::remote_cluster::RemoteCluster;
use crate::remote_cluster::RemoteClusterHandle;
use crate::remote_cluster::StatusFn;
use crate::status::ClusterMeshStatus;
use crate::status::ConnectionStatus;
use crate::synced::SyncBarrier;
use crate::synced::WaitContext;
use crate::traits::WatchBackend;
use crate::types::ResourceKind;
use crate::used_ids::ClusterIdRegistry;

/// A watch run in progress for one remote.
struct RunningWatch {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningWatch {
    async fn stop(self, remote_cluster: &str) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(remote_cluster, error = %e, "remote cluster watch task failed");
        }
    }
}

/// Registry entry of one remote cluster.
struct RemoteEntry {
    cluster: Arc<dyn RemoteClusterHandle>,
    connection: Arc<Mutex<ConnectionStatus>>,
    run: Option<RunningWatch>,
}

/// Cache of multiple remote clusters.
pub struct ClusterMesh {
    config: ClusterMeshConfig,
    shared: MeshShared,
    remotes: RwLock<HashMap<String, RemoteEntry>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ClusterMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterMesh")
            .field("cluster_name", &self.config.cluster_name)
            .field("cluster_id", &self.config.cluster_id)
            .field("remotes", &self.remote_cluster_names())
            .finish()
    }
}

impl ClusterMesh {
    /// Create the mesh for `config`.
    ///
    /// Returns `Ok(None)` when the mesh is disabled: no local cluster ID or
    /// no remote cluster configured.
    pub fn new(config: ClusterMeshConfig, collaborators: Collaborators) -> Result<Option<Self>, ClusterMeshError> {
        config.validate()?;
        if !config.is_enabled() {
            info!(cluster_id = config.cluster_id, "cluster mesh disabled");
            return Ok(None);
        }

        let metrics = MeshMetrics::new(&config.cluster_name, &config.node_name);
        let shared = MeshShared {
            collaborators,
            used_ids: Arc::new(ClusterIdRegistry::new()),
            global_services: Arc::new(GlobalServiceCache::new(metrics.clone())),
            metrics,
            local_cluster_id: config.cluster_id,
            max_cluster_id: config.max_connected_clusters,
        };

        info!(
            cluster_name = %config.cluster_name,
            cluster_id = config.cluster_id,
            remotes = config.remotes.len(),
            "cluster mesh enabled"
        );

        Ok(Some(Self {
            config,
            shared,
            remotes: RwLock::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }))
    }

    /// Configuration the mesh was built from.
    pub fn config(&self) -> &ClusterMeshConfig {
        &self.config
    }

    /// The cache of services shared across clusters.
    pub fn global_services(&self) -> &GlobalServiceCache {
        &self.shared.global_services
    }

    /// The registry of cluster IDs held by connected remotes.
    pub fn cluster_ids(&self) -> &ClusterIdRegistry {
        &self.shared.used_ids
    }

    /// A connection to remote `name` is up and serving `backend`.
    ///
    /// Registers a handle for `name` on first connect. For an already
    /// registered remote the running watchers are stopped and restarted
    /// against the new backend; barriers that already synced stay synced.
    ///
    /// Fails without touching other remotes when the remote's cluster ID is
    /// invalid or held by another remote; the failure is reflected in the
    /// remote's status and the handle stays registered until disconnected.
    pub async fn on_remote_connected(
        &self,
        name: &str,
        backend: Arc<dyn WatchBackend>,
        remote_config: RemoteClusterConfig,
    ) -> Result<(), ClusterMeshError> {
        validate_cluster_name(name)?;
        let _lifecycle = self.lifecycle.lock().await;

        let (cluster, connection, previous_run) = {
            let mut remotes = self.remotes.write();
            if !remotes.contains_key(name) {
                if remotes.len() >= self.config.max_connected_clusters as usize {
                    return Err(ClusterMeshError::TooManyRemoteClusters {
                        max: self.config.max_connected_clusters,
                    });
                }
                remotes.insert(name.to_string(), self.new_remote_entry(name));
                self.shared.metrics.set_remote_clusters(remotes.len());
                info!(remote_cluster = name, "remote cluster registered");
            }
            let Some(entry) = remotes.get_mut(name) else {
                return Err(ClusterMeshError::UnknownRemoteCluster { name: name.to_string() });
            };
            (entry.cluster.clone(), entry.connection.clone(), entry.run.take())
        };

        if let Some(run) = previous_run {
            debug!(remote_cluster = name, "replacing remote cluster backend");
            run.stop(name).await;
        }

        if let Err(source) = cluster.update_cluster_id(remote_config.cluster_id) {
            warn!(
                remote_cluster = name,
                cluster_id = remote_config.cluster_id,
                error = %source,
                "rejecting remote cluster connection"
            );
            let failures = {
                let mut connection = connection.lock();
                connection.connected = false;
                connection.ready = false;
                connection.num_failures += 1;
                connection.last_failure = Some(source.to_string());
                connection.num_failures
            };
            self.shared.metrics.set_remote_cluster_failures(name, failures);
            return Err(ClusterMeshError::ClusterId {
                remote_cluster: name.to_string(),
                source,
            });
        }

        {
            let mut connection = connection.lock();
            connection.connected = true;
            connection.ready = true;
        }

        let cancel = CancellationToken::new();
        let task = {
            let cluster = cluster.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { cluster.run(backend, remote_config, cancel).await })
        };

        if let Some(entry) = self.remotes.write().get_mut(name) {
            entry.run = Some(RunningWatch { cancel, task });
        }
        info!(remote_cluster = name, cluster_id = cluster.cluster_id(), "remote cluster connected");
        Ok(())
    }

    /// The connection to remote `name` was interrupted.
    ///
    /// Watchers are stopped and the remote stops counting as ready, but its
    /// handle, barriers, and learned state are kept so a later
    /// [`ClusterMesh::on_remote_connected`] resumes where it left off.
    pub async fn on_remote_connection_lost(&self, name: &str, reason: &str) -> Result<(), ClusterMeshError> {
        let _lifecycle = self.lifecycle.lock().await;

        let (connection, run) = {
            let mut remotes = self.remotes.write();
            let Some(entry) = remotes.get_mut(name) else {
                return Err(ClusterMeshError::UnknownRemoteCluster { name: name.to_string() });
            };
            (entry.connection.clone(), entry.run.take())
        };

        let failures = {
            let mut connection = connection.lock();
            connection.connected = false;
            connection.ready = false;
            connection.num_failures += 1;
            connection.last_failure = Some(reason.to_string());
            connection.num_failures
        };
        self.shared.metrics.set_remote_cluster_failures(name, failures);
        warn!(remote_cluster = name, reason, failures, "lost connection to remote cluster");

        if let Some(run) = run {
            run.stop(name).await;
        }
        Ok(())
    }

    /// Remote `name` was removed from the mesh.
    ///
    /// Stops its watchers, abandons barriers that never synced, withdraws
    /// everything it contributed, and releases its cluster ID. Unknown names
    /// are ignored.
    pub async fn on_remote_disconnected(&self, name: &str) {
        let _lifecycle = self.lifecycle.lock().await;

        let entry = {
            let mut remotes = self.remotes.write();
            let entry = remotes.remove(name);
            self.shared.metrics.set_remote_clusters(remotes.len());
            entry
        };

        match entry {
            Some(entry) => Self::teardown(name, entry).await,
            None => debug!(remote_cluster = name, "ignoring disconnect of unknown remote cluster"),
        }
    }

    /// Tear down every remote cluster.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let entries: Vec<(String, RemoteEntry)> = {
            let mut remotes = self.remotes.write();
            let entries = remotes.drain().collect();
            self.shared.metrics.set_remote_clusters(0);
            entries
        };

        info!(remotes = entries.len(), "shutting down cluster mesh");
        for (name, entry) in entries {
            Self::teardown(&name, entry).await;
        }
    }

    async fn teardown(name: &str, entry: RemoteEntry) {
        // Release waiters before waiting for the watchers to wind down.
        entry.cluster.stop();
        if let Some(run) = entry.run {
            run.stop(name).await;
        }
        {
            let mut connection = entry.connection.lock();
            connection.connected = false;
            connection.ready = false;
        }
        entry.cluster.remove();
        info!(remote_cluster = name, "remote cluster disconnected");
    }

    fn new_remote_entry(&self, name: &str) -> RemoteEntry {
        let connection = Arc::new(Mutex::new(ConnectionStatus::default()));
        let status: StatusFn = {
            let connection = connection.clone();
            Arc::new(move || connection.lock().clone())
        };
        RemoteEntry {
            cluster: Arc::new(RemoteCluster::new(name, status, self.shared.clone())),
            connection,
            run: None,
        }
    }

    /// Handle of remote `name`, if registered.
    pub fn remote_cluster(&self, name: &str) -> Option<Arc<dyn RemoteClusterHandle>> {
        self.remotes.read().get(name).map(|entry| entry.cluster.clone())
    }

    /// Names of registered remotes, sorted.
    pub fn remote_cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.remotes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of remote clusters with a healthy connection.
    pub fn num_ready_clusters(&self) -> usize {
        self.remotes.read().values().filter(|entry| entry.cluster.is_ready()).count()
    }

    /// Wait until the initial list of nodes has been received from every
    /// remote registered when the call starts.
    pub async fn nodes_synced(&self, ctx: &WaitContext) -> Result<(), SyncWaitError> {
        self.synced(ctx, ResourceKind::Nodes).await
    }

    /// Wait until the initial list of shared services has been received from
    /// every remote registered when the call starts.
    pub async fn services_synced(&self, ctx: &WaitContext) -> Result<(), SyncWaitError> {
        self.synced(ctx, ResourceKind::Services).await
    }

    /// Wait until the initial list of IP to identity mappings has been
    /// received from every remote registered when the call starts.
    pub async fn ip_identities_synced(&self, ctx: &WaitContext) -> Result<(), SyncWaitError> {
        self.synced(ctx, ResourceKind::IpIdentities).await
    }

    async fn synced(&self, ctx: &WaitContext, kind: ResourceKind) -> Result<(), SyncWaitError> {
        let waiters: Vec<(String, SyncBarrier)> = self
            .remotes
            .read()
            .values()
            .map(|entry| (entry.cluster.name().to_string(), entry.cluster.sync_barrier(kind)))
            .collect();

        for (name, barrier) in waiters {
            match barrier.wait(ctx).await {
                Ok(()) => {}
                // The remote went away in the meantime; it no longer matters.
                Err(e) if e.is_disconnected() => {
                    debug!(remote_cluster = %name, kind = %kind, "skipping disconnected remote cluster");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Status of the cluster mesh.
    pub fn status(&self) -> ClusterMeshStatus {
        let clusters: Vec<Arc<dyn RemoteClusterHandle>> =
            self.remotes.read().values().map(|entry| entry.cluster.clone()).collect();

        let mut clusters: Vec<_> = clusters.iter().map(|cluster| cluster.status()).collect();
        clusters.sort_by(|a, b| a.name.cmp(&b.name));

        ClusterMeshStatus {
            num_global_services: self.shared.global_services.size(),
            clusters,
        }
    }
}
