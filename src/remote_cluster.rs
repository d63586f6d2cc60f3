//! Local state of one remote cluster.
//!
//! A [`RemoteCluster`] binds three watch stores (nodes, services, IP to
//! identity mappings) to their local sinks and sync barriers, and holds the
//! remote's cluster ID reservation. The handle survives reconnects: each new
//! connection calls [`RemoteClusterHandle::run`] again with the new backend,
//! and the stores resume from what they already delivered.
//!
//! Teardown happens in two steps. [`RemoteClusterHandle::stop`] abandons barriers
//! that never synced so waiters are released; [`RemoteClusterHandle::remove`]
//! withdraws everything the remote contributed and releases its cluster ID.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::RemoteClusterConfig;
use crate::config::validate_cluster_id;
use crate::error::ClusterIdError;
use crate::error::WatchError;
use crate::global_services::GlobalServiceCache;
use crate::global_services::RemoveOutcome;
use crate::metrics::MeshMetrics;
use crate::status::ConnectionStatus;
use crate::status::RemoteClusterStatus;
use crate::synced::SyncBarrier;
use crate::synced::Synced;
use crate::traits::IpCacheSink;
use crate::traits::NodeObserver;
use crate::traits::Observer;
use crate::traits::RemoteIdentityWatcher;
use crate::traits::ServiceMerger;
use crate::traits::WatchBackend;
use crate::types::ClusterService;
use crate::types::IpIdentityPair;
use crate::types::RemoteNode;
use crate::types::ResourceKind;
use crate::used_ids::ClusterIdRegistry;
use crate::watch_store::RestartableWatchStore;

/// Returns the connection status of a remote, supplied by the orchestrator.
pub type StatusFn = Arc<dyn Fn() -> ConnectionStatus + Send + Sync>;

/// Data-plane collaborators fed by every remote cluster.
#[derive(Clone)]
pub struct Collaborators {
    /// Receives remote node events.
    pub node_observer: Arc<NodeObserver>,
    /// Receives remote IP to identity mappings.
    pub ip_cache: Arc<dyn IpCacheSink>,
    /// Merges remote services into the local service tables.
    pub service_merger: Arc<dyn ServiceMerger>,
    /// Watches identities allocated by remote clusters.
    pub remote_identity_watcher: Arc<dyn RemoteIdentityWatcher>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// State shared by every remote cluster of one mesh.
#[derive(Debug, Clone)]
pub(crate) struct MeshShared {
    pub(crate) collaborators: Collaborators,
    pub(crate) used_ids: Arc<ClusterIdRegistry>,
    pub(crate) global_services: Arc<GlobalServiceCache>,
    pub(crate) metrics: MeshMetrics,
    pub(crate) local_cluster_id: u32,
    pub(crate) max_cluster_id: u32,
}

/// Uniform view of a registered remote cluster.
///
/// The orchestrator drives every remote through this interface: reserve its
/// cluster ID, run its watchers, wait on its barriers, tear it down, and
/// report its status. How each resource kind is consumed stays inside the
/// implementation.
#[async_trait]
pub trait RemoteClusterHandle: Send + Sync {
    /// Remote cluster name.
    fn name(&self) -> &str;

    /// Currently reserved cluster ID.
    fn cluster_id(&self) -> Option<u32>;

    /// Reserve `cluster_id` for this remote, releasing a previous different ID.
    ///
    /// On failure the previous reservation, if any, is kept.
    fn update_cluster_id(&self, cluster_id: u32) -> Result<(), ClusterIdError>;

    /// Watch the remote on `backend` until `cancel` fires or every watcher
    /// ends.
    async fn run(&self, backend: Arc<dyn WatchBackend>, config: RemoteClusterConfig, cancel: CancellationToken);

    /// The connection is healthy and no watcher of the current run failed.
    fn is_ready(&self) -> bool;

    /// Sync barrier of the given resource kind.
    fn sync_barrier(&self, kind: ResourceKind) -> SyncBarrier;

    /// Abandon every barrier that has not been satisfied.
    fn stop(&self);

    /// Withdraw everything learned from the remote and release its cluster ID.
    fn remove(&self);

    /// Status snapshot.
    fn status(&self) -> RemoteClusterStatus;
}

/// Feeds remote services into the global service cache and the merger.
struct RemoteServiceObserver {
    cluster_name: String,
    cluster_id: Arc<Mutex<Option<u32>>>,
    global_services: Arc<GlobalServiceCache>,
    merger: Arc<dyn ServiceMerger>,
}

impl RemoteServiceObserver {
    fn withdraw(&self, service: &ClusterService) {
        let id = service.service_id();
        let outcome = self.global_services.remove(&self.cluster_name, &id);
        self.merger.merge_external_service_delete(service);
        if outcome == RemoveOutcome::ServiceRemoved {
            self.merger.global_service_removed(&id);
        }
    }

    fn owned(&self, service: &ClusterService) -> bool {
        if service.cluster != self.cluster_name {
            warn!(
                remote_cluster = %self.cluster_name,
                service = %service.service_id(),
                service_cluster = %service.cluster,
                "ignoring service advertised on behalf of another cluster"
            );
            return false;
        }
        let reserved = *self.cluster_id.lock();
        if service.cluster_id != 0
            && let Some(reserved) = reserved
            && service.cluster_id != reserved
        {
            warn!(
                remote_cluster = %self.cluster_name,
                service = %service.service_id(),
                service_cluster_id = service.cluster_id,
                cluster_id = reserved,
                "service advertises a cluster ID different from the remote's"
            );
        }
        true
    }
}

impl Observer<ClusterService> for RemoteServiceObserver {
    fn on_update(&self, service: &ClusterService) {
        if !self.owned(service) {
            return;
        }
        if service.shared {
            self.global_services.upsert(&self.cluster_name, service.clone());
            self.merger.merge_external_service_update(service);
        } else {
            debug!(remote_cluster = %self.cluster_name, service = %service.service_id(), "service no longer shared");
            self.withdraw(service);
        }
    }

    fn on_delete(&self, service: &ClusterService) {
        if self.owned(service) {
            self.withdraw(service);
        }
    }
}

/// Forwards remote IP to identity mappings into the local IP cache.
struct IpCacheObserver {
    cluster_name: String,
    ip_cache: Arc<dyn IpCacheSink>,
}

impl Observer<IpIdentityPair> for IpCacheObserver {
    fn on_update(&self, pair: &IpIdentityPair) {
        self.ip_cache.upsert(&self.cluster_name, pair);
    }

    fn on_delete(&self, pair: &IpIdentityPair) {
        self.ip_cache.delete(&self.cluster_name, pair);
    }
}

/// Local state of one remote cluster.
pub struct RemoteCluster {
    name: String,
    shared: MeshShared,
    status: StatusFn,
    cluster_id: Arc<Mutex<Option<u32>>>,
    last_watch_error: Mutex<Option<String>>,
    remote_nodes: RestartableWatchStore<RemoteNode>,
    remote_services: RestartableWatchStore<ClusterService>,
    ip_cache_watcher: RestartableWatchStore<IpIdentityPair>,
    synced: Synced,
    removed: AtomicBool,
}

impl std::fmt::Debug for RemoteCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCluster")
            .field("name", &self.name)
            .field("cluster_id", &self.cluster_id())
            .field("synced", &self.synced.status())
            .finish()
    }
}

impl RemoteCluster {
    /// Build the handle and its three watch stores.
    pub(crate) fn new(name: impl Into<String>, status: StatusFn, shared: MeshShared) -> Self {
        let name = name.into();
        let synced = Synced::new();
        let cluster_id = Arc::new(Mutex::new(None));

        let remote_nodes = {
            let barrier = synced.barrier(ResourceKind::Nodes).clone();
            RestartableWatchStore::new(&name, ResourceKind::Nodes, shared.collaborators.node_observer.clone())
                .with_on_sync(move || {
                    barrier.signal_satisfied();
                })
                .with_entries_metric(shared.metrics.remote_cluster_nodes(&name))
        };

        let remote_services = {
            let barrier = synced.barrier(ResourceKind::Services).clone();
            let observer: Arc<dyn Observer<ClusterService>> = Arc::new(RemoteServiceObserver {
                cluster_name: name.clone(),
                cluster_id: cluster_id.clone(),
                global_services: shared.global_services.clone(),
                merger: shared.collaborators.service_merger.clone(),
            });
            RestartableWatchStore::new(&name, ResourceKind::Services, observer).with_on_sync(move || {
                barrier.signal_satisfied();
            })
        };

        let ip_cache_watcher = {
            let barrier = synced.barrier(ResourceKind::IpIdentities).clone();
            let observer: Arc<dyn Observer<IpIdentityPair>> = Arc::new(IpCacheObserver {
                cluster_name: name.clone(),
                ip_cache: shared.collaborators.ip_cache.clone(),
            });
            RestartableWatchStore::new(&name, ResourceKind::IpIdentities, observer).with_on_sync(move || {
                barrier.signal_satisfied();
            })
        };

        Self {
            name,
            shared,
            status,
            cluster_id,
            last_watch_error: Mutex::new(None),
            remote_nodes,
            remote_services,
            ip_cache_watcher,
            synced,
            removed: AtomicBool::new(false),
        }
    }

    fn record_watch_result(&self, what: &str, result: Result<(), WatchError>) {
        if let Err(e) = result {
            warn!(remote_cluster = %self.name, watcher = what, error = %e, "remote cluster watcher failed");
            *self.last_watch_error.lock() = Some(format!("{} watcher: {}", what, e));
        }
    }

    fn last_watch_error(&self) -> Option<String> {
        self.last_watch_error.lock().clone()
    }

    fn summary(&self, connection: &ConnectionStatus, watch_error: Option<&str>) -> String {
        if let Some(error) = watch_error {
            return error.to_string();
        }
        if let Some(failure) = &connection.last_failure
            && !connection.ready
        {
            return failure.clone();
        }
        match (connection.connected, connection.ready) {
            (_, true) => "ready".to_string(),
            (true, false) => "connecting".to_string(),
            (false, false) => "disconnected".to_string(),
        }
    }
}

#[async_trait]
impl RemoteClusterHandle for RemoteCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn cluster_id(&self) -> Option<u32> {
        *self.cluster_id.lock()
    }

    fn update_cluster_id(&self, cluster_id: u32) -> Result<(), ClusterIdError> {
        validate_cluster_id(cluster_id, self.shared.max_cluster_id)?;
        if cluster_id == self.shared.local_cluster_id {
            return Err(ClusterIdError::LocalClusterId { cluster_id });
        }

        let mut current = self.cluster_id.lock();
        if *current == Some(cluster_id) {
            return Ok(());
        }

        self.shared.used_ids.reserve(cluster_id)?;
        if let Some(previous) = current.replace(cluster_id) {
            self.shared.used_ids.release(previous);
            info!(remote_cluster = %self.name, previous, cluster_id, "remote cluster ID changed");
        }
        Ok(())
    }

    /// The three resource watchers and the identity watcher run concurrently
    /// and reach their initial sync independently. A watcher failure is
    /// recorded as soon as it happens, while the others keep running.
    async fn run(&self, backend: Arc<dyn WatchBackend>, config: RemoteClusterConfig, cancel: CancellationToken) {
        *self.last_watch_error.lock() = None;
        info!(remote_cluster = %self.name, cluster_id = config.cluster_id, "starting remote cluster watchers");

        let identities = self.shared.collaborators.remote_identity_watcher.watch_remote_identities(
            &self.name,
            backend.clone(),
            config.cached_identities,
            cancel.clone(),
        );

        tokio::join!(
            self.remote_nodes
                .watch(backend.as_ref(), &cancel)
                .map(|result| self.record_watch_result(ResourceKind::Nodes.as_str(), result)),
            self.remote_services
                .watch(backend.as_ref(), &cancel)
                .map(|result| self.record_watch_result(ResourceKind::Services.as_str(), result)),
            self.ip_cache_watcher
                .watch(backend.as_ref(), &cancel)
                .map(|result| self.record_watch_result(ResourceKind::IpIdentities.as_str(), result)),
            identities.map(|result| self.record_watch_result("identities", result)),
        );
        debug!(remote_cluster = %self.name, "remote cluster watchers stopped");
    }

    fn is_ready(&self) -> bool {
        (self.status)().ready && self.last_watch_error.lock().is_none()
    }

    fn sync_barrier(&self, kind: ResourceKind) -> SyncBarrier {
        self.synced.barrier(kind).clone()
    }

    fn stop(&self) {
        self.synced.stop();
    }

    fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.remote_nodes.drain();
        self.remote_services.drain();
        self.ip_cache_watcher.drain();
        self.shared.collaborators.remote_identity_watcher.remove_remote_identities(&self.name);

        if let Some(cluster_id) = self.cluster_id.lock().take() {
            self.shared.used_ids.release(cluster_id);
        }
        info!(remote_cluster = %self.name, "remote cluster removed");
    }

    fn status(&self) -> RemoteClusterStatus {
        let connection = (self.status)();
        let watch_error = self.last_watch_error();
        RemoteClusterStatus {
            name: self.name.clone(),
            cluster_id: self.cluster_id(),
            connected: connection.connected,
            ready: connection.ready && watch_error.is_none(),
            num_failures: connection.num_failures,
            status: self.summary(&connection, watch_error.as_deref()),
            last_failure: watch_error.or(connection.last_failure),
            num_nodes: self.remote_nodes.num_entries(),
            num_shared_services: self.shared.global_services.services_for_cluster(&self.name),
            num_ip_entries: self.ip_cache_watcher.num_entries(),
            synced: self.synced.status(),
        }
    }
}
