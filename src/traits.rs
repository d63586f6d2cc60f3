//! Collaborator interfaces consumed by the cluster mesh.
//!
//! The mesh does not know how remote connections are made or how the local
//! data plane merges what it learns. It talks to both through the traits in
//! this module.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::types::ClusterService;
use crate::types::IpIdentityPair;
use crate::types::RemoteNode;
use crate::types::ServiceId;

/// Event produced by a watch over a key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was created or modified.
    Upsert {
        /// Full key of the entry.
        key: String,
        /// Encoded value.
        value: Vec<u8>,
    },
    /// A key was deleted.
    Delete {
        /// Full key of the entry.
        key: String,
    },
    /// All entries present when the watch started have been delivered.
    ListDone,
}

/// Watchable key-value backend of one remote cluster.
///
/// Each call lists the prefix from scratch, then streams incremental changes
/// until the connection ends. The stream terminating means the watch must be
/// restarted.
#[async_trait]
pub trait WatchBackend: Send + Sync + 'static {
    /// Start listing and watching all keys under `prefix`.
    async fn list_and_watch(&self, prefix: &str) -> Result<BoxStream<'static, WatchEvent>, WatchError>;
}

/// Receives upsert and delete notifications for decoded entries.
pub trait Observer<E>: Send + Sync {
    /// An entry was created or modified.
    fn on_update(&self, entry: &E);

    /// An entry was deleted.
    fn on_delete(&self, entry: &E);
}

/// Reacts to node events learned from remote clusters.
pub type NodeObserver = dyn Observer<RemoteNode>;

/// Local IP cache fed with remote IP to identity mappings.
pub trait IpCacheSink: Send + Sync {
    /// Insert or replace a mapping owned by `cluster`.
    fn upsert(&self, cluster: &str, pair: &IpIdentityPair);

    /// Remove a mapping owned by `cluster`.
    fn delete(&self, cluster: &str, pair: &IpIdentityPair);
}

/// Merges remote service data into the node's own service tables.
pub trait ServiceMerger: Send + Sync {
    /// A remote cluster added or changed a shared service.
    fn merge_external_service_update(&self, service: &ClusterService);

    /// A remote cluster withdrew a service.
    fn merge_external_service_delete(&self, service: &ClusterService);

    /// No remote cluster advertises the service anymore.
    fn global_service_removed(&self, _service: &ServiceId) {}
}

/// Watches identities allocated by remote clusters.
#[async_trait]
pub trait RemoteIdentityWatcher: Send + Sync {
    /// Watch identities of `remote_name` until `cancel` fires or the backend
    /// stream ends.
    ///
    /// `cached_prefix` selects the cache prefix layout for identities.
    async fn watch_remote_identities(
        &self,
        remote_name: &str,
        backend: Arc<dyn WatchBackend>,
        cached_prefix: bool,
        cancel: CancellationToken,
    ) -> Result<(), WatchError>;

    /// Forget every identity learned from `remote_name`, emitting deletions.
    fn remove_remote_identities(&self, remote_name: &str);
}
