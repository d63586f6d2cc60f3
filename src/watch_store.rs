//! Restartable watch over one resource kind of a remote cluster.
//!
//! A [`RestartableWatchStore`] lists a key prefix, decodes every value, and
//! forwards changes to an [`Observer`]. The store outlives individual
//! connections: when the remote reconnects, [`RestartableWatchStore::watch`]
//! is called again, lists from scratch, and reconciles against what it knew
//! from the previous run.
//!
//! # Architecture
//!
//! ```text
//! WatchBackend::list_and_watch(prefix)
//!          |
//!          v
//!   Upsert / Delete / ListDone
//!          |
//!          v
//!  RestartableWatchStore (known entries, synced flag)
//!          |                         |
//!          v                         v
//!   Observer<E>              on_sync callback (first ListDone only)
//! ```
//!
//! # Tiger Style
//!
//! - Explicit shutdown via CancellationToken
//! - Observer calls are made without holding the entries lock
//! - Undecodable entries are skipped, never fatal

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use metrics::Gauge;
use parking_lot::Mutex;
use snafu::IntoError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::DecodeSnafu;
use crate::error::WatchError;
use crate::traits::Observer;
use crate::traits::WatchBackend;
use crate::traits::WatchEvent;
use crate::types::ResourceKind;
use crate::types::StoreEntry;

/// Callback invoked once the initial listing has been drained.
pub type OnSyncCallback = Box<dyn Fn() + Send + Sync>;

/// Watch store that can be restarted against a new backend without losing
/// track of what it already delivered.
pub struct RestartableWatchStore<E: StoreEntry> {
    cluster_name: String,
    kind: ResourceKind,
    observer: Arc<dyn Observer<E>>,
    on_sync: Option<OnSyncCallback>,
    entries_metric: Option<Gauge>,
    synced: AtomicBool,
    entries: Mutex<HashMap<String, E>>,
}

impl<E: StoreEntry> std::fmt::Debug for RestartableWatchStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartableWatchStore")
            .field("cluster_name", &self.cluster_name)
            .field("kind", &self.kind)
            .field("synced", &self.is_synced())
            .field("entries", &self.num_entries())
            .finish()
    }
}

impl<E: StoreEntry> RestartableWatchStore<E> {
    /// Create a store for `kind` entries published by `cluster_name`.
    pub fn new(cluster_name: impl Into<String>, kind: ResourceKind, observer: Arc<dyn Observer<E>>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            kind,
            observer,
            on_sync: None,
            entries_metric: None,
            synced: AtomicBool::new(false),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Invoke `callback` the first time the initial listing is drained.
    pub fn with_on_sync(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_sync = Some(Box::new(callback));
        self
    }

    /// Report the number of known entries through `gauge`.
    pub fn with_entries_metric(mut self, gauge: Gauge) -> Self {
        self.entries_metric = Some(gauge);
        self
    }

    /// Resource kind watched by this store.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Returns true once any run drained its initial listing.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Number of entries currently known.
    pub fn num_entries(&self) -> usize {
        self.entries.lock().len()
    }

    /// List and watch the kind's prefix on `backend` until `cancel` fires or
    /// the stream ends.
    ///
    /// Entries known from a previous run that are absent from the new initial
    /// listing are reported as deleted once the listing completes.
    pub async fn watch(&self, backend: &dyn WatchBackend, cancel: &CancellationToken) -> Result<(), WatchError> {
        let prefix = self.kind.key_prefix(&self.cluster_name);
        let mut stream = backend.list_and_watch(&prefix).await?;

        let mut stale: Option<HashSet<String>> = Some(self.entries.lock().keys().cloned().collect());
        info!(remote_cluster = %self.cluster_name, kind = %self.kind, prefix, "starting watch");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(remote_cluster = %self.cluster_name, kind = %self.kind, "watch cancelled");
                    return Ok(());
                }
                event = stream.next() => event,
            };

            match event {
                Some(WatchEvent::Upsert { key, value }) => {
                    if let Some(stale) = stale.as_mut() {
                        stale.remove(&key);
                    }
                    self.handle_upsert(key, &value);
                }
                Some(WatchEvent::Delete { key }) => {
                    if let Some(stale) = stale.as_mut() {
                        stale.remove(&key);
                    }
                    self.handle_delete(&key);
                }
                Some(WatchEvent::ListDone) => {
                    if let Some(stale) = stale.take() {
                        if !stale.is_empty() {
                            debug!(
                                remote_cluster = %self.cluster_name,
                                kind = %self.kind,
                                count = stale.len(),
                                "removing stale entries after resync"
                            );
                        }
                        for key in stale {
                            self.handle_delete(&key);
                        }
                    }
                    self.mark_synced();
                }
                None => {
                    debug!(remote_cluster = %self.cluster_name, kind = %self.kind, "watch stream ended");
                    return Ok(());
                }
            }
        }
    }

    /// Report every known entry as deleted and forget them.
    pub fn drain(&self) {
        let drained: Vec<E> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        self.update_metric(0);
        if !drained.is_empty() {
            debug!(remote_cluster = %self.cluster_name, kind = %self.kind, count = drained.len(), "draining entries");
        }
        for entry in &drained {
            self.observer.on_delete(entry);
        }
    }

    fn handle_upsert(&self, key: String, value: &[u8]) {
        let entry = match decode_entry::<E>(&key, value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(remote_cluster = %self.cluster_name, kind = %self.kind, error = %e, "skipping entry");
                return;
            }
        };

        let count = {
            let mut entries = self.entries.lock();
            entries.insert(key, entry.clone());
            entries.len()
        };
        self.update_metric(count);
        self.observer.on_update(&entry);
    }

    fn handle_delete(&self, key: &str) {
        let (removed, count) = {
            let mut entries = self.entries.lock();
            let removed = entries.remove(key);
            (removed, entries.len())
        };

        match removed {
            Some(entry) => {
                self.update_metric(count);
                self.observer.on_delete(&entry);
            }
            None => {
                debug!(remote_cluster = %self.cluster_name, kind = %self.kind, key, "ignoring delete for unknown entry");
            }
        }
    }

    fn mark_synced(&self) {
        if self.synced.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(remote_cluster = %self.cluster_name, kind = %self.kind, "initial sync completed");
        if let Some(on_sync) = &self.on_sync {
            on_sync();
        }
    }

    fn update_metric(&self, count: usize) {
        if let Some(gauge) = &self.entries_metric {
            gauge.set(count as f64);
        }
    }
}

fn decode_entry<E: StoreEntry>(key: &str, value: &[u8]) -> Result<E, WatchError> {
    E::decode(key, value).map_err(|e| DecodeSnafu { key }.into_error(e))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::testing::InMemoryWatchBackend;
    use crate::testing::RecordingNodeObserver;
    use crate::types::RemoteNode;

    fn node(name: &str) -> RemoteNode {
        RemoteNode {
            cluster: "eu-west".to_string(),
            name: name.to_string(),
            addresses: vec!["10.0.0.1".to_string()],
            cluster_id: 1,
        }
    }

    fn node_key(name: &str) -> String {
        format!("{}/{}", ResourceKind::Nodes.key_prefix("eu-west"), name)
    }

    #[tokio::test]
    async fn test_initial_listing_then_sync_callback() {
        let backend = InMemoryWatchBackend::new();
        backend.put_json(&node_key("n1"), &node("n1"));
        backend.put_json(&node_key("n2"), &node("n2"));
        backend.close_after_listing(true);

        let observer = Arc::new(RecordingNodeObserver::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let store = {
            let calls = calls.clone();
            RestartableWatchStore::new("eu-west", ResourceKind::Nodes, observer.clone())
                .with_on_sync(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
        };

        store.watch(&backend, &CancellationToken::new()).await.unwrap();
        assert!(store.is_synced());
        assert_eq!(store.num_entries(), 2);
        assert_eq!(observer.names(), vec!["n1".to_string(), "n2".to_string()]);

        // A second run re-signals the listing; the callback must not fire again.
        store.watch(&backend, &CancellationToken::new()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_removes_stale_entries() {
        let backend = InMemoryWatchBackend::new();
        backend.put_json(&node_key("n1"), &node("n1"));
        backend.put_json(&node_key("n2"), &node("n2"));
        backend.close_after_listing(true);

        let observer = Arc::new(RecordingNodeObserver::default());
        let store = RestartableWatchStore::new("eu-west", ResourceKind::Nodes, observer.clone());
        store.watch(&backend, &CancellationToken::new()).await.unwrap();

        backend.remove(&node_key("n2"));
        store.watch(&backend, &CancellationToken::new()).await.unwrap();

        assert_eq!(store.num_entries(), 1);
        assert_eq!(observer.names(), vec!["n1".to_string()]);
        assert_eq!(observer.deletions(), 1);
    }

    #[test]
    fn test_decode_failure_names_key() {
        let key = node_key("bad");
        let err = decode_entry::<RemoteNode>(&key, b"{not json").unwrap_err();
        assert!(matches!(&err, WatchError::Decode { key: k, .. } if *k == key));
        assert!(err.to_string().contains(&key));
    }

    #[tokio::test]
    async fn test_undecodable_entry_skipped_and_unknown_delete_ignored() {
        let backend = InMemoryWatchBackend::new();
        backend.put_raw(&node_key("bad"), b"{not json".to_vec());
        backend.put_json(&node_key("n1"), &node("n1"));
        backend.close_after_listing(true);

        let observer = Arc::new(RecordingNodeObserver::default());
        let store = RestartableWatchStore::new("eu-west", ResourceKind::Nodes, observer.clone());
        store.watch(&backend, &CancellationToken::new()).await.unwrap();
        assert_eq!(store.num_entries(), 1);

        store.handle_delete(&node_key("never-seen"));
        assert_eq!(observer.deletions(), 0);
    }

    #[tokio::test]
    async fn test_drain_deletes_everything() {
        let backend = InMemoryWatchBackend::new();
        backend.put_json(&node_key("n1"), &node("n1"));
        backend.close_after_listing(true);

        let observer = Arc::new(RecordingNodeObserver::default());
        let store = RestartableWatchStore::new("eu-west", ResourceKind::Nodes, observer.clone());
        store.watch(&backend, &CancellationToken::new()).await.unwrap();
        store.drain();

        assert_eq!(store.num_entries(), 0);
        assert!(observer.names().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_open_watch() {
        let backend = InMemoryWatchBackend::new();
        let observer = Arc::new(RecordingNodeObserver::default());
        let store = Arc::new(RestartableWatchStore::new("eu-west", ResourceKind::Nodes, observer));
        let cancel = CancellationToken::new();

        let task = {
            let store = store.clone();
            let backend = backend.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { store.watch(&backend, &cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(store.is_synced());
    }
}
