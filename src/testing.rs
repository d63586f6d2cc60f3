//! In-memory collaborators for exercising the cluster mesh without real
//! remote clusters.
//!
//! [`InMemoryWatchBackend`] serves scripted key-value data and pushes live
//! changes to open watches. The `Recording*` types implement the data-plane
//! sinks and remember what they were told, so tests can assert on the local
//! view.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::traits::IpCacheSink;
use crate::traits::Observer;
use crate::traits::RemoteIdentityWatcher;
use crate::traits::ServiceMerger;
use crate::traits::WatchBackend;
use crate::traits::WatchEvent;
use crate::types::ClusterService;
use crate::types::IpIdentityPair;
use crate::types::RemoteNode;
use crate::types::ServiceId;

#[derive(Default)]
struct BackendInner {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
    watchers: Mutex<Vec<(String, mpsc::UnboundedSender<WatchEvent>)>>,
    held_prefixes: Mutex<HashSet<String>>,
    close_after_listing: AtomicBool,
    failure: Mutex<Option<String>>,
    list_calls: AtomicUsize,
}

/// Scriptable in-memory [`WatchBackend`].
///
/// Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct InMemoryWatchBackend {
    inner: Arc<BackendInner>,
}

impl InMemoryWatchBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` as JSON under `key` and notify open watches.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) {
        let encoded = serde_json::to_vec(value).unwrap_or_default();
        self.put_raw(key, encoded);
    }

    /// Store raw bytes under `key` and notify open watches.
    pub fn put_raw(&self, key: &str, value: Vec<u8>) {
        self.inner.data.lock().insert(key.to_string(), value.clone());
        self.notify(key, WatchEvent::Upsert {
            key: key.to_string(),
            value,
        });
    }

    /// Delete `key` and notify open watches.
    pub fn remove(&self, key: &str) {
        if self.inner.data.lock().remove(key).is_some() {
            self.notify(key, WatchEvent::Delete { key: key.to_string() });
        }
    }

    /// End every stream right after its initial listing.
    pub fn close_after_listing(&self, close: bool) {
        self.inner.close_after_listing.store(close, Ordering::SeqCst);
    }

    /// Withhold the end-of-listing marker for watches under `prefix`.
    pub fn hold_initial_sync(&self, prefix: &str) {
        self.inner.held_prefixes.lock().insert(prefix.to_string());
    }

    /// Deliver the withheld end-of-listing marker to watches under `prefix`.
    pub fn release_initial_sync(&self, prefix: &str) {
        self.inner.held_prefixes.lock().remove(prefix);
        let watchers = self.inner.watchers.lock();
        for (watched, tx) in watchers.iter() {
            if watched.starts_with(prefix) {
                let _ = tx.unbounded_send(WatchEvent::ListDone);
            }
        }
    }

    /// Make subsequent `list_and_watch` calls fail with `reason`.
    pub fn fail_with(&self, reason: Option<&str>) {
        *self.inner.failure.lock() = reason.map(str::to_string);
    }

    /// End every open watch stream.
    pub fn disconnect_watchers(&self) {
        self.inner.watchers.lock().clear();
    }

    /// Number of `list_and_watch` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.inner.list_calls.load(Ordering::SeqCst)
    }

    fn notify(&self, key: &str, event: WatchEvent) {
        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|(prefix, tx)| {
            if !key.starts_with(prefix.as_str()) {
                return !tx.is_closed();
            }
            tx.unbounded_send(event.clone()).is_ok()
        });
    }
}

#[async_trait]
impl WatchBackend for InMemoryWatchBackend {
    async fn list_and_watch(&self, prefix: &str) -> Result<BoxStream<'static, WatchEvent>, WatchError> {
        self.inner.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.inner.failure.lock().clone() {
            return Err(WatchError::Backend { reason });
        }

        let scoped = format!("{}/", prefix);
        let mut events: Vec<WatchEvent> = self
            .inner
            .data
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(&scoped))
            .map(|(key, value)| WatchEvent::Upsert {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        let held = self.inner.held_prefixes.lock().iter().any(|p| prefix.starts_with(p.as_str()));
        if !held {
            events.push(WatchEvent::ListDone);
        }

        let initial = futures::stream::iter(events);
        if self.inner.close_after_listing.load(Ordering::SeqCst) {
            return Ok(initial.boxed());
        }

        let (tx, rx) = mpsc::unbounded();
        self.inner.watchers.lock().push((scoped, tx));
        Ok(initial.chain(rx).boxed())
    }
}

/// Node observer remembering the current set of remote nodes.
#[derive(Debug, Default)]
pub struct RecordingNodeObserver {
    nodes: Mutex<BTreeMap<(String, String), RemoteNode>>,
    deletions: AtomicUsize,
}

impl RecordingNodeObserver {
    /// Names of known nodes, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.lock().keys().map(|(_, name)| name.clone()).collect();
        names.sort();
        names
    }

    /// Number of known nodes contributed by `cluster`.
    pub fn count_for(&self, cluster: &str) -> usize {
        self.nodes.lock().keys().filter(|(c, _)| c == cluster).count()
    }

    /// Number of delete notifications received.
    pub fn deletions(&self) -> usize {
        self.deletions.load(Ordering::SeqCst)
    }
}

impl Observer<RemoteNode> for RecordingNodeObserver {
    fn on_update(&self, entry: &RemoteNode) {
        self.nodes.lock().insert((entry.cluster.clone(), entry.name.clone()), entry.clone());
    }

    fn on_delete(&self, entry: &RemoteNode) {
        self.nodes.lock().remove(&(entry.cluster.clone(), entry.name.clone()));
        self.deletions.fetch_add(1, Ordering::SeqCst);
    }
}

/// IP cache remembering mappings per owning cluster.
#[derive(Debug, Default)]
pub struct RecordingIpCache {
    entries: Mutex<BTreeMap<(String, String), IpIdentityPair>>,
}

impl RecordingIpCache {
    /// Identity mapped to `ip` by `cluster`, if any.
    pub fn identity(&self, cluster: &str, ip: &str) -> Option<u32> {
        self.entries.lock().get(&(cluster.to_string(), ip.to_string())).map(|pair| pair.identity)
    }

    /// Total number of mappings.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no mapping is known.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl IpCacheSink for RecordingIpCache {
    fn upsert(&self, cluster: &str, pair: &IpIdentityPair) {
        self.entries.lock().insert((cluster.to_string(), pair.ip.clone()), pair.clone());
    }

    fn delete(&self, cluster: &str, pair: &IpIdentityPair) {
        self.entries.lock().remove(&(cluster.to_string(), pair.ip.clone()));
    }
}

/// A call received by [`RecordingServiceMerger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeEvent {
    /// `merge_external_service_update`.
    Update(ClusterService),
    /// `merge_external_service_delete`.
    Delete(ClusterService),
    /// `global_service_removed`.
    GlobalRemoved(ServiceId),
}

/// Service merger recording every call in order.
#[derive(Debug, Default)]
pub struct RecordingServiceMerger {
    events: Mutex<Vec<MergeEvent>>,
}

impl RecordingServiceMerger {
    /// All calls received so far.
    pub fn events(&self) -> Vec<MergeEvent> {
        self.events.lock().clone()
    }
}

impl ServiceMerger for RecordingServiceMerger {
    fn merge_external_service_update(&self, service: &ClusterService) {
        self.events.lock().push(MergeEvent::Update(service.clone()));
    }

    fn merge_external_service_delete(&self, service: &ClusterService) {
        self.events.lock().push(MergeEvent::Delete(service.clone()));
    }

    fn global_service_removed(&self, service: &ServiceId) {
        self.events.lock().push(MergeEvent::GlobalRemoved(service.clone()));
    }
}

/// Identity watcher tracking which remotes are being watched.
#[derive(Debug, Default)]
pub struct RecordingIdentityWatcher {
    watching: Mutex<BTreeMap<String, bool>>,
    removed: Mutex<Vec<String>>,
}

impl RecordingIdentityWatcher {
    /// Returns true while identities of `remote_name` are being watched.
    pub fn is_watching(&self, remote_name: &str) -> bool {
        self.watching.lock().contains_key(remote_name)
    }

    /// Whether the last watch of `remote_name` used the cache prefix.
    pub fn cached_prefix(&self, remote_name: &str) -> Option<bool> {
        self.watching.lock().get(remote_name).copied()
    }

    /// Remotes whose identities were removed, in order.
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl RemoteIdentityWatcher for RecordingIdentityWatcher {
    async fn watch_remote_identities(
        &self,
        remote_name: &str,
        _backend: Arc<dyn WatchBackend>,
        cached_prefix: bool,
        cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        self.watching.lock().insert(remote_name.to_string(), cached_prefix);
        cancel.cancelled().await;
        self.watching.lock().remove(remote_name);
        Ok(())
    }

    fn remove_remote_identities(&self, remote_name: &str) {
        self.removed.lock().push(remote_name.to_string());
    }
}
