//! One-shot sync barriers tracking the initial sync of remote resources.
//!
//! Each remote cluster owns one barrier per resource kind. A barrier starts
//! pending and settles exactly once: satisfied when the watch stream drained
//! its initial listing, or abandoned when the remote went away first. The
//! first signal wins; later signals of either kind are ignored, so a watch
//! restart re-signalling satisfaction never regresses the barrier and a
//! disconnect after satisfaction never retroactively abandons it.
//!
//! Waiting races the settle signal against the caller's cancellation token
//! and deadline, so a cancelled wait returns immediately rather than at the
//! next barrier transition.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SyncWaitError;
use crate::types::ResourceKind;

/// State of a [`SyncBarrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    /// Initial sync has not completed yet.
    Pending,
    /// Initial sync completed.
    Satisfied,
    /// The remote disconnected before initial sync completed.
    Abandoned,
}

impl BarrierState {
    /// Returns true for the two terminal states.
    pub fn is_settled(&self) -> bool {
        !matches!(self, BarrierState::Pending)
    }
}

/// Cancellation and deadline bounding a wait operation.
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl WaitContext {
    /// A context that only ends when explicitly cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Expire the context `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Expire the context at `deadline`. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Cancel every wait bound to this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The cancellation token of this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves with the reason the context ended.
    async fn done(&self) -> SyncWaitError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => SyncWaitError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => SyncWaitError::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.cancelled().await;
                SyncWaitError::Cancelled
            }
        }
    }
}

/// One-shot gate signalled when a resource kind finished its initial sync.
///
/// Cloning yields another handle to the same barrier.
#[derive(Debug, Clone)]
pub struct SyncBarrier {
    state: Arc<watch::Sender<BarrierState>>,
}

impl Default for SyncBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBarrier {
    /// Create a pending barrier.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BarrierState::Pending);
        Self { state: Arc::new(tx) }
    }

    /// Current state.
    pub fn state(&self) -> BarrierState {
        *self.state.borrow()
    }

    /// Returns true once initial sync completed.
    pub fn is_satisfied(&self) -> bool {
        self.state() == BarrierState::Satisfied
    }

    /// Mark initial sync as complete.
    ///
    /// Returns true if this call settled the barrier.
    pub fn signal_satisfied(&self) -> bool {
        self.settle(BarrierState::Satisfied)
    }

    /// Mark the barrier abandoned because its remote disconnected.
    ///
    /// Returns true if this call settled the barrier.
    pub fn signal_abandoned(&self) -> bool {
        self.settle(BarrierState::Abandoned)
    }

    fn settle(&self, target: BarrierState) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            *state = target;
            true
        })
    }

    /// Wait until the barrier settles or `ctx` ends.
    ///
    /// Returns `Ok(())` when satisfied,
    /// [`SyncWaitError::RemoteClusterDisconnected`] when abandoned, and
    /// [`SyncWaitError::Cancelled`] or [`SyncWaitError::DeadlineExceeded`]
    /// when the context ends first. A barrier that already settled reports its
    /// state even if the context has also ended.
    pub async fn wait(&self, ctx: &WaitContext) -> Result<(), SyncWaitError> {
        let mut rx = self.state.subscribe();
        tokio::select! {
            biased;
            settled = rx.wait_for(BarrierState::is_settled) => match settled.map(|state| *state) {
                Ok(BarrierState::Satisfied) => Ok(()),
                // The sender lives as long as `self`, so a closed channel only
                // happens during teardown.
                Ok(_) | Err(_) => Err(SyncWaitError::RemoteClusterDisconnected),
            },
            reason = ctx.done() => Err(reason),
        }
    }
}

/// The three sync barriers owned by one remote cluster.
#[derive(Debug, Clone, Default)]
pub struct Synced {
    nodes: SyncBarrier,
    services: SyncBarrier,
    ip_identities: SyncBarrier,
}

/// Snapshot of whether each resource kind finished its initial sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncedStatus {
    /// Nodes synced.
    pub nodes: bool,
    /// Services synced.
    pub services: bool,
    /// IP to identity mappings synced.
    pub ip_identities: bool,
}

impl Synced {
    /// Create three pending barriers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Barrier for the given resource kind.
    pub fn barrier(&self, kind: ResourceKind) -> &SyncBarrier {
        match kind {
            ResourceKind::Nodes => &self.nodes,
            ResourceKind::Services => &self.services,
            ResourceKind::IpIdentities => &self.ip_identities,
        }
    }

    /// Abandon every barrier that has not been satisfied yet.
    pub fn stop(&self) {
        for kind in ResourceKind::ALL {
            self.barrier(kind).signal_abandoned();
        }
    }

    /// Current sync state of all kinds.
    pub fn status(&self) -> SyncedStatus {
        SyncedStatus {
            nodes: self.nodes.is_satisfied(),
            services: self.services.is_satisfied(),
            ip_identities: self.ip_identities.is_satisfied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_satisfied_then_abandoned_stays_satisfied() {
        let barrier = SyncBarrier::new();
        assert!(barrier.signal_satisfied());
        assert!(!barrier.signal_abandoned());
        assert!(!barrier.signal_satisfied());
        assert_eq!(barrier.state(), BarrierState::Satisfied);
        assert_eq!(barrier.wait(&WaitContext::new()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_abandoned_reports_disconnected() {
        let barrier = SyncBarrier::new();
        assert!(barrier.signal_abandoned());
        assert!(!barrier.signal_satisfied());
        assert_eq!(barrier.wait(&WaitContext::new()).await, Err(SyncWaitError::RemoteClusterDisconnected));
    }

    #[tokio::test]
    async fn test_waiters_released_on_signal() {
        let barrier = SyncBarrier::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                tokio::spawn(async move { barrier.wait(&WaitContext::new()).await })
            })
            .collect();
        tokio::task::yield_now().await;
        barrier.signal_satisfied();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(()));
        }
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_wait() {
        let barrier = SyncBarrier::new();
        let ctx = WaitContext::new();
        let waiter = {
            let barrier = barrier.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { barrier.wait(&ctx).await })
        };
        tokio::task::yield_now().await;
        ctx.cancel();
        assert_eq!(waiter.await.unwrap(), Err(SyncWaitError::Cancelled));
        assert_eq!(barrier.state(), BarrierState::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let barrier = SyncBarrier::new();
        let ctx = WaitContext::new().with_timeout(Duration::from_secs(5));
        assert_eq!(barrier.wait(&ctx).await, Err(SyncWaitError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_settled_state_wins_over_cancelled_context() {
        let barrier = SyncBarrier::new();
        barrier.signal_satisfied();
        let ctx = WaitContext::new();
        ctx.cancel();
        assert_eq!(barrier.wait(&ctx).await, Ok(()));
    }

    #[test]
    fn test_with_deadline_keeps_earliest() {
        let now = Instant::now();
        let ctx = WaitContext::new()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_synced_stop_abandons_only_pending() {
        let synced = Synced::new();
        synced.barrier(ResourceKind::Nodes).signal_satisfied();
        synced.stop();
        assert_eq!(synced.barrier(ResourceKind::Nodes).state(), BarrierState::Satisfied);
        assert_eq!(synced.barrier(ResourceKind::Services).state(), BarrierState::Abandoned);
        assert_eq!(synced.barrier(ResourceKind::IpIdentities).state(), BarrierState::Abandoned);
        assert_eq!(
            synced.status(),
            SyncedStatus {
                nodes: true,
                services: false,
                ip_identities: false
            }
        );
    }
}
