//! One observed run: feed subscription, reconciler and poll scheduler driven
//! from a single task, so every store write for the run is serialized.

use crate::api::RunBackend;
use crate::model::{RunStatus, RunWithPhases};
use crate::sync::feed::{ChangeFeed, FeedFilter, FeedSubscription};
use crate::sync::policy::{Refresh, RefreshPolicy};
use crate::sync::reconcile::ChangeReconciler;
use crate::sync::store::SnapshotStore;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Notifications for presentation layers. Snapshot contents go through the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Fetched { status: RunStatus },
    FetchFailed { message: String, has_snapshot: bool },
    FeedDisconnected,
    PollingStopped { status: Option<RunStatus> },
    PollingResumed,
}

pub struct SessionParams {
    pub backend: Arc<dyn RunBackend>,
    pub store: SnapshotStore,
    pub run_id: String,
    pub policy: RefreshPolicy,
    pub events: UnboundedSender<SyncEvent>,
}

pub struct RunSession {
    run_id: String,
    store: SnapshotStore,
    refresh_tx: UnboundedSender<()>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RunSession {
    /// Subscribe to the feed for `params.run_id` and start driving it.
    /// The first full fetch is issued immediately.
    pub fn open(params: SessionParams, feed: &dyn ChangeFeed) -> Self {
        let subscription = feed.subscribe(vec![
            FeedFilter::run(&params.run_id),
            FeedFilter::phases_of(&params.run_id),
        ]);
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = Driver {
            reconciler: ChangeReconciler::new(params.run_id.clone(), params.store.clone()),
            backend: params.backend,
            store: params.store.clone(),
            run_id: params.run_id.clone(),
            policy: params.policy,
            events: params.events,
            subscription,
        };
        info!(run_id = %params.run_id, "observing run");
        let handle = tokio::spawn(driver.run(refresh_rx, shutdown_rx));

        Self {
            run_id: params.run_id,
            store: params.store,
            refresh_tx,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn snapshot(&self) -> Option<RunWithPhases> {
        self.store.get(&self.run_id)
    }

    pub fn watch(&self) -> watch::Receiver<Option<RunWithPhases>> {
        self.store.watch(&self.run_id)
    }

    /// Schedule a full fetch now, regardless of the refresh policy.
    pub fn refresh_now(&self) {
        let _ = self.refresh_tx.send(());
    }

    /// Stop the driver and wait for it to release the feed subscription.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RunSession {
    fn drop(&mut self) {
        // Aborting drops the driver future, and with it the subscription.
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct Driver {
    backend: Arc<dyn RunBackend>,
    store: SnapshotStore,
    reconciler: ChangeReconciler,
    run_id: String,
    policy: RefreshPolicy,
    events: UnboundedSender<SyncEvent>,
    subscription: FeedSubscription,
}

impl Driver {
    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn status(&self) -> Option<RunStatus> {
        self.store.get(&self.run_id).map(|s| s.run.status)
    }

    /// Full fetch. A failure keeps whatever snapshot is already there.
    async fn fetch(&self) {
        match self.backend.get_run(&self.run_id).await {
            Ok(snapshot) => {
                let status = snapshot.run.status;
                debug!(run_id = %self.run_id, status = status.label(), "fetched run");
                self.store.set(&self.run_id, snapshot);
                self.emit(SyncEvent::Fetched { status });
            }
            Err(e) => {
                let has_snapshot = self.store.get(&self.run_id).is_some();
                warn!(run_id = %self.run_id, error = %e, has_snapshot, "run fetch failed");
                self.emit(SyncEvent::FetchFailed {
                    message: e.to_string(),
                    has_snapshot,
                });
            }
        }
    }

    /// Re-evaluate the policy on the latest snapshot and adjust the schedule.
    /// Only an actual change of plan is reported.
    fn reschedule(&self, next_poll: Option<Instant>, after_fetch: bool) -> Option<Instant> {
        let snapshot = self.store.get(&self.run_id);
        match (self.policy.next(snapshot.as_ref()), next_poll) {
            (Refresh::After(delay), None) => {
                if !after_fetch {
                    debug!(run_id = %self.run_id, "polling resumed");
                    self.emit(SyncEvent::PollingResumed);
                }
                Some(Instant::now() + delay)
            }
            (Refresh::After(_), Some(at)) => Some(at),
            (Refresh::Stop, _) => {
                if after_fetch || next_poll.is_some() {
                    debug!(run_id = %self.run_id, "polling stopped");
                    self.emit(SyncEvent::PollingStopped {
                        status: snapshot.map(|s| s.run.status),
                    });
                }
                None
            }
        }
    }

    async fn run(
        mut self,
        mut refresh_rx: UnboundedReceiver<()>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut next_poll = Some(Instant::now());
        let mut feed_open = true;

        loop {
            let poll_at = next_poll;
            tokio::select! {
                _ = &mut shutdown_rx => break,
                change = self.subscription.recv(), if feed_open => match change {
                    Some(change) => {
                        if self.reconciler.apply(&change) {
                            next_poll = self.reschedule(next_poll, false);
                        }
                    }
                    None => {
                        feed_open = false;
                        warn!(run_id = %self.run_id, "change feed disconnected, relying on polling");
                        self.emit(SyncEvent::FeedDisconnected);
                    }
                },
                Some(()) = refresh_rx.recv() => {
                    next_poll = Some(Instant::now());
                }
                _ = tokio::time::sleep_until(poll_at.unwrap_or_else(Instant::now)), if poll_at.is_some() => {
                    self.fetch().await;
                    next_poll = self.reschedule(None, true);
                }
            }
        }

        self.subscription.unsubscribe();
        debug!(run_id = %self.run_id, status = ?self.status(), "stopped observing run");
    }
}
