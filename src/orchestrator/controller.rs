//! Run watch controller.
//!
//! Drives a `RunSession`, dispatches cancel on request and forwards snapshot
//! changes and session notifications to the presentation layer.

use crate::api::RunBackend;
use crate::error::CommandError;
use crate::model::RunWithPhases;
use crate::sync::{
    ChangeFeed, CommandDispatcher, RefreshPolicy, RunSession, SessionParams, SnapshotStore,
    SyncEvent,
};
use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Commands emitted by UI layers to control the watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UiCommand {
    Cancel,
    Refresh,
    Quit,
}

/// Events for presentation layers.
#[derive(Debug, Clone)]
pub(crate) enum WatchEvent {
    Snapshot(Box<RunWithPhases>),
    Sync(SyncEvent),
    /// A cancel request is in flight; further cancel commands are ignored until it resolves.
    CancelPending,
    CancelAccepted,
    CancelFailed(String),
}

/// What to watch and with which collaborators.
pub(crate) struct WatchTarget {
    pub backend: Arc<dyn RunBackend>,
    pub feed: Arc<dyn ChangeFeed>,
    pub store: SnapshotStore,
    pub run_id: String,
    pub policy: RefreshPolicy,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WatchOptions {
    /// Return as soon as a terminal status is observed.
    pub exit_on_terminal: bool,
    /// Fail when the first fetch fails and nothing is known about the run.
    pub fail_on_initial_fetch: bool,
    /// Force a fetch every poll interval while the run is still pending.
    /// Turned on by itself once the feed disconnects.
    pub nudge_pending: bool,
}

/// Watch one run until quit (or a terminal status, per `opts`) and return the
/// last snapshot seen.
pub(crate) async fn run_controller(
    target: WatchTarget,
    opts: WatchOptions,
    event_tx: UnboundedSender<WatchEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<Option<RunWithPhases>> {
    let dispatcher = CommandDispatcher::new(target.backend.clone(), target.store.clone());
    let (sync_tx, mut sync_rx) = mpsc::unbounded_channel::<SyncEvent>();
    let session = RunSession::open(
        SessionParams {
            backend: target.backend,
            store: target.store,
            run_id: target.run_id.clone(),
            policy: target.policy,
            events: sync_tx,
        },
        target.feed.as_ref(),
    );
    let mut snapshots = session.watch();
    let mut last: Option<RunWithPhases> = None;

    // At most one cancel in flight.
    let mut cancel_task: Option<tokio::task::JoinHandle<Result<(), CommandError>>> = None;

    // Without a live feed, nothing else would notice a pending run starting.
    let mut nudge_pending = opts.nudge_pending;
    let period = target.policy.interval;
    let mut nudge = tokio::time::interval_at(Instant::now() + period, period);
    nudge.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Cancel) => {
                        if cancel_task.is_some() {
                            debug!(run_id = %target.run_id, "cancel already outstanding");
                            continue;
                        }
                        let dispatcher = dispatcher.clone();
                        let run_id = target.run_id.clone();
                        cancel_task = Some(tokio::spawn(async move { dispatcher.cancel(&run_id).await }));
                        let _ = event_tx.send(WatchEvent::CancelPending);
                    }
                    Some(UiCommand::Refresh) => session.refresh_now(),
                    Some(UiCommand::Quit) | None => break Ok(()),
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = current {
                    let terminal = snapshot.status().is_terminal();
                    let _ = event_tx.send(WatchEvent::Snapshot(Box::new(snapshot.clone())));
                    last = Some(snapshot);
                    if terminal && opts.exit_on_terminal {
                        break Ok(());
                    }
                }
            }
            Some(ev) = sync_rx.recv() => {
                match &ev {
                    SyncEvent::FetchFailed { message, has_snapshot: false } => {
                        if opts.fail_on_initial_fetch && last.is_none() {
                            break Err(anyhow!("{message}"));
                        }
                    }
                    SyncEvent::FeedDisconnected => nudge_pending = true,
                    _ => {}
                }
                let _ = event_tx.send(WatchEvent::Sync(ev));
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            done = async {
                match cancel_task.as_mut() {
                    Some(h) => h.await,
                    None => futures::future::pending().await,
                }
            } => {
                cancel_task = None;
                let ev = match done {
                    Ok(Ok(())) => {
                        // Refetch rather than assume the cancelled status.
                        session.refresh_now();
                        WatchEvent::CancelAccepted
                    }
                    Ok(Err(e)) => WatchEvent::CancelFailed(e.to_string()),
                    Err(e) => WatchEvent::CancelFailed(format!("cancel task failed: {e}")),
                };
                let _ = event_tx.send(ev);
            }
            _ = nudge.tick(), if nudge_pending => {
                let pending = last
                    .as_ref()
                    .map(|s| s.status() == crate::model::RunStatus::Pending)
                    .unwrap_or(false);
                if pending {
                    session.refresh_now();
                }
            }
        }
    };

    if let Some(handle) = cancel_task.take() {
        // A cancel already sent still reaches the backend; we just stop waiting for it.
        handle.abort();
    }
    let latest = session.snapshot().or(last);
    session.close().await;
    res.map(|()| latest)
}
