//! Last-known snapshot of every observed run.
//!
//! Each run id owns a `watch` channel; writers go through `set`, `patch` and
//! `reconcile_phase`, readers call `get` or hold a receiver from `watch`.

use crate::model::{PhaseExecution, PhaseExecutionPatch, RunPatch, RunWithPhases};
use crate::sync::reconcile;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// A phase-execution change, already decoded from the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseChange {
    Insert(PhaseExecution),
    Update(PhaseExecutionPatch),
    Delete { id: String },
}

type Slot = watch::Sender<Option<RunWithPhases>>;

#[derive(Clone, Default)]
pub struct SnapshotStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, run_id: &str) -> Option<RunWithPhases> {
        self.slots()
            .get(run_id)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Observe a run. The receiver sees `None` until the first `set`.
    pub fn watch(&self, run_id: &str) -> watch::Receiver<Option<RunWithPhases>> {
        self.slots()
            .entry(run_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Replace the whole snapshot, normalizing phase order.
    pub fn set(&self, run_id: &str, mut snapshot: RunWithPhases) {
        reconcile::sort_phases(&mut snapshot.phase_executions);
        self.slots()
            .entry(run_id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(snapshot));
    }

    /// Shallow-merge run fields. No-op without a snapshot.
    pub fn patch(&self, run_id: &str, patch: &RunPatch) -> bool {
        self.modify(run_id, |snapshot| {
            let before = snapshot.run.clone();
            patch.apply_to(&mut snapshot.run);
            snapshot.run != before
        })
    }

    /// Apply one phase-execution change. No-op without a snapshot.
    pub fn reconcile_phase(&self, run_id: &str, change: PhaseChange) -> bool {
        self.modify(run_id, |snapshot| {
            let phases = &mut snapshot.phase_executions;
            match change {
                PhaseChange::Insert(row) => reconcile::insert_phase(phases, row),
                PhaseChange::Update(patch) => reconcile::update_phase(phases, &patch),
                PhaseChange::Delete { id } => reconcile::delete_phase(phases, &id),
            }
        })
    }

    /// Run `f` on the snapshot if one exists; observers are notified only when it reports a change.
    fn modify(&self, run_id: &str, f: impl FnOnce(&mut RunWithPhases) -> bool) -> bool {
        let slots = self.slots();
        let Some(slot) = slots.get(run_id) else {
            return false;
        };
        slot.send_if_modified(|current| match current {
            Some(snapshot) => f(snapshot),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use crate::sync::testing::{phase, run_snapshot as run};
    use pretty_assertions::assert_eq;

    #[test]
    fn operations_without_snapshot_are_noops() {
        let store = SnapshotStore::new();
        let patch = RunPatch {
            status: Some(RunStatus::Running),
            ..Default::default()
        };
        assert!(!store.patch("R1", &patch));
        assert!(!store.reconcile_phase("R1", PhaseChange::Insert(phase("PE1", 1))));
        assert!(store.get("R1").is_none());

        let _rx = store.watch("R1");
        assert!(!store.patch("R1", &patch));
        assert!(store.get("R1").is_none());
    }

    #[test]
    fn patch_merges_without_clobbering() {
        let store = SnapshotStore::new();
        store.set("R1", run("R1", RunStatus::Running));

        let patch = RunPatch {
            status: Some(RunStatus::Completed),
            ..Default::default()
        };
        assert!(store.patch("R1", &patch));

        let snap = store.get("R1").unwrap();
        assert_eq!(snap.run.status, RunStatus::Completed);
        assert_eq!(snap.run.plan_id, "P1");
        assert_eq!(snap.run.started_at.as_deref(), Some("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn set_sorts_phases() {
        let store = SnapshotStore::new();
        let mut snap = run("R1", RunStatus::Running);
        snap.phase_executions = vec![phase("PE3", 3), phase("PE1", 1), phase("PE2", 2)];
        store.set("R1", snap);

        let ids: Vec<_> = store
            .get("R1")
            .unwrap()
            .phase_executions
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["PE1", "PE2", "PE3"]);
    }

    #[tokio::test]
    async fn watchers_are_notified_only_on_change() {
        let store = SnapshotStore::new();
        let mut rx = store.watch("R1");
        assert!(rx.borrow_and_update().is_none());

        store.set("R1", run("R1", RunStatus::Pending));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        assert!(!store.reconcile_phase(
            "R1",
            PhaseChange::Delete {
                id: "missing".into()
            }
        ));
        assert!(!rx.has_changed().unwrap());

        store.reconcile_phase("R1", PhaseChange::Insert(phase("PE1", 1)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().unwrap().phase_executions.len(), 1);
    }
}
