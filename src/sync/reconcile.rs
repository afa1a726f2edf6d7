//! Change-feed reconciliation.
//!
//! The list helpers keep a run's phase executions unique by `id` and sorted
//! ascending by `phase_number` after every operation.

use crate::model::{PhaseExecution, PhaseExecutionPatch, RunPatch};
use crate::sync::feed::{ChangeKind, RowChange, Table};
use crate::sync::store::{PhaseChange, SnapshotStore};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

pub(crate) fn sort_phases(phases: &mut [PhaseExecution]) {
    phases.sort_by_key(|p| p.phase_number);
}

/// Append a new row. Duplicate ids are ignored; a different row already
/// holding the same phase number is superseded.
pub(crate) fn insert_phase(phases: &mut Vec<PhaseExecution>, row: PhaseExecution) -> bool {
    if phases.iter().any(|p| p.id == row.id) {
        return false;
    }
    if let Some(pos) = phases.iter().position(|p| p.phase_number == row.phase_number) {
        debug!(
            phase_number = row.phase_number,
            old = %phases[pos].id,
            new = %row.id,
            "phase number reused, replacing row"
        );
        phases.remove(pos);
    }
    phases.push(row);
    sort_phases(phases);
    true
}

/// Merge into the row with the same id. A miss becomes an insert when the
/// patch carries enough to stand alone, since it most likely follows a lost insert.
pub(crate) fn update_phase(phases: &mut Vec<PhaseExecution>, patch: &PhaseExecutionPatch) -> bool {
    match phases.iter().position(|p| p.id == patch.id) {
        Some(pos) => {
            let before = phases[pos].clone();
            patch.apply_to(&mut phases[pos]);
            let after = &phases[pos];
            let changed = *after != before;
            if after.phase_number != before.phase_number {
                let (id, number) = (after.id.clone(), after.phase_number);
                phases.retain(|p| {
                    let superseded = p.id != id && p.phase_number == number;
                    if superseded {
                        debug!(
                            phase_number = number,
                            old = %p.id,
                            new = %id,
                            "phase number reused, replacing row"
                        );
                    }
                    !superseded
                });
                sort_phases(phases);
            }
            changed
        }
        None => match patch.to_row() {
            Some(row) => {
                debug!(id = %patch.id, "update for unknown phase execution, inserting");
                insert_phase(phases, row)
            }
            None => {
                warn!(id = %patch.id, "dropping partial update for unknown phase execution");
                false
            }
        },
    }
}

pub(crate) fn delete_phase(phases: &mut Vec<PhaseExecution>, id: &str) -> bool {
    let before = phases.len();
    phases.retain(|p| p.id != id);
    phases.len() != before
}

fn decode<T: DeserializeOwned>(row: Option<&Value>, what: &str) -> Option<T> {
    let row = row?;
    match serde_json::from_value(row.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "ignoring malformed {what} row");
            None
        }
    }
}

/// Applies feed deliveries for one run onto the store.
#[derive(Clone)]
pub struct ChangeReconciler {
    run_id: String,
    store: SnapshotStore,
}

impl ChangeReconciler {
    pub fn new(run_id: impl Into<String>, store: SnapshotStore) -> Self {
        Self {
            run_id: run_id.into(),
            store,
        }
    }

    /// Returns whether the snapshot changed.
    pub fn apply(&self, change: &RowChange) -> bool {
        match change.table {
            Table::Runs => self.apply_run(change),
            Table::PhaseExecutions => self.apply_phase(change),
        }
    }

    fn apply_run(&self, change: &RowChange) -> bool {
        if change.kind == ChangeKind::Delete {
            debug!(run_id = %self.run_id, "ignoring run delete");
            return false;
        }
        let Some(patch) = decode::<RunPatch>(change.new.as_ref(), "run") else {
            return false;
        };
        if let Some(id) = patch.id.as_deref() {
            if id != self.run_id {
                warn!(expected = %self.run_id, got = %id, "run change for another run");
                return false;
            }
        }
        self.store.patch(&self.run_id, &patch)
    }

    fn apply_phase(&self, change: &RowChange) -> bool {
        let phase_change = match change.kind {
            ChangeKind::Insert => {
                let Some(mut row) = decode::<PhaseExecution>(change.new.as_ref(), "phase execution")
                else {
                    return false;
                };
                if row.run_id.is_empty() {
                    row.run_id = self.run_id.clone();
                }
                PhaseChange::Insert(row)
            }
            ChangeKind::Update => {
                let Some(patch) =
                    decode::<PhaseExecutionPatch>(change.new.as_ref(), "phase execution")
                else {
                    return false;
                };
                PhaseChange::Update(patch)
            }
            ChangeKind::Delete => {
                let id = change
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(Value::as_str);
                let Some(id) = id else {
                    warn!("phase execution delete without id");
                    return false;
                };
                PhaseChange::Delete { id: id.to_string() }
            }
        };
        self.store.reconcile_phase(&self.run_id, phase_change)
    }
}
