//! Row-change feed abstraction.
//!
//! A `ChangeFeed` hands out `FeedSubscription`s scoped by server-side style
//! filters. `LocalChangeFeed` is an in-process hub implementing it: embedders
//! bridge their realtime connection into `publish`, tests drive it directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    #[serde(rename = "orchestrator_runs")]
    Runs,
    #[serde(rename = "orchestrator_phase_executions")]
    PhaseExecutions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed row change. `new` is set for insert/update, `old` for delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    #[serde(rename = "eventType")]
    pub kind: ChangeKind,
    pub table: Table,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl RowChange {
    /// The row the change is about: `new` unless it is absent or empty.
    pub fn row(&self) -> Option<&Value> {
        let non_empty = |v: &&Value| v.as_object().map(|o| !o.is_empty()).unwrap_or(false);
        self.new
            .as_ref()
            .filter(non_empty)
            .or_else(|| self.old.as_ref().filter(non_empty))
    }
}

#[cfg(test)]
impl RowChange {
    pub fn insert(table: Table, row: Value) -> Self {
        Self {
            kind: ChangeKind::Insert,
            table,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(table: Table, row: Value) -> Self {
        Self {
            kind: ChangeKind::Update,
            table,
            new: Some(row),
            old: None,
        }
    }

    pub fn delete(table: Table, old: Value) -> Self {
        Self {
            kind: ChangeKind::Delete,
            table,
            new: None,
            old: Some(old),
        }
    }
}

/// `column = value` restricted to one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub table: Table,
    pub column: &'static str,
    pub value: String,
}

impl FeedFilter {
    /// The run row itself: `id = run_id`.
    pub fn run(run_id: &str) -> Self {
        Self {
            table: Table::Runs,
            column: "id",
            value: run_id.to_string(),
        }
    }

    /// Phase executions of the run: `runId = run_id`.
    pub fn phases_of(run_id: &str) -> Self {
        Self {
            table: Table::PhaseExecutions,
            column: "runId",
            value: run_id.to_string(),
        }
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        change.table == self.table
            && change
                .row()
                .and_then(|row| row.get(self.column))
                .and_then(Value::as_str)
                == Some(self.value.as_str())
    }

    /// Same table, but the row carries no value for the filtered column.
    pub fn is_unattributed(&self, change: &RowChange) -> bool {
        change.table == self.table
            && change
                .row()
                .and_then(|row| row.get(self.column))
                .map_or(true, Value::is_null)
    }
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A live subscription. Released exactly once, by `unsubscribe` or on drop.
pub struct FeedSubscription {
    rx: UnboundedReceiver<RowChange>,
    release: Option<Release>,
}

impl FeedSubscription {
    pub fn new(
        rx: UnboundedReceiver<RowChange>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Next change, or `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<RowChange> {
        self.rx.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
        self.rx.close();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

pub trait ChangeFeed: Send + Sync {
    /// Deliver every change matching any of `filters` until unsubscribed.
    fn subscribe(&self, filters: Vec<FeedFilter>) -> FeedSubscription;
}

#[derive(Default)]
struct Hub {
    next_id: u64,
    subscribers: HashMap<u64, (Vec<FeedFilter>, UnboundedSender<RowChange>)>,
}

#[derive(Clone, Default)]
pub struct LocalChangeFeed {
    hub: Arc<Mutex<Hub>>,
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Route `change` to every matching subscriber. Returns the delivery count.
    ///
    /// A row missing the filtered column goes to the one subscriber watching
    /// that table; with several candidates it cannot be routed and is dropped.
    pub fn publish(&self, change: RowChange) -> usize {
        let hub = self.hub();
        let mut delivered = 0;
        for (filters, tx) in hub.subscribers.values() {
            if filters.iter().any(|f| f.matches(&change)) && tx.send(change.clone()).is_ok() {
                delivered += 1;
            }
        }
        if delivered > 0 {
            return delivered;
        }

        let owners: Vec<_> = hub
            .subscribers
            .values()
            .filter(|(filters, _)| filters.iter().any(|f| f.is_unattributed(&change)))
            .collect();
        match owners.as_slice() {
            [] => 0,
            [(_, tx)] => {
                debug!(table = ?change.table, "routing unattributed change to sole subscriber");
                usize::from(tx.send(change).is_ok())
            }
            _ => {
                warn!(
                    table = ?change.table,
                    candidates = owners.len(),
                    "dropping change without a filter column, owner is ambiguous"
                );
                0
            }
        }
    }

    /// Drop every subscriber's sender, as a lost connection would.
    pub fn disconnect_all(&self) {
        let mut hub = self.hub();
        debug!(count = hub.subscribers.len(), "disconnecting feed subscribers");
        hub.subscribers.clear();
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.hub().subscribers.len()
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(&self, filters: Vec<FeedFilter>) -> FeedSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut hub = self.hub();
            let id = hub.next_id;
            hub.next_id += 1;
            hub.subscribers.insert(id, (filters, tx));
            id
        };
        let hub = self.hub.clone();
        FeedSubscription::new(rx, move || {
            hub.lock()
                .unwrap_or_else(|e| e.into_inner())
                .subscribers
                .remove(&id);
        })
    }
}
