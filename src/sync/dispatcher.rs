use crate::api::RunBackend;
use crate::error::CommandError;
use crate::model::RunWithPhases;
use crate::sync::store::SnapshotStore;
use std::sync::Arc;
use tracing::info;

/// Issues start/cancel and folds their results into the store.
///
/// Each call sends exactly one request; callers keep their trigger disabled
/// while a command is outstanding.
#[derive(Clone)]
pub struct CommandDispatcher {
    backend: Arc<dyn RunBackend>,
    store: SnapshotStore,
}

impl CommandDispatcher {
    pub fn new(backend: Arc<dyn RunBackend>, store: SnapshotStore) -> Self {
        Self { backend, store }
    }

    /// Start a run and seed its snapshot. On failure nothing is stored.
    pub async fn start(&self, plan_id: &str) -> Result<RunWithPhases, CommandError> {
        let run = self.backend.start_run(plan_id).await?;
        info!(run_id = %run.run.id, plan_id, status = run.run.status.label(), "run started");
        self.store.set(&run.run.id, run.clone());
        Ok(run)
    }

    /// Ask the backend to cancel. The snapshot is left alone: the terminal
    /// status arrives later through polling or the feed.
    pub async fn cancel(&self, run_id: &str) -> Result<(), CommandError> {
        let snapshot = self
            .store
            .get(run_id)
            .ok_or_else(|| CommandError::UnknownRun(run_id.to_string()))?;
        let status = snapshot.run.status;
        if !status.is_cancellable() {
            return Err(CommandError::NotCancellable {
                run_id: run_id.to_string(),
                status: status.label().to_lowercase(),
            });
        }
        self.backend.cancel_run(run_id).await?;
        info!(run_id, "cancel accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use crate::sync::testing::{run_snapshot, FakeBackend};
    use std::sync::atomic::Ordering;

    fn dispatcher(backend: Arc<FakeBackend>) -> (CommandDispatcher, SnapshotStore) {
        let store = SnapshotStore::new();
        (CommandDispatcher::new(backend, store.clone()), store)
    }

    #[tokio::test]
    async fn start_seeds_snapshot() {
        let backend = Arc::new(FakeBackend::default());
        let (dispatcher, store) = dispatcher(backend.clone());

        let run = dispatcher.start("P1").await.unwrap();

        assert_eq!(run.run.id, "R1");
        let snap = store.get("R1").unwrap();
        assert_eq!(snap.run.status, RunStatus::Pending);
        assert_eq!(snap.run.plan_id, "P1");
    }

    #[tokio::test]
    async fn failed_start_leaves_store_untouched() {
        let backend = Arc::new(FakeBackend::default());
        backend.reject_commands("Plan has no phases");
        let (dispatcher, store) = dispatcher(backend.clone());

        let err = dispatcher.start("P1").await.unwrap_err();

        assert_eq!(err.to_string(), "Plan has no phases");
        assert!(store.get("R1").is_none());
        assert_eq!(backend.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_does_not_flip_status_optimistically() {
        let backend = Arc::new(FakeBackend::default());
        let (dispatcher, store) = dispatcher(backend.clone());
        store.set("R1", run_snapshot("R1", RunStatus::Running));

        dispatcher.cancel("R1").await.unwrap();

        assert_eq!(backend.cancel_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("R1").unwrap().run.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn cancel_refused_for_terminal_or_unknown_runs() {
        let backend = Arc::new(FakeBackend::default());
        let (dispatcher, store) = dispatcher(backend.clone());

        let err = dispatcher.cancel("R1").await.unwrap_err();
        assert!(matches!(err, CommandError::UnknownRun(_)));

        store.set("R1", run_snapshot("R1", RunStatus::Completed));
        let err = dispatcher.cancel("R1").await.unwrap_err();
        assert!(matches!(err, CommandError::NotCancellable { .. }));
        assert_eq!(backend.cancel_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_cancel_surfaces_error_without_mutation() {
        let backend = Arc::new(FakeBackend::default());
        backend.reject_commands("Run is not active");
        let (dispatcher, store) = dispatcher(backend.clone());
        store.set("R1", run_snapshot("R1", RunStatus::Pending));

        let err = dispatcher.cancel("R1").await.unwrap_err();

        assert_eq!(err.to_string(), "Run is not active");
        assert_eq!(store.get("R1").unwrap().run.status, RunStatus::Pending);
    }
}
