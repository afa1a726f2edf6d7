//! Fixtures shared by the sync tests.

use crate::api::RunBackend;
use crate::error::ApiError;
use crate::model::{PhaseExecution, PhaseStatus, Run, RunStatus, RunWithPhases};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) fn run_snapshot(id: &str, status: RunStatus) -> RunWithPhases {
    RunWithPhases {
        run: Run {
            id: id.into(),
            plan_id: "P1".into(),
            status,
            current_phase: 0,
            error_message: None,
            started_at: Some("2025-01-01T00:00:00Z".into()),
            completed_at: None,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        },
        phase_executions: Vec::new(),
        plan: None,
    }
}

pub(crate) fn phase(id: &str, number: u32) -> PhaseExecution {
    PhaseExecution {
        id: id.into(),
        run_id: "R1".into(),
        phase_number: number,
        phase_name: format!("Phase {number}"),
        status: PhaseStatus::Pending,
        started_at: None,
        completed_at: None,
        created_at: None,
        updated_at: None,
    }
}

/// In-memory backend. Holds the authoritative run rows; tests mutate them to
/// play the orchestrator's part.
#[derive(Default)]
pub(crate) struct FakeBackend {
    runs: Mutex<HashMap<String, RunWithPhases>>,
    failing_gets: AtomicUsize,
    reject_commands: Mutex<Option<String>>,
    pub get_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_run(run: RunWithPhases) -> Self {
        let backend = Self::default();
        backend.put(run);
        backend
    }

    pub fn put(&self, run: RunWithPhases) {
        self.runs.lock().unwrap().insert(run.run.id.clone(), run);
    }

    pub fn update(&self, run_id: &str, f: impl FnOnce(&mut RunWithPhases)) {
        if let Some(run) = self.runs.lock().unwrap().get_mut(run_id) {
            f(run);
        }
    }

    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    pub fn reject_commands(&self, message: &str) {
        *self.reject_commands.lock().unwrap() = Some(message.to_string());
    }

    pub fn gets(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn rejection(&self) -> Option<ApiError> {
        self.reject_commands
            .lock()
            .unwrap()
            .clone()
            .map(|message| ApiError::Backend {
                status: StatusCode::BAD_REQUEST,
                message,
            })
    }
}

#[async_trait]
impl RunBackend for FakeBackend {
    async fn get_run(&self, run_id: &str) -> Result<RunWithPhases, ApiError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_gets.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_gets.store(failing - 1, Ordering::SeqCst);
            return Err(ApiError::Backend {
                status: StatusCode::BAD_GATEWAY,
                message: "Failed to fetch run".into(),
            });
        }
        self.runs
            .lock()
            .unwrap()
            .get(run_id)
            .cloned()
            .ok_or_else(|| ApiError::Backend {
                status: StatusCode::NOT_FOUND,
                message: "Run not found".into(),
            })
    }

    async fn start_run(&self, plan_id: &str) -> Result<RunWithPhases, ApiError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.rejection() {
            return Err(err);
        }
        let mut run = run_snapshot("R1", RunStatus::Pending);
        run.run.plan_id = plan_id.to_string();
        run.run.started_at = None;
        self.put(run.clone());
        Ok(run)
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), ApiError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.rejection() {
            return Err(err);
        }
        self.update(run_id, |r| {
            if r.run.status.is_cancellable() {
                r.run.status = RunStatus::Cancelled;
            }
        });
        Ok(())
    }
}
