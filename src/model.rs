use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

pub mod validation;

/// Path prefix every backend route lives under.
pub const API_PREFIX: &str = "/phase-orchestrator";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend origin, without the `/phase-orchestrator` prefix.
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Cancel is only offered while the backend can still act on it.
    pub fn is_cancellable(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
            RunStatus::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn label(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "Pending",
            PhaseStatus::Running => "Running",
            PhaseStatus::Completed => "Completed",
            PhaseStatus::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub phase_count: u32,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPhase {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub raw_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanWithPhases {
    #[serde(flatten)]
    pub plan: Plan,
    #[serde(default)]
    pub parsed_phases: Vec<ParsedPhase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanInput {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Body of `PATCH /plans/{id}`; only the fields that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunInput {
    pub plan_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub plan_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub current_phase: u32,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseExecution {
    pub id: String,
    #[serde(default)]
    pub run_id: String,
    pub phase_number: u32,
    #[serde(default)]
    pub phase_name: String,
    pub status: PhaseStatus,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Materialized view of one run: the snapshot held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunWithPhases {
    #[serde(flatten)]
    pub run: Run,
    #[serde(default)]
    pub phase_executions: Vec<PhaseExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
}

impl RunWithPhases {
    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn plan_name(&self) -> Option<&str> {
        self.plan.as_ref().map(|p| p.name.as_str())
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress::of(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    pub current_phase: u32,
    pub completed: usize,
    pub total: usize,
    pub percent: u16,
}

impl RunProgress {
    pub fn of(snapshot: &RunWithPhases) -> Self {
        let total = snapshot.phase_executions.len();
        let completed = snapshot
            .phase_executions
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count();
        let percent = if total > 0 {
            ((completed as f64 / total as f64) * 100.0).round() as u16
        } else {
            0
        };
        Self {
            current_phase: snapshot.run.current_phase,
            completed,
            total,
            percent,
        }
    }

    pub fn phase_label(&self) -> String {
        format!("Phase {} of {}", self.current_phase, self.total)
    }
}

/// Partial run row, as delivered by the change feed.
///
/// Nullable columns use `Option<Option<_>>` so an explicit `null` clears the
/// field while an absent key leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPatch {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub current_phase: Option<u32>,
    #[serde(default, deserialize_with = "present")]
    pub error_message: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub started_at: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub completed_at: Option<Option<String>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RunPatch {
    /// Shallow merge into `run`. The run id and plan id are immutable; a
    /// `planId` in the row is not read.
    pub fn apply_to(&self, run: &mut Run) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(current_phase) = self.current_phase {
            run.current_phase = current_phase;
        }
        if let Some(error_message) = &self.error_message {
            run.error_message = error_message.clone();
        }
        if let Some(started_at) = &self.started_at {
            run.started_at = started_at.clone();
        }
        if let Some(completed_at) = &self.completed_at {
            run.completed_at = completed_at.clone();
        }
        if let Some(created_at) = &self.created_at {
            run.created_at = created_at.clone();
        }
        if let Some(updated_at) = &self.updated_at {
            run.updated_at = updated_at.clone();
        }
    }
}

/// Partial phase-execution row. `id` is the reconciliation key and is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseExecutionPatch {
    pub id: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub phase_number: Option<u32>,
    #[serde(default)]
    pub phase_name: Option<String>,
    #[serde(default)]
    pub status: Option<PhaseStatus>,
    #[serde(default, deserialize_with = "present")]
    pub started_at: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub completed_at: Option<Option<String>>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl PhaseExecutionPatch {
    pub fn apply_to(&self, phase: &mut PhaseExecution) {
        if let Some(run_id) = &self.run_id {
            phase.run_id = run_id.clone();
        }
        if let Some(phase_number) = self.phase_number {
            phase.phase_number = phase_number;
        }
        if let Some(phase_name) = &self.phase_name {
            phase.phase_name = phase_name.clone();
        }
        if let Some(status) = self.status {
            phase.status = status;
        }
        if let Some(started_at) = &self.started_at {
            phase.started_at = started_at.clone();
        }
        if let Some(completed_at) = &self.completed_at {
            phase.completed_at = completed_at.clone();
        }
        if let Some(created_at) = &self.created_at {
            phase.created_at = Some(created_at.clone());
        }
        if let Some(updated_at) = &self.updated_at {
            phase.updated_at = Some(updated_at.clone());
        }
    }

    /// Build a full row from the patch, if it carries the fields a row needs.
    pub fn to_row(&self) -> Option<PhaseExecution> {
        let phase_number = self.phase_number?;
        let status = self.status?;
        let mut row = PhaseExecution {
            id: self.id.clone(),
            run_id: String::new(),
            phase_number,
            phase_name: String::new(),
            status,
            started_at: None,
            completed_at: None,
            created_at: None,
            updated_at: None,
        };
        self.apply_to(&mut row);
        Some(row)
    }
}

/// Marks a nullable field as present, keeping `null` as `Some(None)`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(statuses: &[PhaseStatus]) -> RunWithPhases {
        RunWithPhases {
            run: Run {
                id: "R1".into(),
                plan_id: "P1".into(),
                status: RunStatus::Running,
                current_phase: 2,
                error_message: None,
                started_at: None,
                completed_at: None,
                created_at: String::new(),
                updated_at: String::new(),
            },
            phase_executions: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| PhaseExecution {
                    id: format!("PE{}", i + 1),
                    run_id: "R1".into(),
                    phase_number: i as u32 + 1,
                    phase_name: format!("Phase {}", i + 1),
                    status: *s,
                    started_at: None,
                    completed_at: None,
                    created_at: None,
                    updated_at: None,
                })
                .collect(),
            plan: None,
        }
    }

    #[test]
    fn run_with_phases_reads_backend_payload() {
        let raw = json!({
            "id": "R1",
            "planId": "P1",
            "status": "running",
            "currentPhase": 1,
            "errorMessage": null,
            "startedAt": "2025-01-01T00:00:00Z",
            "completedAt": null,
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-01T00:00:01Z",
            "phaseExecutions": [
                { "id": "PE1", "runId": "R1", "phaseNumber": 1, "phaseName": "Foundation", "status": "running" }
            ],
            "plan": { "id": "P1", "name": "Migration", "content": "## Phase 1: Foundation", "phaseCount": 1 }
        });
        let snap: RunWithPhases = serde_json::from_value(raw).unwrap();
        assert_eq!(snap.status(), RunStatus::Running);
        assert_eq!(snap.plan_name(), Some("Migration"));
        assert_eq!(snap.phase_executions[0].phase_name, "Foundation");
    }

    #[test]
    fn run_patch_distinguishes_null_from_absent() {
        let mut run = snapshot(&[]).run;
        run.error_message = Some("boom".into());
        run.started_at = Some("t0".into());

        let clear: RunPatch = serde_json::from_value(json!({ "errorMessage": null })).unwrap();
        clear.apply_to(&mut run);
        assert_eq!(run.error_message, None);
        assert_eq!(run.started_at.as_deref(), Some("t0"));
    }

    #[test]
    fn run_patch_keeps_id_and_unlisted_fields() {
        let mut run = snapshot(&[]).run;
        let patch: RunPatch =
            serde_json::from_value(json!({ "id": "OTHER", "planId": "P2", "status": "completed" }))
                .unwrap();
        patch.apply_to(&mut run);
        assert_eq!(run.id, "R1");
        assert_eq!(run.plan_id, "P1");
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn phase_patch_builds_row_only_when_complete() {
        let partial: PhaseExecutionPatch =
            serde_json::from_value(json!({ "id": "PE9", "status": "running" })).unwrap();
        assert!(partial.to_row().is_none());

        let full: PhaseExecutionPatch = serde_json::from_value(
            json!({ "id": "PE9", "phaseNumber": 3, "status": "running", "phaseName": "Tests" }),
        )
        .unwrap();
        let row = full.to_row().unwrap();
        assert_eq!(row.phase_number, 3);
        assert_eq!(row.phase_name, "Tests");
    }

    #[test]
    fn progress_rounds_percent() {
        use PhaseStatus::*;
        let p = snapshot(&[Completed, Running, Pending]).progress();
        assert_eq!(p.completed, 1);
        assert_eq!(p.total, 3);
        assert_eq!(p.percent, 33);
        assert_eq!(p.phase_label(), "Phase 2 of 3");

        assert_eq!(snapshot(&[Completed, Completed, Pending]).progress().percent, 67);
        assert_eq!(snapshot(&[]).progress().percent, 0);
    }

    #[test]
    fn status_helpers() {
        assert!(RunStatus::Pending.is_cancellable());
        assert!(RunStatus::Running.is_cancellable());
        assert!(!RunStatus::Completed.is_cancellable());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn update_plan_input_skips_unset_fields() {
        let input = UpdatePlanInput {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&input).unwrap(), json!({ "name": "Renamed" }));
    }
}
