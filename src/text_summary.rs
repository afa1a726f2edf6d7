//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for runs and plans in text mode.

use crate::metrics;
use crate::model::{Plan, PlanWithPhases, RunWithPhases};
use time::OffsetDateTime;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// One line describing where a run stands; printed on every observed change.
pub(crate) fn run_status_line(snapshot: &RunWithPhases) -> String {
    let progress = snapshot.progress();
    let mut line = format!(
        "[{}] {} ({}%, {}/{} phases completed)",
        snapshot.status().label(),
        progress.phase_label(),
        progress.percent,
        progress.completed,
        progress.total
    );
    if let Some(msg) = snapshot.run.error_message.as_deref() {
        line.push_str(&format!(" - {msg}"));
    }
    line
}

/// Full run summary: header, progress, one line per phase and the error message.
pub(crate) fn build_run_summary(snapshot: &RunWithPhases, now: OffsetDateTime) -> TextSummary {
    let run = &snapshot.run;
    let mut lines = Vec::new();

    lines.push(format!("Run:    {}", run.id));
    match snapshot.plan_name() {
        Some(name) => lines.push(format!("Plan:   {name} ({})", run.plan_id)),
        None => lines.push(format!("Plan:   {}", run.plan_id)),
    }
    let elapsed = metrics::elapsed(run.started_at.as_deref(), run.completed_at.as_deref(), now)
        .map(|d| format!(" after {}", metrics::format_elapsed(d)))
        .unwrap_or_default();
    lines.push(format!("Status: {}{elapsed}", snapshot.status().label()));

    let progress = snapshot.progress();
    lines.push(format!(
        "Progress: {} - {}% ({}/{} phases completed)",
        progress.phase_label(),
        progress.percent,
        progress.completed,
        progress.total
    ));

    for phase in &snapshot.phase_executions {
        let took = metrics::elapsed(
            phase.started_at.as_deref(),
            phase.completed_at.as_deref(),
            now,
        )
        .map(metrics::format_elapsed)
        .unwrap_or_else(|| "-".into());
        lines.push(format!(
            "  {:>2}. {:<32} {:<10} {took}",
            phase.phase_number,
            phase.phase_name,
            phase.status.label()
        ));
    }

    if let Some(msg) = run.error_message.as_deref() {
        lines.push(format!("Error: {msg}"));
    }

    TextSummary { lines }
}

pub(crate) fn plan_list_lines(plans: &[Plan]) -> TextSummary {
    if plans.is_empty() {
        return TextSummary {
            lines: vec!["No plans".into()],
        };
    }
    let lines = plans
        .iter()
        .map(|p| {
            format!(
                "{}  {:<32} {:>3} phases  updated {}",
                p.id, p.name, p.phase_count, p.updated_at
            )
        })
        .collect();
    TextSummary { lines }
}

pub(crate) fn plan_detail_lines(plan: &PlanWithPhases) -> TextSummary {
    let p = &plan.plan;
    let mut lines = vec![
        format!("Plan:    {} ({})", p.name, p.id),
        format!("Phases:  {}", p.phase_count),
    ];
    if let Some(dir) = p.working_directory.as_deref() {
        lines.push(format!("Workdir: {dir}"));
    }
    lines.push(format!("Updated: {}", p.updated_at));
    for phase in &plan.parsed_phases {
        lines.push(format!(
            "  {:>2}. {} ({} tasks)",
            phase.number,
            phase.name,
            phase.tasks.len()
        ));
    }
    TextSummary { lines }
}
