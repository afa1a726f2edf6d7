//! Post-watch processing.
//!
//! Handles exports once a watch ends.

use crate::model::RunWithPhases;
use anyhow::{Context, Result};
use std::path::Path;

/// Write the snapshot as pretty JSON.
pub(crate) fn export_json(path: &Path, snapshot: &RunWithPhases) -> Result<()> {
    let body = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Process the final snapshot of a watch and return messages for presentation layers.
pub(crate) fn process_watch_completion(
    export_path: Option<&Path>,
    snapshot: Option<&RunWithPhases>,
) -> Vec<String> {
    let mut messages = Vec::new();
    if let Some(path) = export_path {
        match snapshot {
            Some(s) => match export_json(path, s) {
                Ok(()) => messages.push(format!("Exported JSON: {}", path.display())),
                Err(e) => messages.push(format!("Export JSON failed: {e:#}")),
            },
            None => messages.push("Nothing to export: run was never loaded".into()),
        }
    }
    messages
}
