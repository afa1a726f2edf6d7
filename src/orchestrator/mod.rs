//! Watch orchestration.
//!
//! Owns the run session and the cancel command for one watched run, and emits
//! events for presentation layers (text printer or TUI). Post-watch exports
//! live here too, so the CLI and UI share them.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, UiCommand, WatchEvent, WatchOptions, WatchTarget};
pub(crate) use post_process::{export_json, process_watch_completion};
