use crate::model::{PhaseStatus, RunStatus, RunWithPhases};
use crate::orchestrator::WatchEvent;
use crate::sync::SyncEvent;
use ratatui::style::Color;

pub struct UiState {
    pub tab: usize,
    pub run_id: String,
    pub snapshot: Option<RunWithPhases>,
    pub info: String,
    /// Set from the moment `c` is pressed until the dispatcher reports back.
    pub cancel_outstanding: bool,
    /// Last refresh failure, cleared by the next successful fetch.
    pub fetch_error: Option<String>,
    pub feed_connected: bool,
    pub polling: bool,
}

impl UiState {
    /// `has_feed` says whether a live change source backs this view.
    pub fn new(run_id: impl Into<String>, has_feed: bool) -> Self {
        Self {
            tab: 0,
            run_id: run_id.into(),
            snapshot: None,
            info: "Loading run…".into(),
            cancel_outstanding: false,
            fetch_error: None,
            feed_connected: has_feed,
            polling: true,
        }
    }

    pub fn status(&self) -> Option<RunStatus> {
        self.snapshot.as_ref().map(|s| s.status())
    }

    /// Cancel is offered only while the run can still be stopped and no
    /// earlier request is in flight.
    pub fn can_cancel(&self) -> bool {
        !self.cancel_outstanding && self.status().is_some_and(RunStatus::is_cancellable)
    }

    pub fn apply_event(&mut self, ev: WatchEvent) {
        match ev {
            WatchEvent::Snapshot(snapshot) => {
                let status = snapshot.status();
                if self.status() != Some(status) {
                    self.info = format!("Run is {}", status.label().to_lowercase());
                }
                self.snapshot = Some(*snapshot);
            }
            WatchEvent::Sync(SyncEvent::Fetched { .. }) => {
                self.fetch_error = None;
            }
            WatchEvent::Sync(SyncEvent::FetchFailed { message, .. }) => {
                self.fetch_error = Some(message);
            }
            WatchEvent::Sync(SyncEvent::FeedDisconnected) => {
                self.feed_connected = false;
                self.info = "Live updates disconnected; polling only".into();
            }
            WatchEvent::Sync(SyncEvent::PollingStopped { .. }) => {
                self.polling = false;
            }
            WatchEvent::Sync(SyncEvent::PollingResumed) => {
                self.polling = true;
            }
            WatchEvent::CancelPending => {
                self.cancel_outstanding = true;
                self.info = "Cancelling…".into();
            }
            WatchEvent::CancelAccepted => {
                self.cancel_outstanding = false;
                self.info = "Cancel requested; waiting for the orchestrator to stop the run".into();
            }
            WatchEvent::CancelFailed(message) => {
                self.cancel_outstanding = false;
                self.info = format!("Cancel failed: {message}");
            }
        }
    }
}

pub fn run_status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Pending => Color::Gray,
        RunStatus::Running => Color::Yellow,
        RunStatus::Completed => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Cancelled => Color::Magenta,
    }
}

pub fn phase_status_color(status: PhaseStatus) -> Color {
    match status {
        PhaseStatus::Pending => Color::Gray,
        PhaseStatus::Running => Color::Yellow,
        PhaseStatus::Completed => Color::Green,
        PhaseStatus::Failed => Color::Red,
    }
}
