use crate::model::{RunStatus, RunWithPhases};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    After(Duration),
    Stop,
}

/// Decides whether a full re-fetch follows the current one.
///
/// Only a running snapshot is polled. Pending, terminal and not-yet-loaded
/// runs rely on the change feed alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub interval: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RefreshPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn next(&self, snapshot: Option<&RunWithPhases>) -> Refresh {
        match snapshot.map(|s| s.run.status) {
            Some(RunStatus::Running) => Refresh::After(self.interval),
            _ => Refresh::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::run_snapshot;

    #[test]
    fn polls_only_while_running() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.next(Some(&run_snapshot("R1", RunStatus::Running))),
            Refresh::After(Duration::from_millis(2000))
        );
        for status in [
            RunStatus::Pending,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(
                policy.next(Some(&run_snapshot("R1", status))),
                Refresh::Stop
            );
        }
        assert_eq!(policy.next(None), Refresh::Stop);
    }

    #[test]
    fn interval_is_configurable() {
        let policy = RefreshPolicy::new(Duration::from_millis(500));
        assert_eq!(
            policy.next(Some(&run_snapshot("R1", RunStatus::Running))),
            Refresh::After(Duration::from_millis(500))
        );
    }
}
