use std::time::Duration;

use log::{info, warn};

const SLEEP_NOT_STARTED: Duration = Duration::from_secs(2);
const SLEEP_WHILE_RUNNING: Duration = Duration::from_secs(5);

/// Tracks worker health across status probes.
///
/// Drives the probe interval (short until the worker has been seen ready,
/// longer afterwards) and deduplicates repeated "ready" log lines. Reset
/// whenever the worker process restarts.
#[derive(Debug)]
pub struct MonitorState {
    was_ready: bool,
    ok_reported: bool,
    failed: bool,
    last_error: Option<String>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorState {
    pub fn new() -> Self {
        MonitorState {
            was_ready: false,
            ok_reported: false,
            failed: false,
            last_error: None,
        }
    }

    /// Probe interval: stay responsive while the worker is still starting,
    /// back off once it has reported ready at least once.
    pub fn sleep_for(&self) -> Duration {
        if self.was_ready {
            SLEEP_WHILE_RUNNING
        } else {
            SLEEP_NOT_STARTED
        }
    }

    pub fn reset(&mut self) {
        self.was_ready = false;
        self.ok_reported = false;
        self.failed = false;
        self.last_error = None;
    }

    /// Record a successful probe and its `ready` flag.
    pub fn mark_ready(&mut self, ready: bool) {
        self.was_ready = true;
        let msg = format!(
            "Worker is running, reporting {}ready",
            if ready { "" } else { "not " }
        );
        if ready {
            if !self.ok_reported {
                info!("{msg}");
                self.ok_reported = true;
            }
        } else {
            self.ok_reported = false;
            warn!("{msg}");
        }
    }

    /// Record a failed probe. `process_alive` reflects whether the OS process
    /// still exists, which is logged for diagnostics only.
    pub fn mark_failed(&mut self, error: Option<String>, process_alive: bool) {
        let err_str = error
            .as_deref()
            .map(|e| format!(": {e}"))
            .unwrap_or_default();
        warn!(
            "Worker failure detected{err_str}, process is {}running",
            if process_alive { "" } else { "not " }
        );
        self.ok_reported = false;
        self.failed = true;
        self.last_error = error;
    }

    /// Log a warning when a previously-ready worker is failing.
    pub fn report(&self, process_alive: bool) {
        if self.failed && self.was_ready {
            let mut descr = if process_alive {
                "running".to_string()
            } else {
                "not running".to_string()
            };
            if let Some(e) = &self.last_error {
                descr += &format!(", last error: {e}");
            }
            warn!("Worker failure detected, process is {descr}");
        }
    }

    pub fn was_ready(&self) -> bool {
        self.was_ready
    }

    pub fn failed(&self) -> bool {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_interval_tracks_readiness() {
        let mut state = MonitorState::new();
        assert_eq!(state.sleep_for(), SLEEP_NOT_STARTED);
        state.mark_ready(true);
        assert_eq!(state.sleep_for(), SLEEP_WHILE_RUNNING);
        state.reset();
        assert_eq!(state.sleep_for(), SLEEP_NOT_STARTED);
    }

    #[test]
    fn failure_then_recovery() {
        let mut state = MonitorState::new();
        state.mark_ready(true);
        state.mark_failed(Some("connection reset".into()), true);
        assert!(state.failed());
        state.mark_ready(true);
        assert!(state.was_ready());
    }

    #[test]
    fn reset_clears_failure() {
        let mut state = MonitorState::new();
        state.mark_failed(None, false);
        state.reset();
        assert!(!state.failed());
        assert!(!state.was_ready());
    }
}
