//! Progress and completion logging for polled operations.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::models::Operation;
use crate::utils::duration_string;

/// Don't log progress for waits that finish almost immediately.
const REPORT_THRESHOLD: Duration = Duration::from_secs(2);
/// At most one progress line per operation in this window.
const MIN_PROGRESS_INTERVAL: Duration = Duration::from_secs(15);

/// Tracks which operations (including expanded children) have already been
/// reported, so each completion is logged exactly once across poll rounds.
pub(crate) struct WaitHandler {
    started: Instant,
    completed: HashSet<String>,
    last_progress: HashMap<String, Instant>,
}

impl WaitHandler {
    pub(crate) fn new() -> Self {
        WaitHandler {
            started: Instant::now(),
            completed: HashSet::new(),
            last_progress: HashMap::new(),
        }
    }

    pub(crate) fn report(&mut self, operations: &[Operation]) {
        for op in operations {
            self.report_one(op);
            if let Some(children) = &op.children_detail {
                for child in children {
                    self.report_one(child);
                }
            }
        }
    }

    fn report_one(&mut self, op: &Operation) {
        if op.state.is_terminal() {
            if !self.completed.insert(op.id.clone()) {
                return;
            }
            self.last_progress.remove(&op.id);
            let took = op
                .started_at
                .zip(op.ended_at)
                .and_then(|(s, e)| (e - s).to_std().ok())
                .map(|d| format!(" in {}", duration_string(d)))
                .unwrap_or_default();
            info!("Operation {} {:?}{took}", describe(op), op.state);
            if let Some(error) = &op.error {
                warn!("Operation {} error: {error}", describe(op));
            }
            return;
        }

        if self.started.elapsed() < REPORT_THRESHOLD {
            return;
        }
        let due = self
            .last_progress
            .get(&op.id)
            .map(|at| at.elapsed() >= MIN_PROGRESS_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_progress.insert(op.id.clone(), Instant::now());
        match op.progress {
            Some(p) => info!(
                "Operation {} {:?}, progress {:.0}%",
                describe(op),
                op.state,
                p * 100.0
            ),
            None => info!("Operation {} {:?}", describe(op), op.state),
        }
    }
}

fn describe(op: &Operation) -> &str {
    op.description
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or(&op.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationState;

    fn op(id: &str, state: OperationState) -> Operation {
        Operation {
            id: id.to_string(),
            state,
            ..Operation::default()
        }
    }

    #[test]
    fn completion_is_reported_once() {
        let mut handler = WaitHandler::new();
        let done = op("a", OperationState::Succeeded);
        handler.report(std::slice::from_ref(&done));
        assert!(handler.completed.contains("a"));
        handler.report(std::slice::from_ref(&done));
        assert_eq!(handler.completed.len(), 1);
    }

    #[test]
    fn children_are_tracked_individually() {
        let mut handler = WaitHandler::new();
        let mut group = op("group", OperationState::Running);
        group.children_detail = Some(vec![
            op("c1", OperationState::Succeeded),
            op("c2", OperationState::Running),
        ]);
        handler.report(std::slice::from_ref(&group));
        assert!(handler.completed.contains("c1"));
        assert!(!handler.completed.contains("c2"));
        assert!(!handler.completed.contains("group"));
    }

    #[test]
    fn description_preferred_over_id() {
        let mut named = op("op-1", OperationState::Running);
        named.description = Some("copy things".to_string());
        assert_eq!(describe(&named), "copy things");
        named.description = Some(String::new());
        assert_eq!(describe(&named), "op-1");
    }
}
