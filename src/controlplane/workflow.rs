//! Workflow phase tracking
//!
//! Every multi-step driver operation moves through an explicit phase
//! machine. Transitions are logged, and the final phase feeds the driver
//! metrics.

use crate::controlplane::metrics::{
    DriverMetrics, OUTCOME_ERROR, OUTCOME_IN_PROGRESS, OUTCOME_SUCCESS,
};
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Phases of a provisioning workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Checking inputs and the existing backend state
    Validating,
    /// Trying capacity pool candidates
    Placing,
    /// A mutating request was accepted by the service
    Submitted,
    /// Waiting for the service to reach a terminal state
    Polling,
    /// Removing what a failed create left behind
    Cleaning,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }

    /// Whether `next` may follow this phase
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Done, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Validating, Placing | Submitted | Polling | Done) => true,
            (Placing, Submitted) => true,
            (Submitted, Polling | Done) => true,
            (Polling, Cleaning | Done) => true,
            (Cleaning, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One run of a driver operation against one subject
#[derive(Debug)]
pub struct Workflow {
    operation: &'static str,
    subject: String,
    phase: Phase,
    history: Vec<Phase>,
    started: Instant,
}

impl Workflow {
    pub fn start(operation: &'static str, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        debug!(operation, subject = %subject, ">>>> {}", operation);
        Self {
            operation,
            subject,
            phase: Phase::Validating,
            history: vec![Phase::Validating],
            started: Instant::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Move to `next`. Unexpected transitions are logged and applied anyway.
    pub fn enter(&mut self, next: Phase) {
        if next == self.phase {
            return;
        }
        if !self.phase.can_transition_to(next) {
            warn!(
                operation = self.operation,
                subject = %self.subject,
                "Unexpected workflow transition {} -> {}",
                self.phase,
                next
            );
        } else {
            debug!(
                operation = self.operation,
                subject = %self.subject,
                "Workflow {} -> {}",
                self.phase,
                next
            );
        }
        self.phase = next;
        self.history.push(next);
    }

    /// Close the workflow with `result`, recording the outcome
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        let outcome = match &result {
            Ok(_) => {
                self.enter(Phase::Done);
                OUTCOME_SUCCESS
            }
            Err(e) if e.is_volume_creating() => {
                self.enter(Phase::Failed);
                OUTCOME_IN_PROGRESS
            }
            Err(_) => {
                self.enter(Phase::Failed);
                OUTCOME_ERROR
            }
        };

        let elapsed = self.started.elapsed();
        DriverMetrics::global().record(self.operation, outcome, elapsed);
        debug!(
            operation = self.operation,
            subject = %self.subject,
            outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "<<<< {}",
            self.operation
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_transitions() {
        assert!(Phase::Validating.can_transition_to(Phase::Placing));
        assert!(Phase::Placing.can_transition_to(Phase::Submitted));
        assert!(Phase::Polling.can_transition_to(Phase::Cleaning));
        assert!(Phase::Cleaning.can_transition_to(Phase::Failed));
        assert!(!Phase::Placing.can_transition_to(Phase::Done));
        assert!(!Phase::Done.can_transition_to(Phase::Failed));
        assert!(Phase::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_finish_records_outcome() {
        let metrics = DriverMetrics::global();
        let before = metrics.operation_count("workflow_test", OUTCOME_IN_PROGRESS);

        let mut workflow = Workflow::start("workflow_test", "vol-1");
        workflow.enter(Phase::Placing);
        workflow.enter(Phase::Submitted);
        workflow.enter(Phase::Polling);
        let result: Result<()> = workflow.finish(Err(Error::VolumeCreating {
            name: "vol-1".into(),
            message: "still Creating".into(),
        }));

        assert!(result.is_err());
        assert_eq!(
            metrics.operation_count("workflow_test", OUTCOME_IN_PROGRESS),
            before + 1
        );
    }

    #[tokio::test]
    async fn test_history() {
        let mut workflow = Workflow::start("history_test", "vol-2");
        workflow.enter(Phase::Submitted);
        workflow.enter(Phase::Polling);
        workflow.enter(Phase::Polling);
        assert_eq!(
            workflow.history(),
            &[Phase::Validating, Phase::Submitted, Phase::Polling]
        );
        assert!(workflow.finish(Ok(())).is_ok());
    }
}
