use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Received,
    Launched,
    Completed,
    ReconciledSuccess,
    ReconciledFailure,
    ReconciledError,
}

impl JobState {
    pub fn can_transition_to(self, next: Self) -> bool {
        use JobState::{
            Completed, Launched, Received, ReconciledError, ReconciledFailure, ReconciledSuccess,
        };

        matches!(
            (self, next),
            (Received, Launched)
                | (Received, ReconciledError)
                | (Launched, Completed)
                | (Launched, ReconciledFailure)
                | (Launched, ReconciledError)
                | (Completed, ReconciledSuccess)
                | (Completed, ReconciledFailure)
                | (Completed, ReconciledError)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ReconciledSuccess | Self::ReconciledFailure | Self::ReconciledError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Launched => "launched",
            Self::Completed => "completed",
            Self::ReconciledSuccess => "reconciled_success",
            Self::ReconciledFailure => "reconciled_failure",
            Self::ReconciledError => "reconciled_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("job cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// Per-request lifecycle; each request walks it once, front to back.
#[derive(Debug)]
pub struct JobTracker {
    job_id: String,
    state: JobState,
}

impl JobTracker {
    pub fn new() -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            state: JobState::Received,
        }
    }

    pub fn job_id(&self) -> &str {
        self.job_id.as_str()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(
            job_id = %self.job_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "job state transition"
        );
        self.state = next;
        Ok(())
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_to_reconciled_success() {
        let mut tracker = JobTracker::new();
        tracker.advance(JobState::Launched).unwrap();
        tracker.advance(JobState::Completed).unwrap();
        tracker.advance(JobState::ReconciledSuccess).unwrap();
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn launch_failure_goes_straight_to_reconciled_error() {
        let mut tracker = JobTracker::new();
        tracker.advance(JobState::ReconciledError).unwrap();
        assert_eq!(tracker.state(), JobState::ReconciledError);
    }

    #[test]
    fn killed_worker_skips_completed() {
        let mut tracker = JobTracker::new();
        tracker.advance(JobState::Launched).unwrap();
        tracker.advance(JobState::ReconciledFailure).unwrap();
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn terminal_states_do_not_reenter() {
        let mut tracker = JobTracker::new();
        tracker.advance(JobState::Launched).unwrap();
        tracker.advance(JobState::Completed).unwrap();
        tracker.advance(JobState::ReconciledFailure).unwrap();

        let err = tracker
            .advance(JobState::Launched)
            .expect_err("terminal state should not re-enter");
        assert_eq!(
            err,
            InvalidTransition {
                from: JobState::ReconciledFailure,
                to: JobState::Launched,
            }
        );
    }

    #[test]
    fn cannot_reconcile_before_launch() {
        assert!(!JobState::Received.can_transition_to(JobState::Completed));
        assert!(!JobState::Received.can_transition_to(JobState::ReconciledSuccess));
        assert!(!JobState::Received.can_transition_to(JobState::ReconciledFailure));
        assert!(!JobState::Launched.can_transition_to(JobState::ReconciledSuccess));
    }
}
