//! Submission state machine.
//!
//! `Idle -> Submitting -> (Succeeded | Failed) -> Idle`. The controller only
//! tracks state; [`Form::submit`](crate::Form::submit) drives it around the
//! validation pass and the caller's handlers.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitPhase {
    #[default]
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

/// Snapshot of submission bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionState {
    pub is_submitting: bool,
    pub is_submitted: bool,
    /// Only ever increases within a session
    pub submit_count: u32,
    pub is_submit_successful: bool,
}

/// How a call to `submit` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Validation passed and the valid handler ran
    Valid,
    /// Validation failed and the invalid handler ran
    Invalid,
    /// A submission was already in flight; nothing ran
    Rejected,
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionController {
    phase: SubmitPhase,
    state: SubmissionState,
}

impl SubmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SubmitPhase {
        self.phase
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    /// Enter `Submitting`. Returns false, changing nothing, if a submission
    /// is already in flight.
    pub fn begin(&mut self) -> bool {
        if self.phase == SubmitPhase::Submitting {
            warn!("submit rejected: already submitting");
            return false;
        }
        self.phase = SubmitPhase::Submitting;
        self.state.is_submitting = true;
        debug!(submit_count = self.state.submit_count, "submission started");
        true
    }

    /// Record the validation result. Both outcomes count as an attempt.
    pub fn validated(&mut self, valid: bool) {
        self.phase = if valid {
            SubmitPhase::Succeeded
        } else {
            SubmitPhase::Failed
        };
        self.state.submit_count += 1;
        self.state.is_submitted = true;
        self.state.is_submit_successful = valid;
    }

    /// The caller's handler failed after validation passed.
    pub fn handler_failed(&mut self) {
        self.phase = SubmitPhase::Failed;
        self.state.is_submit_successful = false;
    }

    /// Leave the submission and return to `Idle`.
    pub fn finish(&mut self) {
        debug!(
            phase = ?self.phase,
            submit_count = self.state.submit_count,
            "submission finished"
        );
        self.phase = SubmitPhase::Idle;
        self.state.is_submitting = false;
    }

    /// Explicit form reset: flags clear, the count stays.
    pub fn reset(&mut self) {
        self.phase = SubmitPhase::Idle;
        self.state = SubmissionState {
            submit_count: self.state.submit_count,
            ..SubmissionState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_cycle() {
        let mut controller = SubmissionController::new();
        assert!(controller.begin());
        assert!(controller.state().is_submitting);
        assert_eq!(controller.phase(), SubmitPhase::Submitting);

        controller.validated(true);
        assert_eq!(controller.phase(), SubmitPhase::Succeeded);
        controller.finish();

        let state = controller.state();
        assert_eq!(controller.phase(), SubmitPhase::Idle);
        assert!(!state.is_submitting);
        assert!(state.is_submitted);
        assert!(state.is_submit_successful);
        assert_eq!(state.submit_count, 1);
    }

    #[test]
    fn failed_attempts_still_count() {
        let mut controller = SubmissionController::new();
        controller.begin();
        controller.validated(false);
        controller.finish();
        controller.begin();
        controller.validated(false);
        controller.finish();

        assert_eq!(controller.state().submit_count, 2);
        assert!(!controller.state().is_submit_successful);
    }

    #[test]
    fn reentrant_begin_is_rejected() {
        let mut controller = SubmissionController::new();
        assert!(controller.begin());
        assert!(!controller.begin());
        controller.validated(true);
        controller.finish();
        assert_eq!(controller.state().submit_count, 1);
    }

    #[test]
    fn handler_failure_marks_unsuccessful() {
        let mut controller = SubmissionController::new();
        controller.begin();
        controller.validated(true);
        controller.handler_failed();
        controller.finish();
        assert!(!controller.state().is_submit_successful);
        assert_eq!(controller.state().submit_count, 1);
    }

    #[test]
    fn reset_keeps_count() {
        let mut controller = SubmissionController::new();
        controller.begin();
        controller.validated(true);
        controller.finish();
        controller.reset();

        assert_eq!(
            controller.state(),
            SubmissionState {
                submit_count: 1,
                ..SubmissionState::default()
            }
        );
    }
}
