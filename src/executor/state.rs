use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::events::EventStatus;

/// Pipeline states of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Transferring,
    AwaitingRemote,
    Finalizing,
    Completed,
    Failed,
}

impl JobState {
    fn rank(&self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Processing => 1,
            JobState::Transferring => 2,
            JobState::AwaitingRemote => 3,
            JobState::Finalizing => 4,
            JobState::Completed | JobState::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Status reported to the client when this state is entered
    pub fn event_status(&self) -> EventStatus {
        match self {
            JobState::Queued => EventStatus::Queued,
            JobState::Completed => EventStatus::Completed,
            JobState::Failed => EventStatus::Error,
            _ => EventStatus::Processing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Transferring => "transferring",
            JobState::AwaitingRemote => "awaiting_remote",
            JobState::Finalizing => "finalizing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// Forward-only lifecycle of one job
///
/// `Failed` may be entered from any non-terminal state; every other move
/// must go to a later state. Once terminal, nothing else is accepted.
#[derive(Debug)]
pub struct Lifecycle {
    current: JobState,
    visited: Vec<JobState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            current: JobState::Queued,
            visited: vec![JobState::Queued],
        }
    }

    pub fn current(&self) -> JobState {
        self.current
    }

    pub fn visited(&self) -> &[JobState] {
        &self.visited
    }

    pub fn advance(&mut self, next: JobState) -> Result<JobState, TransitionError> {
        let allowed = !self.current.is_terminal()
            && (next == JobState::Failed || next.rank() > self.current.rank());

        if !allowed {
            return Err(TransitionError {
                from: self.current,
                to: next,
            });
        }

        self.current = next;
        self.visited.push(next);
        Ok(next)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        for state in [
            JobState::Processing,
            JobState::Transferring,
            JobState::AwaitingRemote,
            JobState::Finalizing,
            JobState::Completed,
        ] {
            lifecycle.advance(state).unwrap();
        }
        assert_eq!(lifecycle.visited().len(), 6);
        assert!(lifecycle.current().is_terminal());
    }

    #[test]
    fn test_no_state_revisited() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(JobState::Processing).unwrap();
        lifecycle.advance(JobState::Transferring).unwrap();

        assert_eq!(
            lifecycle.advance(JobState::Processing),
            Err(TransitionError {
                from: JobState::Transferring,
                to: JobState::Processing,
            })
        );
        assert!(lifecycle.advance(JobState::Transferring).is_err());
    }

    #[test]
    fn test_failed_from_any_live_state() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(JobState::Processing).unwrap();
        lifecycle.advance(JobState::Failed).unwrap();

        // terminal: no further events for this job
        assert!(lifecycle.advance(JobState::Failed).is_err());
        assert!(lifecycle.advance(JobState::Completed).is_err());
    }

    #[test]
    fn test_skipping_forward_is_allowed() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(JobState::Finalizing).unwrap();
        assert!(lifecycle.advance(JobState::AwaitingRemote).is_err());
    }
}
