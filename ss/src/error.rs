//! State machine errors
//!
//! Every illegal transition is a typed error so callers can surface exactly
//! which move was rejected.

use thiserror::Error;

use crate::session::SessionStatus;
use crate::task::TaskStatus;

/// Errors from task and session state transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTaskTransition { from: TaskStatus, to: TaskStatus },

    #[error("Invalid session transition: {from} -> {to}")]
    InvalidSessionTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Cannot complete session: {remaining} task(s) not yet completed or skipped")]
    TasksIncomplete { remaining: usize },

    #[error("No plan attached to session")]
    NoPlan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StateError::InvalidTaskTransition {
            from: TaskStatus::Pending,
            to: TaskStatus::Completed,
        };
        assert_eq!(err.to_string(), "Invalid task transition: pending -> completed");

        let err = StateError::TasksIncomplete { remaining: 2 };
        assert!(err.to_string().contains("2 task(s)"));
    }
}
