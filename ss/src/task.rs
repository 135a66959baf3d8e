//! Task domain type
//!
//! A Task is one unit of work inside a plan. Status moves through a guarded
//! state machine; the only exit from `failed` is an explicit retry.

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::id::generate_id;
use crate::now_ms;
use crate::priority::Priority;

/// Task status in the plan lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet started
    #[default]
    Pending,
    /// Currently being executed remotely
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error; waits for an explicit retry
    Failed,
    /// Administratively excluded from the plan
    Skipped,
}

impl TaskStatus {
    /// Check if this status is terminal (no automatic transition out)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One unit of work inside a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (e.g., "019430-task-add-login-route")
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// What the remote agent should do
    #[serde(default)]
    pub description: String,

    /// Ordering hint for plan authors; scheduling stays plan-order
    #[serde(default)]
    pub priority: Priority,

    /// IDs of tasks that must be completed first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Current status
    #[serde(default)]
    pub status: TaskStatus,

    /// Conditions the result must satisfy
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    /// Failure message from the last attempt, if any
    #[serde(default)]
    pub error: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    #[serde(default = "now_ms")]
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    #[serde(default = "now_ms")]
    pub updated_at: i64,

    /// Terminal timestamp, set on completed/failed
    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl Task {
    /// Create a new pending Task with a generated ID
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let title = title.into();
        let now = now_ms();
        Self {
            id: generate_id("task", &title),
            title,
            description: description.into(),
            priority: Priority::Normal,
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            acceptance_criteria: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Create a Task with a specific ID (plan import, tests)
    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: Priority::Normal,
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            acceptance_criteria: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Add a dependency (builder style)
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.depends_on.push(task_id.into());
        self
    }

    /// Set the status directly, stamping updated_at (builder style)
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self.updated_at = now_ms();
        self
    }

    /// pending -> running
    pub fn start(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Running)
    }

    /// running -> completed
    pub fn complete(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// running -> failed, recording the failure message
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), StateError> {
        self.transition(TaskStatus::Failed)?;
        self.error = Some(message.into());
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// failed -> pending, the only path out of failed
    pub fn retry(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Pending)?;
        self.error = None;
        self.completed_at = None;
        Ok(())
    }

    /// pending -> skipped (administrative)
    pub fn skip(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Skipped)
    }

    /// Check if this task can run given the set of completed task IDs
    pub fn is_ready(&self, completed_ids: &[&str]) -> bool {
        self.status == TaskStatus::Pending
            && self.depends_on.iter().all(|dep| completed_ids.contains(&dep.as_str()))
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), StateError> {
        let allowed = matches!(
            (self.status, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Pending)
                | (TaskStatus::Pending, TaskStatus::Skipped)
        );
        if !allowed {
            return Err(StateError::InvalidTaskTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now_ms();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("Add login route", "POST /login with session cookie");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.id.contains("-task-add-login-route"));
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = Task::with_id("task-1", "one");
        task.start().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        task.complete().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_fail_records_error() {
        let mut task = Task::with_id("task-1", "one");
        task.start().unwrap();
        task.fail("sandbox died").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("sandbox died"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_retry_is_only_exit_from_failed() {
        let mut task = Task::with_id("task-1", "one");
        task.start().unwrap();
        task.fail("boom").unwrap();

        assert!(task.start().is_err());
        assert!(task.complete().is_err());
        assert!(task.skip().is_err());

        task.retry().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.error.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_illegal_transitions_are_errors() {
        let mut task = Task::with_id("task-1", "one");
        // pending -> completed must go through running
        let err = task.complete().unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTaskTransition {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
            }
        );

        task.start().unwrap();
        task.complete().unwrap();
        // completed is terminal
        assert!(task.start().is_err());
        assert!(task.retry().is_err());
        assert!(task.skip().is_err());
    }

    #[test]
    fn test_skip_only_from_pending() {
        let mut task = Task::with_id("task-1", "one");
        task.skip().unwrap();
        assert_eq!(task.status, TaskStatus::Skipped);

        let mut running = Task::with_id("task-2", "two");
        running.start().unwrap();
        assert!(running.skip().is_err());
    }

    #[test]
    fn test_is_ready_checks_dependencies() {
        let task = Task::with_id("task-3", "three")
            .with_dependency("task-1")
            .with_dependency("task-2");

        assert!(!task.is_ready(&[]));
        assert!(!task.is_ready(&["task-1"]));
        assert!(task.is_ready(&["task-1", "task-2"]));
    }

    #[test]
    fn test_is_ready_false_when_not_pending() {
        let mut task = Task::with_id("task-1", "one");
        task.start().unwrap();
        assert!(!task.is_ready(&[]));
    }

    #[test]
    fn test_deserialize_minimal_plan_entry() {
        // External plan files may carry only id/title/depends_on
        let json = r#"{"id": "task-1", "title": "one", "depends_on": ["task-0"]}"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Normal);
        assert_eq!(task.depends_on, vec!["task-0"]);
        assert!(task.created_at > 0);
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let status: TaskStatus = serde_json::from_str("\"skipped\"").unwrap();
        assert_eq!(status, TaskStatus::Skipped);
    }
}
