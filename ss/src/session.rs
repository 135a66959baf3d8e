//! Session domain type
//!
//! A Session owns one plan and tracks its execution lifecycle. The session
//! file is the authority between ship steps; the orchestrator re-reads it on
//! every iteration so external edits (pause, retry, skip) are honored.

use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::id::generate_id;
use crate::now_ms;
use crate::plan::Plan;
use crate::task::{Task, TaskStatus};

/// Session status in the ship workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No plan yet
    #[default]
    Idle,
    /// Plan being imported
    Planning,
    /// Plan attached, ready to ship
    PlanReady,
    /// Remote execution in flight
    Shipping,
    /// Interrupted; resumable
    Paused,
    /// Every task completed or skipped
    Completed,
    /// Unrecoverable failure
    Error,
}

impl SessionStatus {
    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Planning => write!(f, "planning"),
            Self::PlanReady => write!(f, "plan_ready"),
            Self::Shipping => write!(f, "shipping"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Execution metadata accumulated while shipping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    /// When shipping first started (Unix milliseconds)
    #[serde(default)]
    pub started_at: Option<i64>,

    /// When the session reached a terminal state (Unix milliseconds)
    #[serde(default)]
    pub completed_at: Option<i64>,

    /// Remote job currently (or last) associated with this session
    #[serde(default)]
    pub job_id: Option<String>,

    /// Commit SHAs reported by the remote side
    #[serde(default)]
    pub commits: Vec<String>,

    /// Pull request URL reported by the remote side
    #[serde(default)]
    pub pr_url: Option<String>,
}

/// Plan progress counts for display and callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub running: usize,
    /// round(100 * completed / total), 0 for an empty plan
    pub percent: u8,
}

/// A Session owns one plan and its execution state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier (e.g., "019430-session-acme-api")
    pub id: String,

    /// Repository the remote agent works on (e.g., "acme/api")
    pub repo: String,

    /// Branch the work lands on
    pub branch: String,

    /// Current status in the workflow
    pub status: SessionStatus,

    /// Tasks in plan order
    #[serde(default)]
    pub tasks: Vec<Task>,

    /// Task currently running (per-task mode)
    #[serde(default)]
    pub current_task_id: Option<String>,

    /// Execution metadata
    #[serde(default)]
    pub execution: ExecutionState,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Session {
    /// Create a new idle Session
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        let repo = repo.into();
        let now = now_ms();
        Self {
            id: generate_id("session", &repo),
            repo,
            branch: branch.into(),
            status: SessionStatus::Idle,
            tasks: Vec::new(),
            current_task_id: None,
            execution: ExecutionState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// idle -> planning
    pub fn begin_planning(&mut self) -> Result<(), StateError> {
        self.transition(SessionStatus::Planning)
    }

    /// planning -> plan_ready, replacing the task list with the plan's
    pub fn attach_plan(&mut self, plan: Plan) -> Result<(), StateError> {
        self.transition(SessionStatus::PlanReady)?;
        self.tasks = plan.tasks;
        Ok(())
    }

    /// plan_ready -> shipping, or paused -> shipping (resume)
    pub fn begin_shipping(&mut self) -> Result<(), StateError> {
        self.transition(SessionStatus::Shipping)?;
        if self.execution.started_at.is_none() {
            self.execution.started_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// shipping -> paused
    pub fn pause(&mut self) -> Result<(), StateError> {
        self.transition(SessionStatus::Paused)?;
        self.current_task_id = None;
        Ok(())
    }

    /// shipping -> completed; every task must be completed or skipped
    pub fn complete(&mut self) -> Result<(), StateError> {
        let remaining = self
            .tasks
            .iter()
            .filter(|t| !matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
            .count();
        if remaining > 0 {
            return Err(StateError::TasksIncomplete { remaining });
        }
        self.transition(SessionStatus::Completed)?;
        self.current_task_id = None;
        self.execution.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// shipping -> error
    pub fn fail(&mut self) -> Result<(), StateError> {
        self.transition(SessionStatus::Error)?;
        self.current_task_id = None;
        self.execution.completed_at = Some(self.updated_at);
        Ok(())
    }

    /// Return a terminal session to idle for a new plan
    pub fn reset(&mut self) -> Result<(), StateError> {
        if !self.status.is_terminal() {
            return Err(StateError::InvalidSessionTransition {
                from: self.status,
                to: SessionStatus::Idle,
            });
        }
        self.status = SessionStatus::Idle;
        self.tasks.clear();
        self.current_task_id = None;
        self.execution = ExecutionState::default();
        self.updated_at = now_ms();
        Ok(())
    }

    /// IDs of all completed tasks
    pub fn completed_ids(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect()
    }

    /// First task in plan order that is pending with all dependencies completed
    ///
    /// Greedy and order-stable. Tasks with unmet or cyclic dependencies are
    /// never returned; callers distinguish "all done" from "blocked" by
    /// inspecting the remaining statuses.
    pub fn next_runnable_task(&self) -> Option<&Task> {
        let completed = self.completed_ids();
        self.tasks.iter().find(|t| t.is_ready(&completed))
    }

    /// Check if every task is completed or administratively skipped
    pub fn all_tasks_done(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
    }

    /// Progress counts over the plan
    pub fn progress(&self) -> PlanProgress {
        let total = self.tasks.len();
        let count = |s: TaskStatus| self.tasks.iter().filter(|t| t.status == s).count();
        let completed = count(TaskStatus::Completed);
        let percent = if total == 0 {
            0
        } else {
            ((completed * 100) as f64 / total as f64).round() as u8
        };
        PlanProgress {
            total,
            completed,
            failed: count(TaskStatus::Failed),
            pending: count(TaskStatus::Pending),
            running: count(TaskStatus::Running),
            percent,
        }
    }

    /// Look up a task by ID
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Look up a task by ID, mutably
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    /// Record a commit SHA reported by the remote side (deduplicated)
    pub fn record_commit(&mut self, sha: impl Into<String>) {
        let sha = sha.into();
        if !self.execution.commits.contains(&sha) {
            self.execution.commits.push(sha);
            self.updated_at = now_ms();
        }
    }

    /// Record the pull request URL reported by the remote side
    pub fn set_pr_url(&mut self, url: impl Into<String>) {
        self.execution.pr_url = Some(url.into());
        self.updated_at = now_ms();
    }

    /// Record the remote job currently serving this session
    pub fn set_job_id(&mut self, job_id: impl Into<String>) {
        self.execution.job_id = Some(job_id.into());
        self.updated_at = now_ms();
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), StateError> {
        let allowed = matches!(
            (self.status, to),
            (SessionStatus::Idle, SessionStatus::Planning)
                | (SessionStatus::Planning, SessionStatus::PlanReady)
                | (SessionStatus::PlanReady, SessionStatus::Shipping)
                | (SessionStatus::Shipping, SessionStatus::Paused)
                | (SessionStatus::Paused, SessionStatus::Shipping)
                | (SessionStatus::Shipping, SessionStatus::Completed)
                | (SessionStatus::Shipping, SessionStatus::Error)
        );
        if !allowed {
            return Err(StateError::InvalidSessionTransition {
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
    use proptest::prelude::*;

    fn ready_session(tasks: Vec<Task>) -> Session {
        let mut session = Session::new("acme/api", "main");
        session.begin_planning().unwrap();
        session
            .attach_plan(Plan {
                title: Some("test plan".into()),
                tasks,
            })
            .unwrap();
        session
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut session = ready_session(vec![Task::with_id("task-1", "one")]);
        assert_eq!(session.status, SessionStatus::PlanReady);

        session.begin_shipping().unwrap();
        assert_eq!(session.status, SessionStatus::Shipping);
        assert!(session.execution.started_at.is_some());

        session.task_mut("task-1").unwrap().start().unwrap();
        session.task_mut("task-1").unwrap().complete().unwrap();
        session.complete().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.execution.completed_at.is_some());
    }

    #[test]
    fn test_pause_and_resume() {
        let mut session = ready_session(vec![Task::with_id("task-1", "one")]);
        session.begin_shipping().unwrap();
        session.pause().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);

        // Resume is paused -> shipping; started_at is not overwritten
        let started = session.execution.started_at;
        session.begin_shipping().unwrap();
        assert_eq!(session.status, SessionStatus::Shipping);
        assert_eq!(session.execution.started_at, started);
    }

    #[test]
    fn test_illegal_transitions_are_errors() {
        let mut session = Session::new("acme/api", "main");
        // idle -> shipping skips planning
        assert!(session.begin_shipping().is_err());
        assert!(session.pause().is_err());
        assert!(session.fail().is_err());

        session.begin_planning().unwrap();
        assert!(session.begin_planning().is_err());

        let err = session.pause().unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidSessionTransition {
                from: SessionStatus::Planning,
                to: SessionStatus::Paused,
            }
        );
    }

    #[test]
    fn test_complete_requires_all_tasks_done() {
        let mut session = ready_session(vec![
            Task::with_id("task-1", "one"),
            Task::with_id("task-2", "two"),
        ]);
        session.begin_shipping().unwrap();

        let err = session.complete().unwrap_err();
        assert_eq!(err, StateError::TasksIncomplete { remaining: 2 });
        // Guard failure must not move the status
        assert_eq!(session.status, SessionStatus::Shipping);

        session.task_mut("task-1").unwrap().start().unwrap();
        session.task_mut("task-1").unwrap().complete().unwrap();
        session.task_mut("task-2").unwrap().skip().unwrap();
        // Skipped counts as administratively done
        session.complete().unwrap();
    }

    #[test]
    fn test_reset_only_from_terminal() {
        let mut session = ready_session(vec![Task::with_id("task-1", "one")]);
        assert!(session.reset().is_err());

        session.begin_shipping().unwrap();
        session.fail().unwrap();
        session.reset().unwrap();
        assert_eq!(session.status, SessionStatus::Idle);
        assert!(session.tasks.is_empty());
        assert!(session.execution.job_id.is_none());
    }

    #[test]
    fn test_next_runnable_respects_plan_order_and_deps() {
        // A completed; B depends on A and C; C pending with no deps.
        // B is earlier in plan order but not ready, so C is next.
        let mut a = Task::with_id("task-a", "a");
        a.start().unwrap();
        a.complete().unwrap();
        let b = Task::with_id("task-b", "b")
            .with_dependency("task-a")
            .with_dependency("task-c");
        let c = Task::with_id("task-c", "c");

        let session = ready_session(vec![a, b, c]);
        let next = session.next_runnable_task().unwrap();
        assert_eq!(next.id, "task-c");
    }

    #[test]
    fn test_next_runnable_none_when_blocked() {
        // Mutual dependency: neither can ever run
        let a = Task::with_id("task-a", "a").with_dependency("task-b");
        let b = Task::with_id("task-b", "b").with_dependency("task-a");
        let session = ready_session(vec![a, b]);
        assert!(session.next_runnable_task().is_none());
        assert!(!session.all_tasks_done());
    }

    #[test]
    fn test_progress_counts() {
        let mut one = Task::with_id("task-1", "one");
        one.start().unwrap();
        one.complete().unwrap();
        let mut two = Task::with_id("task-2", "two");
        two.start().unwrap();
        two.complete().unwrap();
        let mut three = Task::with_id("task-3", "three");
        three.start().unwrap();
        three.fail("x").unwrap();
        let four = Task::with_id("task-4", "four");

        let session = ready_session(vec![one, two, three, four]);
        let progress = session.progress();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.running, 0);
        assert_eq!(progress.percent, 50);
    }

    #[test]
    fn test_progress_empty_plan() {
        let session = Session::new("acme/api", "main");
        let progress = session.progress();
        assert_eq!(progress.total, 0);
        assert_eq!(progress.percent, 0);
    }

    #[test]
    fn test_session_serde_roundtrip() {
        let mut session = ready_session(vec![Task::with_id("task-1", "one")]);
        session.begin_shipping().unwrap();
        session.set_job_id("job-123");
        session.record_commit("abc123");
        session.record_commit("abc123");
        session.set_pr_url("https://example.com/pr/1");

        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"shipping\""));
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.execution.commits, vec!["abc123"]);
        assert_eq!(back.execution.pr_url.as_deref(), Some("https://example.com/pr/1"));
    }

    fn status_from_index(i: u8) -> TaskStatus {
        match i % 5 {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Running,
            2 => TaskStatus::Completed,
            3 => TaskStatus::Failed,
            _ => TaskStatus::Skipped,
        }
    }

    proptest! {
        #[test]
        fn prop_progress_counts_are_consistent(statuses in proptest::collection::vec(0u8..5, 0..20)) {
            let tasks: Vec<Task> = statuses
                .iter()
                .enumerate()
                .map(|(i, s)| Task::with_id(format!("task-{}", i), "t").with_status(status_from_index(*s)))
                .collect();
            let mut session = Session::new("acme/api", "main");
            session.tasks = tasks;

            let p = session.progress();
            prop_assert_eq!(p.total, statuses.len());
            prop_assert!(p.completed + p.failed + p.pending + p.running <= p.total);
            prop_assert!(p.percent <= 100);
        }

        #[test]
        fn prop_next_runnable_is_ready(statuses in proptest::collection::vec(0u8..5, 1..16)) {
            // Derived dependency edges always point at earlier tasks
            let tasks: Vec<Task> = statuses
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let mut task = Task::with_id(format!("task-{}", i), "t").with_status(status_from_index(*s));
                    for j in 0..i {
                        if (i * 31 + j) % 3 == 0 {
                            task.depends_on.push(format!("task-{}", j));
                        }
                    }
                    task
                })
                .collect();
            let mut session = Session::new("acme/api", "main");
            session.tasks = tasks;

            let completed = session.completed_ids();
            match session.next_runnable_task() {
                Some(t) => {
                    prop_assert_eq!(t.status, TaskStatus::Pending);
                    prop_assert!(t.depends_on.iter().all(|d| completed.contains(&d.as_str())));
                }
                None => {
                    prop_assert!(session.tasks.iter().all(|t| !t.is_ready(&completed)));
                }
            }
        }
    }
}
