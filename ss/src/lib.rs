//! SessionStore - session, plan, and background-job state for shipwright
//!
//! Holds the domain types the ship orchestrator runs on (tasks, sessions,
//! background jobs), their state machines, and the file-backed stores that
//! persist them between invocations.
//!
//! # Layout
//!
//! ```text
//! <session dir>/              # usually .shipwright/ inside a repo
//! ├── session.json            # the Session (authoritative between steps)
//! └── plan.json               # external plan representation
//!
//! <data dir>/shipwright/
//! └── jobs.json               # cross-session background job ledger
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sessionstore::{Plan, Session, load_session, save_session};
//!
//! let plan = sessionstore::load_plan(&plan_path)?.ok_or_else(|| eyre!("no plan"))?;
//! let mut session = Session::new("acme/api", "main");
//! session.begin_planning()?;
//! session.attach_plan(plan)?;
//! save_session(&session, &dir)?;
//! ```

pub mod cli;
pub mod config;
mod error;
mod id;
mod job;
mod plan;
mod priority;
mod session;
mod store;
mod task;

pub use error::StateError;
pub use id::generate_id;
pub use job::{BackgroundJob, JobRegistry, JobStatus, default_registry_path};
pub use plan::{Plan, PlanValidationError, load_plan, save_plan, update_task_status};
pub use priority::Priority;
pub use session::{ExecutionState, PlanProgress, Session, SessionStatus};
pub use store::{load_session, save_session, session_file};
pub use task::{Task, TaskStatus};

/// File name of the session record inside a session directory
pub const SESSION_FILE: &str = "session.json";

/// File name of the external plan representation
pub const PLAN_FILE: &str = "plan.json";

/// Default retention window for background job ledger entries (7 days)
pub const JOB_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
