//! The ship engine: drives a session's plan through remote agent jobs
//!
//! Two modes share the same session/plan persistence and the same rate-limit
//! plumbing. Per-task mode runs one remote job per runnable task and tracks
//! completion from the job's terminal result. Single-session mode hands the
//! whole plan to one job and infers per-task completion from the event stream
//! with the matchers in `heuristics`.
//!
//! The session file on disk is the authority. Per-task mode re-reads it before
//! every task, so edits made while a run is in flight (retry, skip, pause) are
//! honored at the next iteration. Last writer wins on save.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use eyre::Result;
use sessionstore::{
    JOB_RETENTION_MS, JobRegistry, JobStatus, PLAN_FILE, Plan, Session, SessionStatus, Task,
    TaskStatus, load_session, save_session, update_task_status,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{AgentClient, ApiError, ExecuteRequest, JobEvent, JobEventSource};
use crate::retry::RetryingExecutor;

use super::heuristics;
use super::observer::{NullObserver, ShipObserver, StepDecision};
use super::prompt;

/// Limiter key shared by every remote execute call
pub const RATE_LIMIT_KEY: &str = "execute";

/// How tasks map onto remote jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShipMode {
    /// One remote job works the whole plan
    #[default]
    SingleSession,
    /// Each task runs as its own remote job
    PerTask,
}

/// Knobs for a ship run
#[derive(Debug, Clone, Default)]
pub struct ShipOptions {
    pub mode: ShipMode,
    /// Keep going past failed tasks; their dependents end up blocked
    pub auto: bool,
    /// Ask the observer between tasks (per-task mode)
    pub step: bool,
    /// Spawn the job and detach without consuming the stream
    pub background: bool,
}

/// How a ship run ended
///
/// Every way a run can stop is a value here; `Err` from the engine means a
/// store or configuration fault, not a plan outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ShipOutcome {
    /// Every task completed or was skipped
    Completed { pr_url: Option<String> },
    /// Run paused; resumable with another ship call
    Paused { next_task: Option<String> },
    /// No runnable task remains but the plan is not done
    Blocked {
        remaining: usize,
        cycle: Option<Vec<String>>,
    },
    /// A task failed and the run stopped on it
    TaskFailed { task_id: String, error: String },
    /// The run failed outside any single task
    Failed { message: String },
    /// The event stream dropped before a terminal event
    ConnectionLost { message: String },
    /// Shutdown signal observed; the remote job may still be running
    Cancelled,
    /// Background mode: job spawned, stream not consumed
    Detached { job_id: String },
}

/// Terminal state of one per-task job stream
enum TaskRun {
    Completed {
        commit_sha: Option<String>,
        pr_url: Option<String>,
    },
    Failed {
        error: String,
    },
    ConnectionLost {
        message: String,
    },
    Cancelled,
}

/// Orchestrates remote agent jobs for one session directory
pub struct ShipEngine {
    client: Arc<dyn AgentClient>,
    executor: RetryingExecutor,
    registry: JobRegistry,
    session_dir: PathBuf,
    plan_path: PathBuf,
    options: ShipOptions,
    observer: Arc<dyn ShipObserver>,
}

impl ShipEngine {
    pub fn new(
        client: Arc<dyn AgentClient>,
        executor: RetryingExecutor,
        registry: JobRegistry,
        session_dir: impl Into<PathBuf>,
    ) -> Self {
        let session_dir = session_dir.into();
        let plan_path = session_dir.join(PLAN_FILE);
        Self {
            client,
            executor,
            registry,
            session_dir,
            plan_path,
            options: ShipOptions::default(),
            observer: Arc::new(NullObserver),
        }
    }

    pub fn with_options(mut self, options: ShipOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ShipObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Run the plan to an outcome
    ///
    /// A message on `shutdown` cancels the run at the next stream frame. The
    /// remote job is left running and its registry entry stays `running`;
    /// `attach` can pick it back up.
    pub async fn run(&self, shutdown: &mut mpsc::Receiver<()>) -> Result<ShipOutcome> {
        debug!(mode = ?self.options.mode, "ShipEngine::run: called");
        match self.options.mode {
            ShipMode::PerTask => self.run_per_task(shutdown).await,
            ShipMode::SingleSession => self.run_single_session(shutdown).await,
        }
    }

    async fn run_per_task(&self, shutdown: &mut mpsc::Receiver<()>) -> Result<ShipOutcome> {
        debug!("ShipEngine::run_per_task: called");
        {
            let mut session = self.load_session_required()?;
            match session.status {
                SessionStatus::Completed => {
                    return Ok(ShipOutcome::Completed {
                        pr_url: session.execution.pr_url.clone(),
                    });
                }
                SessionStatus::Error => {
                    return Ok(ShipOutcome::Failed {
                        message: "session is in error state; reset it first".to_string(),
                    });
                }
                SessionStatus::Idle | SessionStatus::Planning => {
                    return Err(eyre::eyre!("session has no plan; import one first"));
                }
                _ => {}
            }
            Self::ensure_shipping(&mut session)?;
            self.persist(&session)?;
        }

        loop {
            // Re-read every iteration: external edits win
            let mut session = self.load_session_required()?;
            match session.status {
                SessionStatus::Paused => {
                    let next_task = session.next_runnable_task().map(|t| t.id.clone());
                    return Ok(ShipOutcome::Paused { next_task });
                }
                SessionStatus::Completed => {
                    return Ok(ShipOutcome::Completed {
                        pr_url: session.execution.pr_url.clone(),
                    });
                }
                SessionStatus::Error => {
                    return Ok(ShipOutcome::Failed {
                        message: "session moved to error state".to_string(),
                    });
                }
                _ => {}
            }

            let Some(next_id) = session.next_runnable_task().map(|t| t.id.clone()) else {
                if session.all_tasks_done() {
                    session.complete()?;
                    self.persist(&session)?;
                    return Ok(ShipOutcome::Completed {
                        pr_url: session.execution.pr_url.clone(),
                    });
                }
                return Ok(self.blocked_outcome(&session));
            };

            debug!(task_id = %next_id, "ShipEngine::run_per_task: starting task");
            {
                let task = session
                    .task_mut(&next_id)
                    .ok_or_else(|| eyre::eyre!("task {} vanished from session", next_id))?;
                task.start()?;
            }
            session.current_task_id = Some(next_id.clone());
            self.persist(&session)?;
            self.sync_plan_task(&next_id, TaskStatus::Running);

            let request = {
                let task = session
                    .task(&next_id)
                    .ok_or_else(|| eyre::eyre!("task {} vanished from session", next_id))?;
                self.observer.on_task_start(task).await;
                ExecuteRequest {
                    repo: session.repo.clone(),
                    branch: session.branch.clone(),
                    prompt: prompt::task_prompt(&session, task),
                    session_id: session.id.clone(),
                }
            };

            let response = match self.start_job(request).await {
                Ok(response) => response,
                Err(e) => {
                    let message = execute_error_message(&e);
                    if let Some(task) = session.task_mut(&next_id) {
                        task.fail(message.clone())?;
                    }
                    session.current_task_id = None;
                    session.pause()?;
                    self.persist(&session)?;
                    self.sync_plan_task(&next_id, TaskStatus::Failed);
                    if let Some(task) = session.task(&next_id) {
                        self.observer.on_task_failed(task, &message).await;
                    }
                    return Ok(ShipOutcome::Failed { message });
                }
            };

            self.registry.register(&response.job_id, &session.id)?;
            session.set_job_id(&response.job_id);
            self.persist(&session)?;

            let stream = match self.client.open_stream(&response.stream_url).await {
                Ok(stream) => stream,
                Err(e) => {
                    let message = format!("connection lost: {}", e);
                    if let Some(task) = session.task_mut(&next_id) {
                        task.fail(message.clone())?;
                    }
                    session.current_task_id = None;
                    session.pause()?;
                    self.persist(&session)?;
                    self.sync_plan_task(&next_id, TaskStatus::Failed);
                    return Ok(ShipOutcome::ConnectionLost { message });
                }
            };

            let run = self.consume_task_stream(stream, &response.job_id, shutdown).await;
            match run {
                TaskRun::Completed { commit_sha, pr_url } => {
                    {
                        let task = session
                            .task_mut(&next_id)
                            .ok_or_else(|| eyre::eyre!("task {} vanished from session", next_id))?;
                        task.complete()?;
                    }
                    if let Some(sha) = commit_sha {
                        session.record_commit(sha);
                    }
                    if let Some(url) = pr_url {
                        session.set_pr_url(url);
                    }
                    session.current_task_id = None;
                    self.persist(&session)?;
                    self.sync_plan_task(&next_id, TaskStatus::Completed);
                    self.registry_update(&response.job_id, JobStatus::Completed);
                    if let Some(task) = session.task(&next_id) {
                        self.observer.on_task_complete(task).await;
                    }
                    self.observer.on_progress(&session.progress()).await;

                    if self.options.step {
                        let decision = self.observer.on_step_pause(session.next_runnable_task()).await;
                        if decision == StepDecision::Halt {
                            let next_task = session.next_runnable_task().map(|t| t.id.clone());
                            session.pause()?;
                            self.persist(&session)?;
                            return Ok(ShipOutcome::Paused { next_task });
                        }
                    }
                }
                TaskRun::Failed { error } => {
                    {
                        let task = session
                            .task_mut(&next_id)
                            .ok_or_else(|| eyre::eyre!("task {} vanished from session", next_id))?;
                        task.fail(error.clone())?;
                    }
                    session.current_task_id = None;
                    self.persist(&session)?;
                    self.sync_plan_task(&next_id, TaskStatus::Failed);
                    self.registry_update(&response.job_id, JobStatus::Failed);
                    if let Some(task) = session.task(&next_id) {
                        self.observer.on_task_failed(task, &error).await;
                    }
                    if !self.options.auto {
                        session.pause()?;
                        self.persist(&session)?;
                        return Ok(ShipOutcome::TaskFailed {
                            task_id: next_id,
                            error,
                        });
                    }
                }
                TaskRun::ConnectionLost { message } => {
                    let message = format!("connection lost: {}", message);
                    {
                        let task = session
                            .task_mut(&next_id)
                            .ok_or_else(|| eyre::eyre!("task {} vanished from session", next_id))?;
                        task.fail(message.clone())?;
                    }
                    session.current_task_id = None;
                    self.persist(&session)?;
                    self.sync_plan_task(&next_id, TaskStatus::Failed);
                    // The job may still be alive remotely; registry entry stays running
                    if let Some(task) = session.task(&next_id) {
                        self.observer.on_task_failed(task, &message).await;
                    }
                    if !self.options.auto {
                        session.pause()?;
                        self.persist(&session)?;
                        return Ok(ShipOutcome::ConnectionLost { message });
                    }
                }
                TaskRun::Cancelled => {
                    // Result never observed; fail the task so retry can rerun it
                    {
                        let task = session
                            .task_mut(&next_id)
                            .ok_or_else(|| eyre::eyre!("task {} vanished from session", next_id))?;
                        task.fail("cancelled before the job result was observed")?;
                    }
                    session.pause()?;
                    self.persist(&session)?;
                    self.sync_plan_task(&next_id, TaskStatus::Failed);
                    return Ok(ShipOutcome::Cancelled);
                }
            }
        }
    }

    async fn run_single_session(&self, shutdown: &mut mpsc::Receiver<()>) -> Result<ShipOutcome> {
        debug!("ShipEngine::run_single_session: called");
        let mut session = self.load_session_required()?;

        match session.status {
            SessionStatus::Completed => {
                return Ok(ShipOutcome::Completed {
                    pr_url: session.execution.pr_url.clone(),
                });
            }
            SessionStatus::Error => {
                return Ok(ShipOutcome::Failed {
                    message: "session is in error state; reset it first".to_string(),
                });
            }
            SessionStatus::Idle | SessionStatus::Planning => {
                return Err(eyre::eyre!("session has no plan; import one first"));
            }
            _ => {}
        }

        if session.tasks.is_empty() {
            return Ok(ShipOutcome::Blocked {
                remaining: 0,
                cycle: None,
            });
        }

        let pending_ids: BTreeSet<String> = session
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect();

        if pending_ids.is_empty() {
            if session.all_tasks_done() {
                Self::ensure_shipping(&mut session)?;
                session.complete()?;
                self.persist(&session)?;
                return Ok(ShipOutcome::Completed {
                    pr_url: session.execution.pr_url.clone(),
                });
            }
            return Ok(self.blocked_outcome(&session));
        }

        let request = {
            let pending_tasks: Vec<&Task> = session
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .collect();
            ExecuteRequest {
                repo: session.repo.clone(),
                branch: session.branch.clone(),
                prompt: prompt::plan_prompt(&session, &pending_tasks),
                session_id: session.id.clone(),
            }
        };

        Self::ensure_shipping(&mut session)?;
        self.persist(&session)?;

        let response = match self.start_job(request).await {
            Ok(response) => response,
            Err(e) => {
                let message = execute_error_message(&e);
                session.pause()?;
                self.persist(&session)?;
                return Ok(ShipOutcome::Failed { message });
            }
        };

        self.registry.register(&response.job_id, &session.id)?;
        session.set_job_id(&response.job_id);
        self.persist(&session)?;

        if self.options.background {
            debug!(job_id = %response.job_id, "ShipEngine::run_single_session: detaching");
            return Ok(ShipOutcome::Detached {
                job_id: response.job_id,
            });
        }

        let stream = match self.client.open_stream(&response.stream_url).await {
            Ok(stream) => stream,
            Err(e) => {
                session.pause()?;
                self.persist(&session)?;
                return Ok(ShipOutcome::ConnectionLost {
                    message: e.to_string(),
                });
            }
        };

        self.consume_plan_stream(&mut session, pending_ids, stream, &response.job_id, shutdown)
            .await
    }

    /// Reattach to a job spawned earlier and consume its stream
    ///
    /// Without an explicit id the most recent running registry entry for the
    /// session is used, falling back to the job recorded in the session file.
    pub async fn attach(
        &self,
        job_id: Option<String>,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> Result<ShipOutcome> {
        debug!(?job_id, "ShipEngine::attach: called");
        let mut session = self.load_session_required()?;

        if let Err(e) = self.registry.prune(JOB_RETENTION_MS) {
            warn!(error = %e, "ShipEngine::attach: registry prune failed");
        }

        let job_id = match job_id {
            Some(id) => id,
            None => match self.registry.latest_running_for(&session.id)? {
                Some(job) => job.job_id,
                None => session.execution.job_id.clone().ok_or_else(|| {
                    eyre::eyre!("no running job recorded for session {}", session.id)
                })?,
            },
        };

        match session.status {
            SessionStatus::Shipping => {}
            SessionStatus::PlanReady | SessionStatus::Paused => {
                session.begin_shipping()?;
                self.persist(&session)?;
            }
            status => {
                return Ok(ShipOutcome::Failed {
                    message: format!("session is {}, nothing to attach to", status),
                });
            }
        }

        let stream = match self.client.open_job_stream(&job_id).await {
            Ok(stream) => stream,
            Err(ApiError::Api { status, message }) => {
                session.pause()?;
                self.persist(&session)?;
                return Ok(ShipOutcome::Failed {
                    message: format!("attach to {} failed ({}): {}", job_id, status, message),
                });
            }
            Err(e) => {
                session.pause()?;
                self.persist(&session)?;
                return Ok(ShipOutcome::ConnectionLost {
                    message: e.to_string(),
                });
            }
        };

        let pending_ids: BTreeSet<String> = session
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.id.clone())
            .collect();

        self.consume_plan_stream(&mut session, pending_ids, stream, &job_id, shutdown)
            .await
    }

    /// Consume one per-task job stream to its terminal state
    async fn consume_task_stream(
        &self,
        mut stream: Box<dyn JobEventSource>,
        job_id: &str,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> TaskRun {
        loop {
            let frame = tokio::select! {
                biased;
                Some(_) = shutdown.recv() => {
                    debug!(%job_id, "ShipEngine::consume_task_stream: shutdown");
                    return TaskRun::Cancelled;
                }
                frame = stream.next_event() => frame,
            };

            match frame {
                Some(Ok(event)) => match event {
                    JobEvent::Status { phase, message } => {
                        self.observer.on_status(&phase, message.as_deref()).await;
                    }
                    JobEvent::Agent { kind, display, .. } => {
                        self.observer.on_agent(&kind, display.as_deref()).await;
                    }
                    JobEvent::Result {
                        success,
                        pr_url,
                        commit_sha,
                        ..
                    } => {
                        return if success {
                            TaskRun::Completed { commit_sha, pr_url }
                        } else {
                            TaskRun::Failed {
                                error: "remote job reported failure".to_string(),
                            }
                        };
                    }
                    JobEvent::Error { message } => {
                        return TaskRun::Failed { error: message };
                    }
                },
                Some(Err(ApiError::ConnectionLost(message))) => {
                    return TaskRun::ConnectionLost { message };
                }
                Some(Err(e)) => {
                    return TaskRun::ConnectionLost {
                        message: e.to_string(),
                    };
                }
                None => {
                    return TaskRun::ConnectionLost {
                        message: "stream ended before a terminal event".to_string(),
                    };
                }
            }
        }
    }

    /// Consume a whole-plan stream, marking tasks complete as evidence arrives
    async fn consume_plan_stream(
        &self,
        session: &mut Session,
        mut pending: BTreeSet<String>,
        mut stream: Box<dyn JobEventSource>,
        job_id: &str,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> Result<ShipOutcome> {
        debug!(%job_id, pending = pending.len(), "ShipEngine::consume_plan_stream: called");
        loop {
            let frame = tokio::select! {
                biased;
                Some(_) = shutdown.recv() => {
                    debug!(%job_id, "ShipEngine::consume_plan_stream: shutdown");
                    // Remote job keeps running; registry entry stays running
                    session.pause()?;
                    self.persist(session)?;
                    return Ok(ShipOutcome::Cancelled);
                }
                frame = stream.next_event() => frame,
            };

            let Some(frame) = frame else {
                session.pause()?;
                self.persist(session)?;
                return Ok(ShipOutcome::ConnectionLost {
                    message: "stream ended before a terminal event".to_string(),
                });
            };

            let event = match frame {
                Ok(event) => event,
                Err(ApiError::ConnectionLost(message)) => {
                    session.pause()?;
                    self.persist(session)?;
                    return Ok(ShipOutcome::ConnectionLost { message });
                }
                Err(e) => {
                    session.pause()?;
                    self.persist(session)?;
                    return Ok(ShipOutcome::ConnectionLost {
                        message: e.to_string(),
                    });
                }
            };

            match &event {
                JobEvent::Status { phase, message } => {
                    self.observer.on_status(phase, message.as_deref()).await;
                }
                JobEvent::Agent { kind, display, .. } => {
                    self.observer.on_agent(kind, display.as_deref()).await;
                    for task_id in heuristics::match_completions(&event, &pending) {
                        pending.remove(&task_id);
                        self.mark_plan_task_complete(session, &task_id).await?;
                    }
                }
                JobEvent::Result {
                    success,
                    pr_url,
                    commit_sha,
                    ..
                } => {
                    if *success {
                        // Remote says the plan landed; finish what the
                        // heuristics missed
                        let leftovers: Vec<String> = session
                            .tasks
                            .iter()
                            .filter(|t| {
                                matches!(t.status, TaskStatus::Pending | TaskStatus::Running)
                            })
                            .map(|t| t.id.clone())
                            .collect();
                        for task_id in leftovers {
                            self.mark_plan_task_complete(session, &task_id).await?;
                        }
                        if let Some(sha) = commit_sha.clone() {
                            session.record_commit(sha);
                        }
                        if let Some(url) = pr_url.clone() {
                            session.set_pr_url(url);
                        }
                        self.registry_update(job_id, JobStatus::Completed);

                        if session.all_tasks_done() {
                            session.complete()?;
                            self.persist(session)?;
                            return Ok(ShipOutcome::Completed {
                                pr_url: session.execution.pr_url.clone(),
                            });
                        }
                        // Tasks failed in earlier runs still need a retry
                        let outcome = self.blocked_outcome(session);
                        session.pause()?;
                        self.persist(session)?;
                        return Ok(outcome);
                    }

                    session.fail()?;
                    self.persist(session)?;
                    self.registry_update(job_id, JobStatus::Failed);
                    return Ok(ShipOutcome::Failed {
                        message: "remote job reported failure".to_string(),
                    });
                }
                JobEvent::Error { message } => {
                    session.fail()?;
                    self.persist(session)?;
                    self.registry_update(job_id, JobStatus::Failed);
                    return Ok(ShipOutcome::Failed {
                        message: message.clone(),
                    });
                }
            }
        }
    }

    /// Move a plan task to completed, persisting session and plan file
    ///
    /// Idempotent: tasks already terminal are left alone.
    async fn mark_plan_task_complete(&self, session: &mut Session, task_id: &str) -> Result<()> {
        let Some(task) = session.task_mut(task_id) else {
            return Ok(());
        };
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Running) {
            return Ok(());
        }
        if task.status == TaskStatus::Pending {
            task.start()?;
        }
        task.complete()?;
        debug!(%task_id, "ShipEngine: task confirmed complete");
        self.persist(session)?;
        self.sync_plan_task(task_id, TaskStatus::Completed);
        if let Some(task) = session.task(task_id) {
            self.observer.on_task_complete(task).await;
        }
        self.observer.on_progress(&session.progress()).await;
        Ok(())
    }

    /// Wrap the execute call with the limiter and retry policy
    async fn start_job(
        &self,
        request: ExecuteRequest,
    ) -> Result<crate::api::ExecuteResponse, ApiError> {
        let client = Arc::clone(&self.client);
        self.executor
            .execute(RATE_LIMIT_KEY, move || {
                let client = Arc::clone(&client);
                let request = request.clone();
                async move { client.execute(request).await }
            })
            .await
    }

    fn blocked_outcome(&self, session: &Session) -> ShipOutcome {
        let remaining = session
            .tasks
            .iter()
            .filter(|t| !matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
            .count();
        let plan = Plan {
            title: None,
            tasks: session.tasks.clone(),
        };
        ShipOutcome::Blocked {
            remaining,
            cycle: plan.find_cycle(),
        }
    }

    fn load_session_required(&self) -> Result<Session> {
        load_session(&self.session_dir)?.ok_or_else(|| {
            eyre::eyre!("no session in {}; import a plan first", self.session_dir.display())
        })
    }

    fn persist(&self, session: &Session) -> Result<()> {
        save_session(session, &self.session_dir)
    }

    /// Mirror a task status into the plan file; absence is not fatal
    fn sync_plan_task(&self, task_id: &str, status: TaskStatus) {
        match update_task_status(&self.plan_path, task_id, status) {
            Ok(true) => {}
            Ok(false) => debug!(%task_id, "ShipEngine: task not in plan file"),
            Err(e) => warn!(%task_id, error = %e, "ShipEngine: plan file update failed"),
        }
    }

    fn registry_update(&self, job_id: &str, status: JobStatus) {
        match self.registry.update(job_id, status) {
            Ok(true) => {}
            Ok(false) => debug!(%job_id, "ShipEngine: job missing from registry"),
            Err(e) => warn!(%job_id, error = %e, "ShipEngine: registry update failed"),
        }
    }

    fn ensure_shipping(session: &mut Session) -> Result<()> {
        if session.status != SessionStatus::Shipping {
            session.begin_shipping()?;
        }
        Ok(())
    }
}

fn execute_error_message(error: &ApiError) -> String {
    match error {
        ApiError::RateLimitExceeded { retry_after } | ApiError::RateLimited { retry_after } => {
            format!("rate limited: retry in about {}s", retry_after.as_secs())
        }
        other => format!("execute call failed: {}", other),
    }
}
