//! Background job registry
//!
//! A cross-session ledger of remote jobs spawned by the orchestrator, kept in
//! a single shared `jobs.json`. Entries exist so a detached job can be
//! reattached later and so stale entries can be aged out. The ledger is
//! advisory: the remote service owns the truth about a job.
//!
//! Mutations take an exclusive fs2 lock on a sibling lock file around the
//! load-modify-save, so concurrent `sw`/`ss` invocations do not clobber each
//! other.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::now_ms;

/// Background job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Spawned and not yet observed to finish
    #[default]
    Running,
    /// Observed to finish successfully
    Completed,
    /// Observed to finish with an error
    Failed,
}

impl JobStatus {
    /// Check if this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One remote job spawned on behalf of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundJob {
    /// Remote job identifier
    pub job_id: String,

    /// Session the job belongs to
    pub session_id: String,

    /// Last observed status
    pub status: JobStatus,

    /// When the job was spawned (Unix milliseconds)
    pub started_at: i64,

    /// When the job was observed to finish (Unix milliseconds)
    #[serde(default)]
    pub completed_at: Option<i64>,
}

/// Default registry location under the platform data dir
pub fn default_registry_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shipwright")
        .join("jobs.json")
}

/// File-backed registry of background jobs
#[derive(Debug, Clone)]
pub struct JobRegistry {
    path: PathBuf,
}

impl JobRegistry {
    /// Open a registry at the given jobs file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open the registry at the platform default location
    pub fn open_default() -> Self {
        Self::new(default_registry_path())
    }

    /// Path of the jobs file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a newly spawned job (upsert on job_id)
    pub fn register(&self, job_id: &str, session_id: &str) -> Result<BackgroundJob> {
        debug!("register: called with job_id={}, session_id={}", job_id, session_id);
        let job = BackgroundJob {
            job_id: job_id.to_string(),
            session_id: session_id.to_string(),
            status: JobStatus::Running,
            started_at: now_ms(),
            completed_at: None,
        };
        self.with_lock(|jobs| {
            jobs.retain(|j| j.job_id != job_id);
            jobs.push(job.clone());
        })?;
        Ok(job)
    }

    /// Update a job's status, stamping completed_at on terminal
    ///
    /// Returns false when the job is unknown (already pruned, or spawned by
    /// another machine).
    pub fn update(&self, job_id: &str, status: JobStatus) -> Result<bool> {
        debug!("update: called with job_id={}, status={}", job_id, status);
        let mut found = false;
        self.with_lock(|jobs| {
            if let Some(job) = jobs.iter_mut().find(|j| j.job_id == job_id) {
                job.status = status;
                if status.is_terminal() {
                    job.completed_at = Some(now_ms());
                }
                found = true;
            }
        })?;
        if !found {
            warn!("update: job not in registry: {}", job_id);
        }
        Ok(found)
    }

    /// All known jobs, newest first
    pub fn list(&self) -> Result<Vec<BackgroundJob>> {
        let mut jobs = self.load()?;
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }

    /// Look up a job by id
    pub fn find(&self, job_id: &str) -> Result<Option<BackgroundJob>> {
        Ok(self.load()?.into_iter().find(|j| j.job_id == job_id))
    }

    /// Most recently spawned job still marked running for a session
    pub fn latest_running_for(&self, session_id: &str) -> Result<Option<BackgroundJob>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|j| j.session_id == session_id && j.status == JobStatus::Running))
    }

    /// Drop entries older than the retention window, returning the count
    pub fn prune(&self, max_age_ms: i64) -> Result<usize> {
        debug!("prune: called with max_age_ms={}", max_age_ms);
        let cutoff = now_ms() - max_age_ms;
        let mut removed = 0;
        self.with_lock(|jobs| {
            let before = jobs.len();
            jobs.retain(|j| j.started_at >= cutoff);
            removed = before - jobs.len();
        })?;
        Ok(removed)
    }

    fn load(&self) -> Result<Vec<BackgroundJob>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("Failed to read job registry: {}", self.path.display()))?;
        let jobs: Vec<BackgroundJob> = serde_json::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse job registry: {}", self.path.display()))?;
        Ok(jobs)
    }

    fn save(&self, jobs: &[BackgroundJob]) -> Result<()> {
        let content = serde_json::to_string_pretty(jobs)?;
        std::fs::write(&self.path, content)
            .wrap_err_with(|| format!("Failed to write job registry: {}", self.path.display()))?;
        Ok(())
    }

    /// Run a mutation under the registry lock
    fn with_lock(&self, mutate: impl FnOnce(&mut Vec<BackgroundJob>)) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create registry directory: {}", parent.display())
            })?;
        }
        let lock_path = self.path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .wrap_err_with(|| format!("Failed to open registry lock: {}", lock_path.display()))?;
        lock_file
            .lock_exclusive()
            .wrap_err("Failed to lock job registry")?;

        let result = (|| {
            let mut jobs = self.load()?;
            mutate(&mut jobs);
            self.save(&jobs)
        })();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("with_lock: failed to unlock registry: {}", e);
        }
        result
    }
}
