//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Shipwright - ship task plans through a remote execution agent
#[derive(Parser)]
#[command(
    name = "sw",
    version,
    about = "Rate-limited orchestrator that ships task plans through a remote execution agent",
    after_help = "Logs are written to: ~/.local/share/shipwright/logs/shipwright.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Import a plan file and create the session
    Plan {
        /// Path to the plan JSON file
        file: PathBuf,

        /// Repository the agent should work in (e.g. org/repo)
        #[arg(long)]
        repo: String,

        /// Branch the agent should work on
        #[arg(long, default_value = "main")]
        branch: String,

        /// Plan title shown in status output
        #[arg(long)]
        title: Option<String>,
    },

    /// Ship the session's plan through the execution agent
    Ship {
        /// One job per task instead of one job for the whole plan
        #[arg(long)]
        per_task: bool,

        /// Keep going past failed tasks
        #[arg(long)]
        auto: bool,

        /// Pause for confirmation between tasks (per-task mode)
        #[arg(long)]
        step: bool,

        /// Submit the job and detach instead of following the stream
        #[arg(long)]
        background: bool,
    },

    /// Reattach to a background job's event stream
    Attach {
        /// Job to attach to (default: latest running job for this session)
        job_id: Option<String>,
    },

    /// Show session status and task table
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Reset a failed task to pending
    Retry {
        /// Task to retry
        task_id: String,
    },

    /// Skip a pending task
    Skip {
        /// Task to skip
        task_id: String,
    },

    /// Background job ledger operations
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Show shipwright logs
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,

        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,
    },
}

/// Job ledger subcommands
#[derive(Subcommand)]
pub enum JobsAction {
    /// List known jobs, newest first
    List,

    /// Drop ledger entries older than the retention window
    Prune {
        /// Override the retention window in days
        #[arg(short, long)]
        days: Option<i64>,
    },
}

/// Path to the shipwright log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shipwright")
        .join("logs")
        .join("shipwright.log")
}

/// Output format for status command
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
