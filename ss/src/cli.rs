//! CLI argument parsing for sessionstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(author, version, about = "Inspect shipwright sessions and background jobs", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the session and its tasks
    Show {
        /// Session directory (default: from config)
        dir: Option<PathBuf>,
    },

    /// Background job ledger operations
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
}

#[derive(Subcommand, Debug)]
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_show() {
        let cli = Cli::parse_from(["ss", "show", "/tmp/work"]);
        match cli.command {
            Command::Show { dir } => assert_eq!(dir.unwrap(), PathBuf::from("/tmp/work")),
            _ => panic!("expected show"),
        }
    }

    #[test]
    fn test_parse_jobs_prune_days() {
        let cli = Cli::parse_from(["ss", "jobs", "prune", "--days", "3"]);
        match cli.command {
            Command::Jobs {
                action: JobsAction::Prune { days },
            } => assert_eq!(days, Some(3)),
            _ => panic!("expected jobs prune"),
        }
    }
}
