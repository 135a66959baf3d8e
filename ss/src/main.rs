use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use sessionstore::cli::{Cli, Command, JobsAction};
use sessionstore::config::Config;
use sessionstore::{JobRegistry, JobStatus, TaskStatus, load_session};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    Ok(())
}

fn status_glyph(status: TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Pending => "·".normal(),
        TaskStatus::Running => "▶".blue(),
        TaskStatus::Completed => "✓".green(),
        TaskStatus::Failed => "✗".red(),
        TaskStatus::Skipped => "-".dimmed(),
    }
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("sessionstore starting");

    match cli.command {
        Command::Show { dir } => {
            let dir = dir.unwrap_or_else(|| config.session_dir.clone());
            match load_session(&dir)? {
                None => println!("No session in {}", dir.display()),
                Some(session) => {
                    let progress = session.progress();
                    println!(
                        "{} {} [{}]",
                        session.id.cyan(),
                        session.repo,
                        session.status.to_string().yellow()
                    );
                    println!(
                        "  {}/{} tasks completed ({}%)",
                        progress.completed, progress.total, progress.percent
                    );
                    if let Some(pr_url) = &session.execution.pr_url {
                        println!("  PR: {}", pr_url.cyan());
                    }
                    for task in &session.tasks {
                        println!("  {} {} {}", status_glyph(task.status), task.id.dimmed(), task.title);
                        if let Some(error) = &task.error {
                            println!("      {}", error.red());
                        }
                    }
                }
            }
        }
        Command::Jobs { action } => {
            let registry = JobRegistry::new(&config.registry_path);
            match action {
                JobsAction::List => {
                    let jobs = registry.list()?;
                    if jobs.is_empty() {
                        println!("No background jobs");
                    } else {
                        for job in jobs {
                            let status = match job.status {
                                JobStatus::Running => job.status.to_string().blue(),
                                JobStatus::Completed => job.status.to_string().green(),
                                JobStatus::Failed => job.status.to_string().red(),
                            };
                            println!("{} {} [{}]", job.job_id.cyan(), job.session_id.dimmed(), status);
                        }
                    }
                }
                JobsAction::Prune { days } => {
                    let max_age_ms = days.unwrap_or(config.retention_days) * 24 * 60 * 60 * 1000;
                    let removed = registry.prune(max_age_ms)?;
                    println!("{} Pruned {} job(s)", "✓".green(), removed);
                }
            }
        }
    }

    Ok(())
}
