//! Shipwright - ship task plans through a remote execution agent
//!
//! CLI entry point for importing plans and driving ship runs.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use sessionstore::{
    JobRegistry, JobStatus, PLAN_FILE, Session, SessionStatus, TaskStatus, load_plan, load_session,
    save_plan, save_session, update_task_status,
};
use shipwright::api::HttpAgentClient;
use shipwright::cli::{Cli, Command, JobsAction, OutputFormat, get_log_path};
use shipwright::config::Config;
use shipwright::retry::RetryingExecutor;
use shipwright::ship::{ConsoleObserver, ShipEngine, ShipMode, ShipOptions, ShipOutcome};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Write to the log file, not stdout/stderr; the CLI owns the terminal
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!(
        "Shipwright loaded config: api={}, mode={}",
        config.api.base_url, config.ship.mode
    );

    match cli.command {
        Command::Plan {
            file,
            repo,
            branch,
            title,
        } => cmd_plan(&config, &file, &repo, &branch, title).await,
        Command::Ship {
            per_task,
            auto,
            step,
            background,
        } => cmd_ship(&config, per_task, auto, step, background, cli.verbose).await,
        Command::Attach { job_id } => cmd_attach(&config, job_id, cli.verbose).await,
        Command::Status { format } => cmd_status(&config, format).await,
        Command::Retry { task_id } => cmd_retry(&config, &task_id).await,
        Command::Skip { task_id } => cmd_skip(&config, &task_id).await,
        Command::Jobs { action } => cmd_jobs(&config, action).await,
        Command::Logs { lines, follow } => cmd_logs(follow, lines).await,
    }
}

/// Import a plan file and create the session
async fn cmd_plan(
    config: &Config,
    file: &Path,
    repo: &str,
    branch: &str,
    title: Option<String>,
) -> Result<()> {
    let mut plan = load_plan(file)?.ok_or_else(|| eyre::eyre!("Plan file not found: {}", file.display()))?;

    if title.is_some() {
        plan.title = title;
    }

    plan.validate_dependencies()?;

    let dir = config.session_dir();
    if let Some(existing) = load_session(&dir)? {
        if existing.status == SessionStatus::Shipping {
            return Err(eyre::eyre!(
                "Session {} is currently shipping. Pause it before importing a new plan.",
                existing.id
            ));
        }
        println!("Replacing session {} [{}]", existing.id.dimmed(), existing.status);
    }

    let mut session = Session::new(repo, branch);
    session.begin_planning()?;
    session.attach_plan(plan.clone())?;
    save_session(&session, &dir)?;
    save_plan(&plan, &dir.join(PLAN_FILE))?;

    println!(
        "{} Imported {} task(s) into session {}",
        "✓".green(),
        session.tasks.len(),
        session.id.cyan()
    );
    if let Some(title) = &plan.title {
        println!("  Plan: {}", title);
    }
    println!("  Repo: {} (branch {})", session.repo, session.branch);
    println!("  Run {} to start shipping.", "sw ship".cyan());
    Ok(())
}

/// Ship the session's plan through the execution agent
async fn cmd_ship(
    config: &Config,
    per_task: bool,
    auto: bool,
    step: bool,
    background: bool,
    verbose: bool,
) -> Result<()> {
    config.validate()?;

    let mode = if per_task { ShipMode::PerTask } else { config.ship_mode() };
    let options = ShipOptions {
        mode,
        auto: auto || config.ship.auto,
        step,
        background,
    };

    let mut observer = ConsoleObserver::new();
    if step {
        observer = observer.with_step_prompt();
    }
    if verbose {
        observer = observer.with_verbose();
    }

    let engine = build_engine(config)?
        .with_options(options)
        .with_observer(Arc::new(observer));

    let mut shutdown = spawn_ctrl_c_forwarder();
    let outcome = engine.run(&mut shutdown).await?;
    finish(&outcome)
}

/// Reattach to a background job's event stream
async fn cmd_attach(config: &Config, job_id: Option<String>, verbose: bool) -> Result<()> {
    config.validate()?;

    let mut observer = ConsoleObserver::new();
    if verbose {
        observer = observer.with_verbose();
    }

    let engine = build_engine(config)?.with_observer(Arc::new(observer));

    let mut shutdown = spawn_ctrl_c_forwarder();
    let outcome = engine.attach(job_id, &mut shutdown).await?;
    finish(&outcome)
}

/// Show session status and task table
async fn cmd_status(config: &Config, format: OutputFormat) -> Result<()> {
    let dir = config.session_dir();
    let Some(session) = load_session(&dir)? else {
        println!(
            "No session in {}. Import a plan with: sw plan <file> --repo <org/repo>",
            dir.display()
        );
        return Ok(());
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        OutputFormat::Text => {
            let progress = session.progress();
            println!(
                "{} {} [{}]",
                session.id.cyan(),
                session.repo,
                session_status_colored(session.status)
            );
            println!("  Branch: {}", session.branch);
            println!(
                "  Progress: {}/{} tasks completed ({}%)",
                progress.completed, progress.total, progress.percent
            );
            if progress.failed > 0 {
                println!("  Failed: {}", progress.failed.to_string().red());
            }
            if let Some(job_id) = &session.execution.job_id {
                println!("  Job: {}", job_id);
            }
            if let Some(pr_url) = &session.execution.pr_url {
                println!("  PR: {}", pr_url.cyan());
            }
            println!();
            for task in &session.tasks {
                println!("  {} {} {}", status_glyph(task.status), task.id.dimmed(), task.title);
                if !task.depends_on.is_empty() {
                    println!("      depends on: {}", task.depends_on.join(", ").dimmed());
                }
                if let Some(error) = &task.error {
                    println!("      {}", error.red());
                }
            }
        }
    }
    Ok(())
}

/// Reset a failed task to pending
async fn cmd_retry(config: &Config, task_id: &str) -> Result<()> {
    let dir = config.session_dir();
    let mut session =
        load_session(&dir)?.ok_or_else(|| eyre::eyre!("No session in {}", dir.display()))?;

    let task = session
        .task_mut(task_id)
        .ok_or_else(|| eyre::eyre!("Unknown task: {}", task_id))?;
    task.retry()?;
    save_session(&session, &dir)?;
    sync_plan(&dir, task_id, TaskStatus::Pending);

    println!("{} Task {} reset to pending", "✓".green(), task_id);
    if session.status == SessionStatus::Error {
        println!(
            "  Session is in error state. Re-import the plan to ship again: sw plan {} --repo {}",
            dir.join(PLAN_FILE).display(),
            session.repo
        );
    }
    Ok(())
}

/// Skip a pending task
async fn cmd_skip(config: &Config, task_id: &str) -> Result<()> {
    let dir = config.session_dir();
    let mut session =
        load_session(&dir)?.ok_or_else(|| eyre::eyre!("No session in {}", dir.display()))?;

    let task = session
        .task_mut(task_id)
        .ok_or_else(|| eyre::eyre!("Unknown task: {}", task_id))?;
    task.skip()?;
    save_session(&session, &dir)?;
    sync_plan(&dir, task_id, TaskStatus::Skipped);

    println!("{} Task {} skipped", "✓".green(), task_id);
    Ok(())
}

/// Background job ledger operations
async fn cmd_jobs(config: &Config, action: JobsAction) -> Result<()> {
    let registry = JobRegistry::new(config.registry_path());
    match action {
        JobsAction::List => {
            let jobs = registry.list()?;
            if jobs.is_empty() {
                println!("No background jobs");
                return Ok(());
            }
            for job in jobs {
                let status = match job.status {
                    JobStatus::Running => job.status.to_string().blue(),
                    JobStatus::Completed => job.status.to_string().green(),
                    JobStatus::Failed => job.status.to_string().red(),
                };
                let started = chrono::DateTime::from_timestamp_millis(job.started_at)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{} {} [{}] started {}",
                    job.job_id.cyan(),
                    job.session_id.dimmed(),
                    status,
                    started
                );
            }
        }
        JobsAction::Prune { days } => {
            let max_age_ms = days
                .map(|d| d * 24 * 60 * 60 * 1000)
                .unwrap_or_else(|| config.retention_ms());
            let removed = registry.prune(max_age_ms)?;
            println!("{} Pruned {} job(s)", "✓".green(), removed);
        }
    }
    Ok(())
}

/// Show logs
async fn cmd_logs(follow: bool, lines: usize) -> Result<()> {
    let log_path = get_log_path();

    if !log_path.exists() {
        println!("No log file found at: {}", log_path.display());
        println!("No ship run has been logged yet.");
        return Ok(());
    }

    if follow {
        println!("Following log file: {} (Ctrl+C to stop)", log_path.display());
        println!();

        // Use tail -f for following
        let mut child = std::process::Command::new("tail")
            .args(["-f", "-n", &lines.to_string()])
            .arg(&log_path)
            .spawn()
            .context("Failed to run tail -f")?;

        child.wait()?;
    } else {
        // Read last N lines
        let file = fs::File::open(&log_path).context("Failed to open log file")?;
        let reader = BufReader::new(file);
        let all_lines: Vec<String> = reader.lines().map_while(Result::ok).collect();

        let start = if all_lines.len() > lines { all_lines.len() - lines } else { 0 };

        for line in &all_lines[start..] {
            println!("{}", line);
        }
    }

    Ok(())
}

/// Wire client, executor, and registry into an engine
fn build_engine(config: &Config) -> Result<ShipEngine> {
    let token = config.token()?;
    let client = HttpAgentClient::new(&config.api.base_url, token, config.timeout())
        .context("Failed to create API client")?;
    let executor = RetryingExecutor::new(config.limiter_config(), config.retry_config());
    let registry = JobRegistry::new(config.registry_path());

    Ok(ShipEngine::new(
        Arc::new(client),
        executor,
        registry,
        config.session_dir(),
    ))
}

/// Forward the first Ctrl+C into a shutdown channel
fn spawn_ctrl_c_forwarder() -> tokio::sync::mpsc::Receiver<()> {
    let (tx, rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(()).await;
        }
    });
    rx
}

/// Print the outcome and exit nonzero where the run did not land
fn finish(outcome: &ShipOutcome) -> Result<()> {
    let code = report_outcome(outcome);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn report_outcome(outcome: &ShipOutcome) -> i32 {
    match outcome {
        ShipOutcome::Completed { pr_url } => {
            println!("\n{} All tasks completed", "✓".green().bold());
            if let Some(url) = pr_url {
                println!("  PR: {}", url.cyan());
            }
            0
        }
        ShipOutcome::Detached { job_id } => {
            println!("Job {} submitted. Reattach with: sw attach {}", job_id.cyan(), job_id);
            0
        }
        ShipOutcome::Paused { next_task } => {
            println!("\nSession paused.");
            if let Some(id) = next_task {
                println!("  Next task: {}. Resume with: sw ship", id);
            }
            0
        }
        ShipOutcome::Blocked { remaining, cycle } => {
            println!("\n{} Plan blocked: {} task(s) cannot run", "✗".red(), remaining);
            if let Some(cycle) = cycle {
                println!("  Dependency cycle: {}", cycle.join(" -> "));
            } else {
                println!("  Retry or skip failed tasks to unblock.");
            }
            2
        }
        ShipOutcome::TaskFailed { task_id, error } => {
            println!("\n{} Task {} failed: {}", "✗".red(), task_id, error);
            println!("  Retry with: sw retry {}", task_id);
            1
        }
        ShipOutcome::Failed { message } => {
            println!("\n{} Ship failed: {}", "✗".red(), message);
            1
        }
        ShipOutcome::ConnectionLost { message } => {
            println!("\n{} Connection lost: {}", "⚠".yellow(), message);
            println!("  The remote job may still be running. Reattach with: sw attach");
            1
        }
        ShipOutcome::Cancelled => {
            println!(
                "\n{} Cancelled. The remote job may still be running; reattach with: sw attach",
                "⚠".yellow()
            );
            130
        }
    }
}

/// Update the plan file to match a task transition, best effort
fn sync_plan(dir: &Path, task_id: &str, status: TaskStatus) {
    match update_task_status(&dir.join(PLAN_FILE), task_id, status) {
        Ok(true) => {}
        Ok(false) => tracing::debug!("Plan file has no task {}", task_id),
        Err(e) => tracing::warn!("Failed to update plan file: {}", e),
    }
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

fn session_status_colored(status: SessionStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        SessionStatus::Shipping => text.blue(),
        SessionStatus::Paused => text.yellow(),
        SessionStatus::Completed => text.green(),
        SessionStatus::Error => text.red(),
        _ => text.normal(),
    }
}
