//! Progress callbacks for ship runs

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use colored::Colorize;
use sessionstore::{PlanProgress, Task};

use crate::api::AgentEventKind;

/// What to do after a step-mode pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Continue,
    Halt,
}

/// Callbacks fired as a ship run progresses
///
/// Every method has a no-op default, so observers implement only what they
/// care about. The engine awaits these inline; keep them quick.
#[async_trait]
pub trait ShipObserver: Send + Sync {
    async fn on_task_start(&self, _task: &Task) {}
    async fn on_task_complete(&self, _task: &Task) {}
    async fn on_task_failed(&self, _task: &Task, _error: &str) {}
    async fn on_progress(&self, _progress: &PlanProgress) {}
    async fn on_status(&self, _phase: &str, _message: Option<&str>) {}
    async fn on_agent(&self, _kind: &AgentEventKind, _display: Option<&str>) {}

    /// Step mode: called after each task with the next one, if any
    async fn on_step_pause(&self, _next: Option<&Task>) -> StepDecision {
        StepDecision::Continue
    }
}

/// Observer that swallows everything (background runs, tests)
pub struct NullObserver;

#[async_trait]
impl ShipObserver for NullObserver {}

/// Prints run progress to the terminal
pub struct ConsoleObserver {
    /// Wait for Enter between tasks when set
    interactive_step: bool,
    /// Echo agent tool chatter when set
    verbose: bool,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            interactive_step: false,
            verbose: false,
        }
    }

    pub fn with_step_prompt(mut self) -> Self {
        self.interactive_step = true;
        self
    }

    pub fn with_verbose(mut self) -> Self {
        self.verbose = true;
        self
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShipObserver for ConsoleObserver {
    async fn on_task_start(&self, task: &Task) {
        println!("{} {} {}", "▶".blue(), task.id.dimmed(), task.title.bold());
    }

    async fn on_task_complete(&self, task: &Task) {
        println!("{} {} {}", "✓".green(), task.id.dimmed(), task.title);
    }

    async fn on_task_failed(&self, task: &Task, error: &str) {
        println!("{} {} {}", "✗".red(), task.id.dimmed(), task.title);
        println!("  {}", error.red());
    }

    async fn on_progress(&self, progress: &PlanProgress) {
        let line = format!(
            "{}/{} tasks done ({}%)",
            progress.completed, progress.total, progress.percent
        );
        println!("  {}", line.dimmed());
    }

    async fn on_status(&self, phase: &str, message: Option<&str>) {
        match message {
            Some(msg) => println!("  {} {}", phase.cyan(), msg.dimmed()),
            None => println!("  {}", phase.cyan()),
        }
    }

    async fn on_agent(&self, kind: &AgentEventKind, display: Option<&str>) {
        let Some(text) = display else { return };
        match kind {
            AgentEventKind::Message => println!("{}", text),
            _ if self.verbose => println!("  {}", text.dimmed()),
            _ => {}
        }
    }

    async fn on_step_pause(&self, next: Option<&Task>) -> StepDecision {
        if !self.interactive_step {
            return StepDecision::Continue;
        }

        match next {
            Some(task) => print!("next: {}. continue? [Enter/q] ", task.title.bold()),
            None => print!("continue? [Enter/q] "),
        }
        if io::stdout().flush().is_err() {
            return StepDecision::Continue;
        }

        let stdin = io::stdin();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            // EOF means nobody is driving, stop cleanly
            Ok(0) => StepDecision::Halt,
            Ok(_) => match line.trim().to_lowercase().as_str() {
                "q" | "quit" => StepDecision::Halt,
                _ => StepDecision::Continue,
            },
            Err(_) => StepDecision::Halt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_observer_continues_on_step() {
        let observer = NullObserver;
        assert_eq!(observer.on_step_pause(None).await, StepDecision::Continue);
    }

    #[tokio::test]
    async fn test_console_observer_skips_prompt_when_not_interactive() {
        let observer = ConsoleObserver::new();
        assert_eq!(observer.on_step_pause(None).await, StepDecision::Continue);
    }
}
