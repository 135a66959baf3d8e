//! Completion detection for whole-plan agent streams
//!
//! In single-session mode one remote job works through every task, so the
//! engine has to infer per-task completion from the event stream. Three
//! matchers run in a fixed order against each agent event and the set of
//! still-pending task ids. They only ever move a task forward; a matched id
//! leaves the pending set, which makes seeing the same signal twice a no-op.

use std::collections::BTreeSet;

use crate::api::{AgentEventKind, JobEvent};

/// Wording that marks a todo entry as finished
const COMPLETION_INDICATORS: [&str; 4] = ["completed", "done", "[x]", "\u{2713}"];

/// Ids named by an explicit `TASK_COMPLETE: <id>` marker line
pub fn marker_completions(event: &JobEvent, pending: &BTreeSet<String>) -> Vec<String> {
    use std::sync::LazyLock;
    static MARKER_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"TASK_COMPLETE:\s*([A-Za-z0-9][A-Za-z0-9._-]*)").unwrap()
    });

    let JobEvent::Agent { display, .. } = event else {
        return Vec::new();
    };
    let Some(text) = display.as_deref() else {
        return Vec::new();
    };

    let mut matched = Vec::new();
    for caps in MARKER_RE.captures_iter(text) {
        let id = &caps[1];
        if pending.contains(id) && !matched.iter().any(|m| m == id) {
            matched.push(id.to_string());
        }
    }
    matched
}

/// Pending ids referenced by a commit-shaped tool event
///
/// The agent is told to commit once per task with the task id in the commit
/// message, so a `git commit` invocation naming a pending id is treated as
/// that task finishing.
pub fn commit_completions(event: &JobEvent, pending: &BTreeSet<String>) -> Vec<String> {
    let JobEvent::Agent { kind, tool, display } = event else {
        return Vec::new();
    };
    if !matches!(kind, AgentEventKind::ToolCall | AgentEventKind::ToolResult) {
        return Vec::new();
    }
    let text = display.as_deref().unwrap_or("");
    let tool_name = tool.as_deref().unwrap_or("");

    let commit_shaped =
        text.to_lowercase().contains("git commit") || tool_name.to_lowercase().contains("commit");
    if !commit_shaped {
        return Vec::new();
    }

    pending
        .iter()
        .filter(|id| text.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Pending ids checked off in a todo-list tool update
///
/// Matches line by line so an id on one line does not borrow the completion
/// wording of another.
pub fn todo_completions(event: &JobEvent, pending: &BTreeSet<String>) -> Vec<String> {
    let JobEvent::Agent { tool, display, .. } = event else {
        return Vec::new();
    };
    let tool_name = tool.as_deref().unwrap_or("");
    if !tool_name.to_lowercase().contains("todo") {
        return Vec::new();
    }
    let Some(text) = display.as_deref() else {
        return Vec::new();
    };

    let mut matched = Vec::new();
    for line in text.lines() {
        let lower = line.to_lowercase();
        if !COMPLETION_INDICATORS.iter().any(|ind| lower.contains(ind)) {
            continue;
        }
        for id in pending {
            if line.contains(id.as_str()) && !matched.contains(id) {
                matched.push(id.clone());
            }
        }
    }
    matched
}

/// Run all matchers in order and return the distinct ids they confirm
pub fn match_completions(event: &JobEvent, pending: &BTreeSet<String>) -> Vec<String> {
    let mut matched: Vec<String> = Vec::new();
    for id in marker_completions(event, pending)
        .into_iter()
        .chain(commit_completions(event, pending))
        .chain(todo_completions(event, pending))
    {
        if !matched.contains(&id) {
            matched.push(id);
        }
    }
    matched
}
