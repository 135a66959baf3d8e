//! External plan representation
//!
//! The plan file (`plan.json`) mirrors the session's task list so external
//! tooling can watch and edit task status without parsing the full session
//! record. Load-modify-save; the session file stays authoritative.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::now_ms;
use crate::task::{Task, TaskStatus};

/// Plan validation failures found at import time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("Duplicate task id: {task_id}")]
    DuplicateTaskId { task_id: String },

    #[error("Task {task_id} depends on unknown task: {dep}")]
    UnknownDependency { task_id: String, dep: String },

    #[error("Dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },
}

/// An ordered set of tasks with dependency edges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Optional human-readable plan title
    #[serde(default)]
    pub title: Option<String>,

    /// Tasks in plan order
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Plan {
    /// Validate task ids and the dependency graph
    ///
    /// Checks for duplicate ids, unknown dependency targets, and cycles
    /// (DFS with an explicit cycle path). The scheduler itself is greedy and
    /// never hangs on a bad graph; validation exists so plan authors hear
    /// about mistakes at import instead of at a blocked ship.
    pub fn validate_dependencies(&self) -> Result<(), PlanValidationError> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id.as_str()) {
                return Err(PlanValidationError::DuplicateTaskId {
                    task_id: task.id.clone(),
                });
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(PlanValidationError::UnknownDependency {
                        task_id: task.id.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        if let Some(path) = self.find_cycle() {
            return Err(PlanValidationError::DependencyCycle { path });
        }
        Ok(())
    }

    /// Find a dependency cycle, if any, as the path that closes it
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let task_map: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut cycle_path = Vec::new();

        for task_id in task_map.keys() {
            if !visited.contains(task_id)
                && has_cycle_dfs(task_id, &task_map, &mut visited, &mut rec_stack, &mut cycle_path)
            {
                return Some(cycle_path);
            }
        }
        None
    }
}

/// DFS helper for cycle detection
fn has_cycle_dfs<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, &'a Task>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    cycle_path: &mut Vec<String>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    cycle_path.push(node.to_string());

    if let Some(task) = graph.get(node) {
        for dep_id in &task.depends_on {
            if !visited.contains(dep_id.as_str()) {
                if graph.contains_key(dep_id.as_str())
                    && has_cycle_dfs(dep_id.as_str(), graph, visited, rec_stack, cycle_path)
                {
                    return true;
                }
            } else if rec_stack.contains(dep_id.as_str()) {
                cycle_path.push(dep_id.clone());
                return true;
            }
        }
    }

    rec_stack.remove(node);
    cycle_path.pop();
    false
}

/// Load the plan file, None when absent
pub fn load_plan(path: &Path) -> Result<Option<Plan>> {
    debug!("load_plan: called with path={}", path.display());
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read plan file: {}", path.display()))?;
    let plan: Plan = serde_json::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse plan file: {}", path.display()))?;
    Ok(Some(plan))
}

/// Save the plan file, creating parent directories
pub fn save_plan(plan: &Plan, path: &Path) -> Result<()> {
    debug!("save_plan: called with path={}, tasks={}", path.display(), plan.tasks.len());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create plan directory: {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(plan)?;
    std::fs::write(path, content)
        .wrap_err_with(|| format!("Failed to write plan file: {}", path.display()))?;
    Ok(())
}

/// Set one task's status in the plan file
///
/// Returns false when the plan file or the task is missing. Load-modify-save;
/// last writer wins.
pub fn update_task_status(path: &Path, task_id: &str, status: TaskStatus) -> Result<bool> {
    debug!("update_task_status: called with task_id={}, status={}", task_id, status);
    let Some(mut plan) = load_plan(path)? else {
        return Ok(false);
    };
    let Some(task) = plan.tasks.iter_mut().find(|t| t.id == task_id) else {
        return Ok(false);
    };
    task.status = status;
    task.updated_at = now_ms();
    if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
        task.completed_at = Some(task.updated_at);
    }
    save_plan(&plan, path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn plan_with(tasks: Vec<Task>) -> Plan {
        Plan {
            title: Some("test".into()),
            tasks,
        }
    }

    #[test]
    fn test_validate_accepts_good_graph() {
        let plan = plan_with(vec![
            Task::with_id("task-1", "one"),
            Task::with_id("task-2", "two").with_dependency("task-1"),
            Task::with_id("task-3", "three").with_dependency("task-1"),
        ]);
        assert!(plan.validate_dependencies().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let plan = plan_with(vec![
            Task::with_id("task-1", "one"),
            Task::with_id("task-1", "again"),
        ]);
        assert_eq!(
            plan.validate_dependencies().unwrap_err(),
            PlanValidationError::DuplicateTaskId {
                task_id: "task-1".into()
            }
        );
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let plan = plan_with(vec![Task::with_id("task-1", "one").with_dependency("task-9")]);
        assert_eq!(
            plan.validate_dependencies().unwrap_err(),
            PlanValidationError::UnknownDependency {
                task_id: "task-1".into(),
                dep: "task-9".into()
            }
        );
    }

    #[test]
    fn test_validate_detects_cycle() {
        let plan = plan_with(vec![
            Task::with_id("task-1", "one").with_dependency("task-3"),
            Task::with_id("task-2", "two").with_dependency("task-1"),
            Task::with_id("task-3", "three").with_dependency("task-2"),
        ]);
        match plan.validate_dependencies().unwrap_err() {
            PlanValidationError::DependencyCycle { path } => {
                // Path ends by re-naming the node that closes the cycle
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let plan = plan_with(vec![Task::with_id("task-1", "one").with_dependency("task-1")]);
        assert!(matches!(
            plan.validate_dependencies(),
            Err(PlanValidationError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_load_missing_plan_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        assert!(load_plan(&path).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("plan.json");
        let plan = plan_with(vec![Task::with_id("task-1", "one")]);

        save_plan(&plan, &path).unwrap();
        let back = load_plan(&path).unwrap().unwrap();
        assert_eq!(back.title.as_deref(), Some("test"));
        assert_eq!(back.tasks.len(), 1);
        assert_eq!(back.tasks[0].id, "task-1");
    }

    #[test]
    fn test_update_task_status() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let plan = plan_with(vec![Task::with_id("task-1", "one")]);
        save_plan(&plan, &path).unwrap();

        assert!(update_task_status(&path, "task-1", TaskStatus::Completed).unwrap());
        let back = load_plan(&path).unwrap().unwrap();
        assert_eq!(back.tasks[0].status, TaskStatus::Completed);
        assert!(back.tasks[0].completed_at.is_some());

        // Unknown task or missing file are false, not errors
        assert!(!update_task_status(&path, "task-9", TaskStatus::Completed).unwrap());
        let missing = dir.path().join("nope.json");
        assert!(!update_task_status(&missing, "task-1", TaskStatus::Completed).unwrap());
    }
}
