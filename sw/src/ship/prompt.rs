//! Prompt builders for remote agent jobs

use sessionstore::{Session, Task};

/// Prompt for a single task run as its own remote job
pub fn task_prompt(session: &Session, task: &Task) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "Complete the following task in {} on branch {}.\n\n",
        session.repo, session.branch
    ));
    prompt.push_str(&format!("## Task: {}\n\n", task.title));
    if !task.description.is_empty() {
        prompt.push_str(&format!("{}\n\n", task.description));
    }

    if !task.acceptance_criteria.is_empty() {
        prompt.push_str("## Acceptance Criteria\n\n");
        for criterion in &task.acceptance_criteria {
            prompt.push_str(&format!("- {}\n", criterion));
        }
        prompt.push('\n');
    }

    let completed = session.completed_ids();
    if !completed.is_empty() {
        prompt.push_str("## Already Done\n\n");
        prompt.push_str("Earlier tasks in this plan are finished and committed:\n");
        for id in completed {
            prompt.push_str(&format!("- {}\n", id));
        }
        prompt.push('\n');
    }

    prompt.push_str("## Instructions\n\n");
    prompt.push_str(&format!(
        "- Commit your work when the task is done, with \"{}\" in the commit message.\n",
        task.id
    ));
    prompt.push_str("- Stay within the scope of this task.\n");

    prompt
}

/// Prompt for a whole plan worked through by one remote job
///
/// `tasks` is the still-pending slice of the plan in plan order. The
/// instructions here are what the completion heuristics key off, so the
/// marker line and the commit-message convention stay in sync with
/// `heuristics.rs`.
pub fn plan_prompt(session: &Session, tasks: &[&Task]) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "Work through the following plan in {} on branch {}.\n\n",
        session.repo, session.branch
    ));

    let done = session.completed_ids().len();
    if done > 0 {
        prompt.push_str(&format!(
            "{} earlier task(s) are already finished and committed. Do not redo them.\n\n",
            done
        ));
    }

    prompt.push_str("## Tasks\n\n");
    for (idx, task) in tasks.iter().enumerate() {
        prompt.push_str(&format!("{}. [{}] {}\n", idx + 1, task.id, task.title));
        if !task.description.is_empty() {
            prompt.push_str(&format!("   {}\n", task.description));
        }
        for criterion in &task.acceptance_criteria {
            prompt.push_str(&format!("   - {}\n", criterion));
        }
        if !task.depends_on.is_empty() {
            prompt.push_str(&format!("   depends on: {}\n", task.depends_on.join(", ")));
        }
    }
    prompt.push('\n');

    prompt.push_str("## Instructions\n\n");
    prompt.push_str("- Work on the tasks in the order listed, respecting dependencies.\n");
    prompt.push_str("- Commit once per task, with the task id in the commit message.\n");
    prompt.push_str(
        "- After finishing each task, print a line: TASK_COMPLETE: <task id>\n",
    );
    prompt.push_str("- Open exactly ONE pull request at the end covering all tasks.\n");

    prompt
}
