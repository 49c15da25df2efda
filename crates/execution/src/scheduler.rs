//! Next-eligible task selection.
//!
//! Tasks are grouped by `(parent_id, sequence)`. Under one parent, stage
//! `n + 1` only starts once every task in stage `n` is terminal, and the
//! stage-0 children of a task start as soon as that task finishes.

use jobworker_core::{Task, TaskStatus};

/// The task whose completion triggers a scheduling round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Instance id of the finished task
    pub id: String,
    /// Its parent id
    pub parent_id: String,
    /// Its stage
    pub sequence: u32,
}

impl Completion {
    /// Describe a finished task.
    pub fn of(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            parent_id: task.parent_id.clone(),
            sequence: task.sequence,
        }
    }
}

/// Select the tasks that become eligible after `event`.
///
/// `None` is the cold start: the root stage 0. Selected tasks are flipped to
/// processing and their indices returned in task-list order, next-stage
/// siblings first, then children of the finished task.
pub fn next_eligible(tasks: &mut [Task], event: Option<&Completion>) -> Vec<usize> {
    let (id, parent, sequence) = match event {
        Some(c) => (c.id.as_str(), c.parent_id.as_str(), c.sequence),
        None => ("", "", 0),
    };

    // A group with nothing left in flight lets the next stage through.
    let group_done = !tasks
        .iter()
        .any(|t| t.parent_id == parent && t.sequence == sequence && !t.status.is_terminal());
    let target = if group_done { sequence + 1 } else { sequence };

    let mut selected = Vec::new();
    for (i, task) in tasks.iter_mut().enumerate() {
        if task.parent_id == parent && task.sequence == target && task.status == TaskStatus::Created {
            task.status = TaskStatus::Processing;
            selected.push(i);
        }
    }

    if !id.is_empty() {
        for (i, task) in tasks.iter_mut().enumerate() {
            if task.parent_id == id && task.sequence == 0 && task.status == TaskStatus::Created {
                task.status = TaskStatus::Processing;
                selected.push(i);
            }
        }
    }

    selected
}

/// Select the tasks a partly-run job can pick up again.
///
/// A created task qualifies when its parent is terminal (or it is a root),
/// every earlier stage under the same parent is terminal and the stage right
/// before it has tasks. An empty root stage 0 lets root stage 1 through, as
/// on a cold start. Selected tasks are flipped to processing.
pub fn resume_eligible(tasks: &mut [Task]) -> Vec<usize> {
    let selected: Vec<usize> = (0..tasks.len())
        .filter(|&i| is_resumable(tasks, &tasks[i]))
        .collect();
    for &i in &selected {
        tasks[i].status = TaskStatus::Processing;
    }
    selected
}

fn is_resumable(tasks: &[Task], task: &Task) -> bool {
    if task.status != TaskStatus::Created {
        return false;
    }
    let parent_done = task.is_root()
        || tasks
            .iter()
            .any(|t| t.id.as_str() == task.parent_id && t.status.is_terminal());
    if !parent_done {
        return false;
    }

    let mut siblings = tasks.iter().filter(|t| t.parent_id == task.parent_id);
    if siblings
        .clone()
        .any(|t| t.sequence < task.sequence && !t.status.is_terminal())
    {
        return false;
    }
    task.sequence == 0
        || siblings.any(|t| t.sequence + 1 == task.sequence)
        || (task.is_root() && task.sequence == 1)
}
