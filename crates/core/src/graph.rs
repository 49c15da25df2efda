//! Structural checks for a job's task graph.
//!
//! A malformed parent/sequence layout does not fail at run time: tasks simply
//! never become eligible. These checks surface such defects before a run.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use crate::task::Task;

/// A defect in a task graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphIssue {
    /// `parent_id` does not match any task in the job
    #[error("task {task} references unknown parent {parent}")]
    UnknownParent {
        /// Offending task id
        task: String,
        /// The dangling parent id
        parent: String,
    },
    /// A stage number is skipped under a parent
    #[error("sequence {sequence} is missing under parent {}", parent_label(parent))]
    MissingSequence {
        /// Parent id, empty for roots
        parent: String,
        /// The absent stage
        sequence: u32,
    },
    /// The task cannot be reached from a root (parent cycle)
    #[error("task {task} is not reachable from any root task")]
    Unreachable {
        /// Offending task id
        task: String,
    },
    /// More than one task uses this code
    #[error("task code {code} is used more than once")]
    DuplicateCode {
        /// The shared code
        code: String,
    },
}

fn parent_label(parent: &str) -> &str {
    if parent.is_empty() {
        "<root>"
    } else {
        parent
    }
}

/// Check a task list for layouts that would stall a run or shadow params.
///
/// Issues are returned in a stable order: unknown parents, sequence gaps,
/// unreachable tasks, then duplicate codes.
pub fn validate_graph(tasks: &[Task]) -> Vec<GraphIssue> {
    let mut issues = Vec::new();
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

    for task in tasks {
        if !task.is_root() && !ids.contains(task.parent_id.as_str()) {
            issues.push(GraphIssue::UnknownParent {
                task: task.id.to_string(),
                parent: task.parent_id.clone(),
            });
        }
    }

    let mut groups: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.parent_id.as_str()).or_default().insert(task.sequence);
    }
    for (parent, sequences) in &groups {
        let Some(&max) = sequences.iter().next_back() else {
            continue;
        };
        for sequence in 0..max {
            if !sequences.contains(&sequence) {
                issues.push(GraphIssue::MissingSequence {
                    parent: parent.to_string(),
                    sequence,
                });
            }
        }
    }

    // Walk down from the roots; whatever is left hangs off a cycle or a dangling parent.
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        children.entry(task.parent_id.as_str()).or_default().push(task.id.as_str());
    }
    let mut reached: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = children.get("").cloned().unwrap_or_default();
    while let Some(id) = stack.pop() {
        if reached.insert(id) {
            if let Some(next) = children.get(id) {
                stack.extend(next.iter().copied());
            }
        }
    }
    for task in tasks {
        let dangling = !task.is_root() && !ids.contains(task.parent_id.as_str());
        if !dangling && !reached.contains(task.id.as_str()) {
            issues.push(GraphIssue::Unreachable {
                task: task.id.to_string(),
            });
        }
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for task in tasks {
        if !seen.insert(task.code.as_str()) && reported.insert(task.code.as_str()) {
            issues.push(GraphIssue::DuplicateCode {
                code: task.code.clone(),
            });
        }
    }

    issues
}
