//! Task graph queries and structural validation.
//!
//! Execution order is always list order; priority never reorders tasks.

use std::collections::{HashMap, HashSet};

use crate::core::types::Task;

/// Tasks that are not completed and whose dependencies are all in `completed_ids`.
///
/// A task counts as completed if either its status says so or its id is in
/// `completed_ids`; the two can disagree after a partial recovery. Result order
/// is input order.
pub fn ready_tasks<'a>(tasks: &'a [Task], completed_ids: &[String]) -> Vec<&'a Task> {
    let done: HashSet<&str> = completed_ids.iter().map(String::as_str).collect();
    tasks
        .iter()
        .filter(|task| !task.is_completed() && !done.contains(task.id.as_str()))
        .filter(|task| {
            task.dependencies
                .iter()
                .all(|dep| done.contains(dep.as_str()))
        })
        .collect()
}

/// First task with the given id.
pub fn find_by_id<'a>(tasks: &'a [Task], id: &str) -> Option<&'a Task> {
    tasks.iter().find(|task| task.id == id)
}

/// Index of the first task with the given id.
pub fn position_of(tasks: &[Task], id: &str) -> Option<usize> {
    tasks.iter().position(|task| task.id == id)
}

/// Structural violations that make a task list unusable.
///
/// Reports empty ids, duplicate ids, and dependencies on unknown ids.
pub fn graph_violations(tasks: &[Task]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in tasks {
        if task.id.trim().is_empty() {
            errors.push("task with empty id".to_string());
            continue;
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
    }

    let ids: HashSet<&str> = tasks.iter().map(|task| task.id.as_str()).collect();
    for task in tasks {
        for dep in &task.dependencies {
            if !ids.contains(dep.as_str()) {
                errors.push(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                ));
            }
        }
    }
    errors
}

/// Non-fatal findings: self-dependencies, cycles, and priorities outside 1..=10.
pub fn graph_warnings(tasks: &[Task]) -> Vec<String> {
    let mut warnings = Vec::new();
    for task in tasks {
        if task.dependencies.iter().any(|dep| dep == &task.id) {
            warnings.push(format!("task '{}' depends on itself", task.id));
        }
        if let Some(priority) = task.priority
            && !(1..=10).contains(&priority)
        {
            warnings.push(format!(
                "task '{}' priority {} outside 1..=10",
                task.id, priority
            ));
        }
    }
    if let Some(cycle) = find_cycle(tasks) {
        warnings.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }
    warnings
}

/// Find one dependency cycle, returned as the ids along the cycle with the
/// first id repeated at the end.
pub fn find_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Visited,
    }

    fn visit<'a>(
        id: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(id) {
            Some(Mark::Visited) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut cycle: Vec<String> =
                    stack[start..].iter().map(|s| (*s).to_string()).collect();
                cycle.push(id.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        stack.push(id);
        if let Some(deps) = edges.get(id) {
            for dep in deps {
                if let Some(cycle) = visit(dep, edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(id, Mark::Visited);
        None
    }

    let edges: HashMap<&str, Vec<&str>> = tasks
        .iter()
        .map(|task| {
            (
                task.id.as_str(),
                task.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    let mut marks = HashMap::new();
    for task in tasks {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(task.id.as_str(), &edges, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Ids of tasks whose status is `completed`, in list order.
pub fn completed_ids_from_status(tasks: &[Task]) -> Vec<String> {
    tasks
        .iter()
        .filter(|task| task.is_completed())
        .map(|task| task.id.clone())
        .collect()
}
