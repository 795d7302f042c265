//! Pure planning for one coder tick.
//!
//! [`plan_tick`] decides what the coder does next. It never runs anything;
//! the coder stage turns the plan into task execution and a state delta.

use crate::core::task_graph::{position_of, ready_tasks};
use crate::core::types::Task;

/// Why the dev stage has nothing left to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finish {
    /// The task list is empty.
    NoTasks,
    /// The index pointer has passed the end of the list. Tasks skipped by a
    /// redirect may still be unfinished, so `completed` can be below `total`.
    AllProcessed { completed: usize, total: usize },
    /// The coding iteration cap was reached before the list was exhausted.
    IterationCap { completed: usize, total: usize },
}

impl Finish {
    pub fn message(&self) -> String {
        match self {
            Finish::NoTasks => "No tasks to execute".to_string(),
            Finish::AllProcessed { completed, .. } => format!("Completed {completed} tasks"),
            Finish::IterationCap { completed, total } => {
                format!("Reached maximum iterations. Completed {completed}/{total} tasks")
            }
        }
    }
}

/// Outcome of planning a single coder tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickPlan {
    Finished(Finish),
    /// Task at the index is already completed; move past it.
    Skip { task_id: String, next_index: usize },
    /// Task at the index has unmet dependencies; point at a ready task instead.
    Redirect {
        from_id: String,
        to_id: String,
        to_index: usize,
    },
    /// Nothing is ready yet unfinished tasks remain.
    Stall { pending: Vec<String> },
    /// Run the task at `index`.
    Execute { index: usize },
}

/// Inputs for [`plan_tick`].
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub tasks: &'a [Task],
    pub completed_ids: &'a [String],
    pub index: usize,
    pub iterations: u32,
    pub max_iterations: u32,
}

/// Decide the next coder action.
///
/// Checks run in a fixed order: empty list, index past the end, iteration
/// cap, then the task under the index.
pub fn plan_tick(input: TickInput<'_>) -> TickPlan {
    let tasks = input.tasks;
    if tasks.is_empty() {
        return TickPlan::Finished(Finish::NoTasks);
    }
    if input.index >= tasks.len() {
        return TickPlan::Finished(Finish::AllProcessed {
            completed: completed_count(tasks, input.completed_ids),
            total: tasks.len(),
        });
    }
    if input.iterations >= input.max_iterations {
        return TickPlan::Finished(Finish::IterationCap {
            completed: completed_count(tasks, input.completed_ids),
            total: tasks.len(),
        });
    }

    let current = &tasks[input.index];
    if current.is_completed() || input.completed_ids.iter().any(|id| id == &current.id) {
        return TickPlan::Skip {
            task_id: current.id.clone(),
            next_index: input.index + 1,
        };
    }

    let deps_met = current
        .dependencies
        .iter()
        .all(|dep| input.completed_ids.iter().any(|id| id == dep));
    if deps_met {
        return TickPlan::Execute { index: input.index };
    }

    let ready = ready_tasks(tasks, input.completed_ids);
    match ready.first() {
        Some(next) => TickPlan::Redirect {
            from_id: current.id.clone(),
            to_id: next.id.clone(),
            to_index: position_of(tasks, &next.id).unwrap_or(input.index),
        },
        None => TickPlan::Stall {
            pending: pending_ids(tasks, input.completed_ids),
        },
    }
}

/// Ids of tasks that are neither marked completed nor in the completed set.
pub fn pending_ids(tasks: &[Task], completed_ids: &[String]) -> Vec<String> {
    tasks
        .iter()
        .filter(|task| !task.is_completed() && !completed_ids.iter().any(|id| id == &task.id))
        .map(|task| task.id.clone())
        .collect()
}

fn completed_count(tasks: &[Task], completed_ids: &[String]) -> usize {
    tasks
        .iter()
        .filter(|task| task.is_completed() || completed_ids.iter().any(|id| id == &task.id))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::task;

    fn input<'a>(tasks: &'a [Task], completed: &'a [String], index: usize) -> TickInput<'a> {
        TickInput {
            tasks,
            completed_ids: completed,
            index,
            iterations: 0,
            max_iterations: 50,
        }
    }

    #[test]
    fn empty_list_finishes() {
        assert_eq!(plan_tick(input(&[], &[], 0)), TickPlan::Finished(Finish::NoTasks));
    }

    #[test]
    fn index_past_end_finishes() {
        let tasks = vec![task("t1", &[])];
        assert_eq!(
            plan_tick(input(&tasks, &[], 1)),
            TickPlan::Finished(Finish::AllProcessed {
                completed: 0,
                total: 1
            })
        );
    }

    /// A task passed over by a redirect stays pending when the index runs
    /// off the end, and the summary counts only finished work.
    #[test]
    fn index_past_end_counts_only_completed_tasks() {
        let tasks = vec![task("t2", &["t1"]), task("t1", &[]), task("t3", &[])];
        let completed = vec!["t1".to_string(), "t3".to_string()];
        let plan = plan_tick(input(&tasks, &completed, 3));
        assert_eq!(
            plan,
            TickPlan::Finished(Finish::AllProcessed {
                completed: 2,
                total: 3
            })
        );
        if let TickPlan::Finished(finish) = plan {
            assert_eq!(finish.message(), "Completed 2 tasks");
        }
        assert_eq!(pending_ids(&tasks, &completed), vec!["t2".to_string()]);
    }

    /// The cap check runs before the task under the index is inspected.
    #[test]
    fn iteration_cap_reports_partial_completion() {
        let tasks = vec![task("t1", &[]), task("t2", &[]), task("t3", &[])];
        let completed = vec!["t1".to_string()];
        let plan = plan_tick(TickInput {
            iterations: 1,
            max_iterations: 1,
            ..input(&tasks, &completed, 1)
        });
        assert_eq!(
            plan,
            TickPlan::Finished(Finish::IterationCap {
                completed: 1,
                total: 3
            })
        );
        if let TickPlan::Finished(finish) = plan {
            assert_eq!(
                finish.message(),
                "Reached maximum iterations. Completed 1/3 tasks"
            );
        }
    }

    /// Either the status field or the id set marks a task as done.
    #[test]
    fn completed_task_is_skipped_by_status_or_id() {
        let mut by_status = task("t1", &[]);
        by_status.status = TaskStatus::Completed;
        let tasks = vec![by_status, task("t2", &[])];
        assert_eq!(
            plan_tick(input(&tasks, &[], 0)),
            TickPlan::Skip {
                task_id: "t1".to_string(),
                next_index: 1
            }
        );

        let tasks = vec![task("t1", &[]), task("t2", &[])];
        let completed = vec!["t1".to_string()];
        assert!(matches!(
            plan_tick(input(&tasks, &completed, 0)),
            TickPlan::Skip { next_index: 1, .. }
        ));
    }

    #[test]
    fn unmet_dependencies_redirect_to_first_ready_task() {
        let tasks = vec![task("t2", &["t1"]), task("t1", &[])];
        assert_eq!(
            plan_tick(input(&tasks, &[], 0)),
            TickPlan::Redirect {
                from_id: "t2".to_string(),
                to_id: "t1".to_string(),
                to_index: 1
            }
        );
    }

    #[test]
    fn mutual_dependency_stalls() {
        let tasks = vec![task("t1", &["t2"]), task("t2", &["t1"])];
        assert_eq!(
            plan_tick(input(&tasks, &[], 0)),
            TickPlan::Stall {
                pending: vec!["t1".to_string(), "t2".to_string()]
            }
        );
    }

    /// A blocked task with satisfied dependencies is retried in place.
    #[test]
    fn blocked_task_is_executed_again() {
        let mut blocked = task("t1", &[]);
        blocked.status = TaskStatus::Blocked;
        let tasks = vec![blocked];
        assert_eq!(plan_tick(input(&tasks, &[], 0)), TickPlan::Execute { index: 0 });
    }
}
