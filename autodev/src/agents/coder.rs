//! Coder stage: drives the task scheduler and the coding assistant.
//!
//! Each tick plans one scheduler step with [`plan_tick`] and carries it out.
//! Iterative mode runs a single tick per stage execution; batch mode keeps
//! ticking until the dev-loop edge reports done. Either way, when the edge
//! reports done the closing tick runs in the same execution so the session
//! ends at `done` with a summary.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::agents::{StageContext, ToolStage};
use crate::core::routing::{CoderRoute, coder_route};
use crate::core::scheduler::{Finish, TickInput, TickPlan, pending_ids, plan_tick};
use crate::core::state::{SessionState, StateDelta};
use crate::core::types::{HaltReason, Stage, TaskStatus};
use crate::error::CircularDependencyStall;
use crate::io::assistant::{AssistantRequest, CodingAssistant, RetryPolicy, execute_with_retry};
use crate::io::task_store::write_tasks;

const STALL_MESSAGE: &str = "No tasks ready to execute - possible circular dependencies";

pub struct CoderStage<'a> {
    ctx: StageContext<'a>,
    assistant: &'a dyn CodingAssistant,
    batch: bool,
}

impl<'a> CoderStage<'a> {
    pub fn new(ctx: StageContext<'a>, assistant: &'a dyn CodingAssistant, batch: bool) -> Self {
        Self {
            ctx,
            assistant,
            batch,
        }
    }

    fn max_iterations(&self) -> u32 {
        self.ctx.config.workflow.max_coding_iterations
    }

    /// Run the closing tick if the edge says the dev loop is over.
    ///
    /// Returns true when the loop is over.
    fn settle(&self, work: &mut SessionState) -> Result<bool> {
        if coder_route(work, self.max_iterations()) == CoderRoute::Continue {
            return Ok(false);
        }
        if work.stage != Stage::Done {
            let delta = self.tick(work)?;
            work.apply(delta);
        }
        Ok(true)
    }

    /// Plan and carry out one scheduler step.
    pub fn tick(&self, state: &SessionState) -> Result<StateDelta> {
        let plan = plan_tick(TickInput {
            tasks: &state.tasks,
            completed_ids: &state.completed_tasks,
            index: state.current_task_index,
            iterations: state.coding_iterations,
            max_iterations: self.max_iterations(),
        });

        match plan {
            TickPlan::Finished(finish) => {
                let message = finish.message();
                info!(%message, "dev stage finished");
                if let Finish::AllProcessed { completed, total } = finish
                    && completed < total
                {
                    let pending = pending_ids(&state.tasks, &state.completed_tasks);
                    warn!(
                        completed,
                        total,
                        pending = %pending.join(", "),
                        "dev stage ended with unfinished tasks"
                    );
                }
                let halt = match finish {
                    Finish::IterationCap { completed, total } => {
                        Some(HaltReason::IterationCap { completed, total })
                    }
                    Finish::NoTasks | Finish::AllProcessed { .. } => None,
                };
                Ok(StateDelta {
                    stage: Some(Stage::Done),
                    coding_output: Some(message),
                    halt,
                    ..StateDelta::default()
                })
            }
            TickPlan::Skip {
                task_id,
                next_index,
            } => {
                debug!(task_id = %task_id, "task already completed, skipping");
                Ok(StateDelta {
                    stage: Some(Stage::Dev),
                    current_task_index: Some(next_index),
                    ..StateDelta::default()
                })
            }
            TickPlan::Redirect {
                from_id,
                to_id,
                to_index,
            } => {
                let message = format!("Switched to task {to_id} (unmet dependencies for {from_id})");
                info!(%message);
                Ok(StateDelta {
                    stage: Some(Stage::Dev),
                    current_task_index: Some(to_index),
                    coding_output: Some(message),
                    ..StateDelta::default()
                })
            }
            TickPlan::Stall { pending } => {
                let stall = CircularDependencyStall {
                    pending: pending.clone(),
                };
                warn!(error = %stall, "dev stage halted");
                Ok(StateDelta {
                    stage: Some(Stage::Done),
                    coding_output: Some(STALL_MESSAGE.to_string()),
                    halt: Some(HaltReason::CircularDependency { pending }),
                    ..StateDelta::default()
                })
            }
            TickPlan::Execute { index } => self.run_task(state, index),
        }
    }

    #[instrument(skip_all, fields(task_id = %state.tasks[index].id, iteration = state.coding_iterations + 1))]
    fn run_task(&self, state: &SessionState, index: usize) -> Result<StateDelta> {
        let paths = self.ctx.workspace.session(&state.session_id);
        let tasks_path = state.tasks_path.clone().unwrap_or_else(|| paths.tasks.clone());
        let workdir: PathBuf = state
            .project_dir
            .clone()
            .unwrap_or_else(|| paths.code_dir.clone());

        let mut tasks = state.tasks.clone();
        tasks[index].status = TaskStatus::InProgress;
        tasks[index].started_at = Some(Utc::now().to_rfc3339());
        tasks[index].error = None;
        write_tasks(&tasks_path, &tasks)?;

        let task = &tasks[index];
        info!(title = %task.title, "executing task");
        let request = AssistantRequest {
            workdir: workdir.clone(),
            extra_dirs: vec![paths.dir.clone()],
            prompt: self.ctx.prompts.coder(
                task,
                state.design_content.as_deref(),
                state.human_feedback.as_deref(),
            )?,
            log_path: Some(paths.task_log(&task.id)),
        };
        let clock = Instant::now();
        let outcome = execute_with_retry(
            self.assistant,
            &request,
            &RetryPolicy::from_config(&self.ctx.config.assistant),
        );
        let duration = clock.elapsed().as_secs_f64();
        let now = Utc::now().to_rfc3339();

        let mut delta = StateDelta {
            stage: Some(Stage::Dev),
            coding_iterations: Some(state.coding_iterations + 1),
            code_directory: Some(workdir),
            ..StateDelta::default()
        };
        let task = &mut tasks[index];
        task.duration_secs = Some(duration);
        match outcome {
            Ok(report) => {
                info!(
                    attempts = report.attempts,
                    verdict = %report.verdict,
                    created = report.files_created.len(),
                    modified = report.files_modified.len(),
                    "task completed"
                );
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now);
                let mut completed = state.completed_tasks.clone();
                completed.push(task.id.clone());
                delta.completed_tasks = Some(completed);
                delta.current_task_index = Some(index + 1);
                delta.coding_output = Some(report.output);
            }
            Err(err) => {
                warn!(attempts = err.attempts, error = %err, "task blocked");
                task.status = TaskStatus::Blocked;
                task.blocked_at = Some(now);
                task.error = Some(err.to_string());
                delta.error = Some(format!("Task {} failed: {err}", task.id));
                delta.coding_output = Some(err.output);
            }
        }

        write_tasks(&tasks_path, &tasks)?;
        delta.tasks = Some(tasks);
        delta.tasks_path = Some(tasks_path);
        Ok(delta)
    }
}

impl ToolStage for CoderStage<'_> {
    fn name(&self) -> String {
        "Coder_Agent".to_string()
    }

    fn execute(&self, state: &SessionState) -> Result<StateDelta> {
        let mut work = state.clone();
        if self.batch {
            let bound = (self.max_iterations() as usize + 1) * (work.tasks.len() + 2);
            let mut ticks = 0;
            loop {
                let delta = self.tick(&work)?;
                work.apply(delta);
                ticks += 1;
                if self.settle(&mut work)? {
                    break;
                }
                if ticks >= bound {
                    warn!(ticks, "batch tick bound reached");
                    break;
                }
            }
            info!(
                ticks,
                completed = work.completed_count(),
                total = work.tasks.len(),
                "batch coding finished"
            );
        } else {
            let delta = self.tick(&work)?;
            work.apply(delta);
            self.settle(&mut work)?;
        }
        Ok(dev_delta(work))
    }
}

/// Delta carrying every dev-loop field of the worked state.
fn dev_delta(work: SessionState) -> StateDelta {
    StateDelta {
        stage: Some(work.stage),
        tasks: Some(work.tasks),
        tasks_path: work.tasks_path,
        current_task_index: Some(work.current_task_index),
        completed_tasks: Some(work.completed_tasks),
        coding_iterations: Some(work.coding_iterations),
        coding_output: work.coding_output,
        code_directory: work.code_directory,
        halt: work.halt,
        error: work.error,
        ..StateDelta::default()
    }
}
