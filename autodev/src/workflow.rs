//! Session state machine: PM, then Architect, then the Coder loop.
//!
//! Each node runs one stage, folds its delta into the session, and saves a
//! checkpoint naming the node that runs next. A run stops when the graph
//! ends, a stage fails, a human-review pause is hit, or the per-run step
//! limit is reached.
//!
//! Callers must not drive the same session from two runs at once.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::reviewer::format_reviews;
use crate::agents::{
    ArchitectStage, CoderStage, PmStage, ReviewerStage, StageContext, run_generative, run_tool,
};
use crate::core::documents::validate_requirement;
use crate::core::routing::{CoderRoute, coder_route};
use crate::core::state::SessionState;
use crate::core::types::{GraphNode, HaltReason, ReviewRole, Stage};
use crate::io::assistant::CodingAssistant;
use crate::io::checkpoint::CheckpointStore;
use crate::io::config::AutodevConfig;
use crate::io::llm::LlmClient;
use crate::io::prompt::PromptEngine;
use crate::io::workspace::{Workspace, generate_session_id, validate_session_id, write_text};
use crate::recovery::{Recovered, ResumeStrategy, recover};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Paused; `next` runs on resume.
    Interrupted { next: GraphNode },
    Completed,
    /// A stage failed; resuming retries it.
    Failed { error: String },
}

/// Result of one stage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Advanced { next: Option<GraphNode> },
    Failed { error: String },
}

/// Final state of a `start`/`resume`/`review` call.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Node a later resume starts from, if any.
    pub next: Option<GraphNode>,
    pub state: SessionState,
    pub strategy: ResumeStrategy,
}

impl RunOutcome {
    fn new(status: RunStatus, next: Option<GraphNode>, state: SessionState, strategy: ResumeStrategy) -> Self {
        Self {
            status,
            next,
            state,
            strategy,
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo::new(&self.state, self.strategy, self.next, Some(self.status.clone()))
    }
}

/// JSON summary of a session for `status` and `--output`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    pub stage: Stage,
    pub next: Option<GraphNode>,
    pub requirement: String,
    pub prd_path: Option<PathBuf>,
    pub design_path: Option<PathBuf>,
    pub tasks_path: Option<PathBuf>,
    pub code_directory: Option<PathBuf>,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub coding_iterations: u32,
    pub coding_output: Option<String>,
    pub halt: Option<HaltReason>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub messages: Vec<String>,
}

impl SessionInfo {
    pub fn new(
        state: &SessionState,
        strategy: ResumeStrategy,
        next: Option<GraphNode>,
        status: Option<RunStatus>,
    ) -> Self {
        Self {
            session_id: state.session_id.clone(),
            source: strategy.as_str(),
            status,
            stage: state.stage,
            next,
            requirement: state.requirement.clone(),
            prd_path: state.prd_path.clone(),
            design_path: state.design_path.clone(),
            tasks_path: state.tasks_path.clone(),
            code_directory: state.code_directory.clone(),
            tasks_total: state.tasks.len(),
            tasks_completed: state.completed_count(),
            coding_iterations: state.coding_iterations,
            coding_output: state.coding_output.clone(),
            halt: state.halt.clone(),
            error: state.error.clone(),
            retry_count: state.retry_count,
            messages: state.messages.clone(),
        }
    }

    fn from_recovered(recovered: &Recovered) -> Self {
        Self::new(recovered.state(), recovered.strategy(), recovered.next(), None)
    }
}

/// The workflow engine. Collaborators are borrowed; nothing is global.
pub struct Workflow<'a> {
    config: &'a AutodevConfig,
    llm: &'a dyn LlmClient,
    assistant: &'a dyn CodingAssistant,
    store: &'a dyn CheckpointStore,
    workspace: Workspace,
    prompts: PromptEngine,
}

impl<'a> Workflow<'a> {
    pub fn new(
        config: &'a AutodevConfig,
        llm: &'a dyn LlmClient,
        assistant: &'a dyn CodingAssistant,
        store: &'a dyn CheckpointStore,
    ) -> Result<Self> {
        Ok(Self {
            config,
            llm,
            assistant,
            store,
            workspace: Workspace::new(&config.workspace_root),
            prompts: PromptEngine::new()?,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn ctx(&self) -> StageContext<'_> {
        StageContext {
            config: self.config,
            workspace: &self.workspace,
            prompts: &self.prompts,
        }
    }

    /// Create a session and run it from the PM stage.
    #[instrument(skip_all)]
    pub fn start(
        &self,
        requirement: &str,
        session_id: Option<&str>,
        project_dir: Option<PathBuf>,
    ) -> Result<RunOutcome> {
        let requirement = requirement.trim();
        if requirement.is_empty() {
            bail!("requirement must not be empty");
        }
        for warning in validate_requirement(requirement) {
            warn!(%warning, "requirement validation");
        }

        let session_id = match session_id {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => generate_session_id(),
        };
        let paths = self.workspace.session(&session_id);
        if paths.exists() {
            bail!("session {session_id} already exists; use `continue` to resume it");
        }
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create session dir {}", paths.dir.display()))?;
        info!(session_id = %session_id, dir = %paths.dir.display(), "session started");

        let mut state = SessionState::new(session_id, requirement);
        state.project_dir = project_dir;
        self.drive(state, GraphNode::Pm)
    }

    /// Resume a session, optionally with human feedback.
    ///
    /// Feedback given at a pause after the PM or Architect stage re-runs that
    /// stage as a revision before moving on. Without a checkpoint the
    /// session is rebuilt from its artifacts; see [`crate::recovery`].
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub fn resume(&self, session_id: &str, feedback: Option<&str>) -> Result<RunOutcome> {
        validate_session_id(session_id)?;
        let feedback = feedback.map(str::trim).filter(|text| !text.is_empty());
        let recovered = recover(self.store, &self.workspace, session_id)?
            .ok_or_else(|| anyhow!("session {session_id} not found"))?;

        match recovered {
            Recovered::Checkpoint(checkpoint) => {
                let mut state = checkpoint.state;
                let Some(mut next) = checkpoint.next else {
                    if feedback.is_some() {
                        warn!("session already finished; feedback ignored");
                    }
                    info!("nothing left to run");
                    return Ok(RunOutcome::new(
                        RunStatus::Completed,
                        None,
                        state,
                        ResumeStrategy::Checkpoint,
                    ));
                };
                if let Some(feedback) = feedback {
                    state.inject_feedback(feedback);
                    next = revision_target(next, state.stage);
                    info!(stage = %state.stage, next = %next, "feedback injected");
                }
                self.drive(state, next)
            }
            Recovered::Artifacts(mut state) => {
                if let Some(feedback) = feedback {
                    state.inject_feedback(feedback);
                }
                self.resume_from_artifacts(state)
            }
        }
    }

    /// Run the three PRD reviewers, save their notes, and revise the PRD.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub fn review(&self, session_id: &str) -> Result<RunOutcome> {
        validate_session_id(session_id)?;
        let recovered = recover(self.store, &self.workspace, session_id)?
            .ok_or_else(|| anyhow!("session {session_id} not found"))?;
        let strategy = recovered.strategy();
        let previous_next = recovered.next();
        let mut state = recovered.into_state();
        if state.prd_content.is_none() {
            bail!("session {session_id} has no PRD to review");
        }

        let ctx = self.ctx();
        for role in ReviewRole::ALL {
            let delta = run_generative(&ReviewerStage::new(ctx, role), self.llm, &state);
            let failed = delta.stage_failed;
            state.apply(delta);
            if failed {
                if strategy == ResumeStrategy::Checkpoint {
                    self.save(&state, previous_next)?;
                }
                let error = state.error.clone().unwrap_or_default();
                return Ok(RunOutcome::new(
                    RunStatus::Failed { error },
                    previous_next,
                    state,
                    strategy,
                ));
            }
        }

        let reviews_path = self.workspace.session(session_id).reviews;
        write_text(&reviews_path, &format_reviews(&state.prd_reviews)).context("save PRD reviews")?;
        info!(path = %reviews_path.display(), "PRD reviews saved");

        let (status, next) = match self.step(&mut state, GraphNode::Pm)? {
            StepResult::Failed { error } => (RunStatus::Failed { error }, Some(GraphNode::Pm)),
            StepResult::Advanced { next: Some(next) } => (RunStatus::Interrupted { next }, Some(next)),
            StepResult::Advanced { next: None } => (RunStatus::Completed, None),
        };
        Ok(RunOutcome::new(status, next, state, strategy))
    }

    pub fn status(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        session_status(self.store, &self.workspace, session_id)
    }

    pub fn list(&self) -> Result<Vec<SessionInfo>> {
        list_sessions(self.store, &self.workspace)
    }

    /// Run exactly one node, apply its delta, and checkpoint.
    #[instrument(skip_all, fields(session_id = %state.session_id, node = %node))]
    pub fn step(&self, state: &mut SessionState, node: GraphNode) -> Result<StepResult> {
        let ctx = self.ctx();
        let delta = match node {
            GraphNode::Pm => run_generative(&PmStage::new(ctx), self.llm, state),
            GraphNode::Architect => run_generative(&ArchitectStage::new(ctx), self.llm, state),
            GraphNode::Coder => run_tool(
                &CoderStage::new(ctx, self.assistant, self.config.workflow.batch_coding),
                state,
            ),
        };
        let failed = delta.stage_failed;
        state.apply(delta);

        let next = if failed {
            Some(node)
        } else {
            self.route(node, state)
        };
        self.save(state, next)?;

        if failed {
            let error = state.error.clone().unwrap_or_default();
            warn!(error = %error, "stage failed; run halted");
            return Ok(StepResult::Failed { error });
        }
        Ok(StepResult::Advanced { next })
    }

    fn route(&self, node: GraphNode, state: &SessionState) -> Option<GraphNode> {
        match node {
            GraphNode::Pm => Some(GraphNode::Architect),
            GraphNode::Architect => Some(GraphNode::Coder),
            GraphNode::Coder => {
                match coder_route(state, self.config.workflow.max_coding_iterations) {
                    CoderRoute::Continue => Some(GraphNode::Coder),
                    CoderRoute::Done => None,
                }
            }
        }
    }

    fn pauses_after(&self, node: GraphNode) -> bool {
        self.config.workflow.human_in_loop && matches!(node, GraphNode::Pm | GraphNode::Architect)
    }

    fn save(&self, state: &SessionState, next: Option<GraphNode>) -> Result<()> {
        self.store
            .save(state, next)
            .with_context(|| format!("checkpoint session {}", state.session_id))?;
        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %state.session_id, start = %start))]
    fn drive(&self, mut state: SessionState, start: GraphNode) -> Result<RunOutcome> {
        let limit = self.config.workflow.max_graph_steps;
        let mut next = Some(start);
        let mut steps = 0;

        while let Some(node) = next {
            if steps >= limit {
                info!(steps, next = %node, "step limit reached; yielding");
                return Ok(self.interrupted(state, node));
            }
            steps += 1;
            match self.step(&mut state, node)? {
                StepResult::Failed { error } => {
                    return Ok(RunOutcome::new(
                        RunStatus::Failed { error },
                        Some(node),
                        state,
                        ResumeStrategy::Checkpoint,
                    ));
                }
                StepResult::Advanced { next: after } => {
                    if let Some(after) = after
                        && self.pauses_after(node)
                    {
                        info!(completed = %node, next = %after, "paused for human review");
                        return Ok(self.interrupted(state, after));
                    }
                    next = after;
                }
            }
        }

        info!(
            steps,
            completed = state.completed_count(),
            total = state.tasks.len(),
            "workflow finished"
        );
        Ok(RunOutcome::new(
            RunStatus::Completed,
            None,
            state,
            ResumeStrategy::Checkpoint,
        ))
    }

    fn interrupted(&self, state: SessionState, next: GraphNode) -> RunOutcome {
        RunOutcome::new(
            RunStatus::Interrupted { next },
            Some(next),
            state,
            ResumeStrategy::Checkpoint,
        )
    }

    /// Run the stage implied by the artifacts once, outside the graph.
    ///
    /// No checkpoint is written on this path.
    fn resume_from_artifacts(&self, mut state: SessionState) -> Result<RunOutcome> {
        let has_artifacts =
            state.prd_content.is_some() || state.design_content.is_some() || !state.tasks.is_empty();
        if !has_artifacts {
            bail!(
                "session {} has no checkpoint and no artifacts to resume from",
                state.session_id
            );
        }
        warn!(
            stage = %state.stage,
            "no checkpoint found; resuming from artifacts with iteration counters reset"
        );

        let ctx = self.ctx();
        let (delta, after) = match state.stage {
            Stage::Done => {
                return Ok(RunOutcome::new(
                    RunStatus::Completed,
                    None,
                    state,
                    ResumeStrategy::Artifacts,
                ));
            }
            Stage::Prd => {
                // The architect runs next, so PRD-stage feedback steers the design.
                if let Some(feedback) = state.prd_feedback.take() {
                    info!("feedback forwarded to the architect");
                    state.design_feedback = Some(feedback);
                }
                (
                    run_generative(&ArchitectStage::new(ctx), self.llm, &state),
                    GraphNode::Architect,
                )
            }
            Stage::Design | Stage::Dev => {
                state.stage = Stage::Dev;
                (
                    run_tool(&CoderStage::new(ctx, self.assistant, true), &state),
                    GraphNode::Coder,
                )
            }
        };
        let failed = delta.stage_failed;
        state.apply(delta);

        let (status, next) = if failed {
            let error = state.error.clone().unwrap_or_default();
            (RunStatus::Failed { error }, Some(after))
        } else if state.stage == Stage::Done {
            (RunStatus::Completed, None)
        } else {
            (
                RunStatus::Interrupted {
                    next: GraphNode::Coder,
                },
                Some(GraphNode::Coder),
            )
        };
        Ok(RunOutcome::new(status, next, state, ResumeStrategy::Artifacts))
    }
}

/// Summary of a session, or `None` if it does not exist.
pub fn session_status(
    store: &dyn CheckpointStore,
    workspace: &Workspace,
    session_id: &str,
) -> Result<Option<SessionInfo>> {
    validate_session_id(session_id)?;
    Ok(recover(store, workspace, session_id)?
        .as_ref()
        .map(SessionInfo::from_recovered))
}

/// Summaries of every session in the workspace, sorted by id.
pub fn list_sessions(store: &dyn CheckpointStore, workspace: &Workspace) -> Result<Vec<SessionInfo>> {
    let mut sessions = Vec::new();
    for id in workspace.list_sessions()? {
        if let Some(info) = session_status(store, workspace, &id)? {
            sessions.push(info);
        }
    }
    Ok(sessions)
}

/// Node to run when feedback arrives at a pause.
fn revision_target(next: GraphNode, stage: Stage) -> GraphNode {
    match (next, stage) {
        (GraphNode::Architect, Stage::Prd) => GraphNode::Pm,
        (GraphNode::Coder, Stage::Design) => GraphNode::Architect,
        (next, _) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_at_pause_reruns_finished_stage() {
        assert_eq!(revision_target(GraphNode::Architect, Stage::Prd), GraphNode::Pm);
        assert_eq!(revision_target(GraphNode::Coder, Stage::Design), GraphNode::Architect);
        assert_eq!(revision_target(GraphNode::Coder, Stage::Dev), GraphNode::Coder);
        assert_eq!(revision_target(GraphNode::Pm, Stage::Prd), GraphNode::Pm);
    }

    #[test]
    fn run_status_serializes_with_state_tag() {
        let json = serde_json::to_value(RunStatus::Interrupted {
            next: GraphNode::Architect,
        })
        .expect("json");
        assert_eq!(json, serde_json::json!({"state": "interrupted", "next": "architect"}));
    }
}
