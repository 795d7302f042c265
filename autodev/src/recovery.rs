//! Locating a session to resume: checkpoint first, then on-disk artifacts.
//!
//! The artifact path is weaker than a checkpoint. It rebuilds the completed
//! set from task statuses, restarts `coding_iterations` and the task index at
//! zero, loses the requirement text and project directory, and does not know
//! whether the run was paused.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::state::SessionState;
use crate::core::task_graph::completed_ids_from_status;
use crate::core::types::{GraphNode, Stage};
use crate::io::checkpoint::{Checkpoint, CheckpointStore};
use crate::io::task_store::load_tasks;
use crate::io::workspace::{Workspace, read_optional};

/// How a session was located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeStrategy {
    /// Latest checkpoint; resumes exactly where the run stopped.
    Checkpoint,
    /// Reconstructed from `PRD.md`, `Design.md`, and `tasks.json`.
    Artifacts,
}

impl ResumeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ResumeStrategy::Checkpoint => "checkpoint",
            ResumeStrategy::Artifacts => "artifacts",
        }
    }
}

/// A session found by [`recover`].
#[derive(Debug, Clone)]
pub enum Recovered {
    Checkpoint(Checkpoint),
    Artifacts(SessionState),
}

impl Recovered {
    pub fn strategy(&self) -> ResumeStrategy {
        match self {
            Recovered::Checkpoint(_) => ResumeStrategy::Checkpoint,
            Recovered::Artifacts(_) => ResumeStrategy::Artifacts,
        }
    }

    pub fn state(&self) -> &SessionState {
        match self {
            Recovered::Checkpoint(checkpoint) => &checkpoint.state,
            Recovered::Artifacts(state) => state,
        }
    }

    /// Next node recorded by the checkpoint; artifacts carry none.
    pub fn next(&self) -> Option<GraphNode> {
        match self {
            Recovered::Checkpoint(checkpoint) => checkpoint.next,
            Recovered::Artifacts(_) => None,
        }
    }

    pub fn into_state(self) -> SessionState {
        match self {
            Recovered::Checkpoint(checkpoint) => checkpoint.state,
            Recovered::Artifacts(state) => state,
        }
    }
}

/// Latest checkpoint, else artifact reconstruction, else `None`.
pub fn recover(
    store: &dyn CheckpointStore,
    workspace: &Workspace,
    session_id: &str,
) -> Result<Option<Recovered>> {
    if let Some(checkpoint) = store.load(session_id) {
        debug!(session_id, seq = checkpoint.seq, "checkpoint found");
        return Ok(Some(Recovered::Checkpoint(checkpoint)));
    }
    Ok(reconstruct_from_artifacts(workspace, session_id)?.map(Recovered::Artifacts))
}

/// Stage implied by which artifacts exist; `None` when there are none.
pub fn infer_stage(has_prd: bool, has_design: bool, has_tasks: bool) -> Option<Stage> {
    if has_tasks {
        Some(Stage::Dev)
    } else if has_design {
        Some(Stage::Design)
    } else if has_prd {
        Some(Stage::Prd)
    } else {
        None
    }
}

/// Rebuild session state from the session directory.
///
/// Returns `None` only when the session directory does not exist.
pub fn reconstruct_from_artifacts(
    workspace: &Workspace,
    session_id: &str,
) -> Result<Option<SessionState>> {
    let paths = workspace.session(session_id);
    if !paths.exists() {
        return Ok(None);
    }

    let prd = read_optional(&paths.prd)?;
    let design = read_optional(&paths.design)?;
    let tasks = load_tasks(&paths.tasks)
        .with_context(|| format!("reconstruct session {session_id}"))?
        .unwrap_or_default();

    let mut state = SessionState::new(session_id, String::new());
    state.stage = infer_stage(prd.is_some(), design.is_some(), !tasks.is_empty())
        .unwrap_or_default();
    if let Some(prd) = prd {
        state.prd_content = Some(prd);
        state.prd_path = Some(paths.prd.clone());
        state.prd_iteration = 1;
    }
    if let Some(design) = design {
        state.design_content = Some(design);
        state.design_path = Some(paths.design.clone());
        state.design_iteration = 1;
    }
    if !tasks.is_empty() {
        state.completed_tasks = completed_ids_from_status(&tasks);
        state.tasks = tasks;
        state.tasks_path = Some(paths.tasks.clone());
    }
    if paths.code_dir.is_dir() {
        state.code_directory = Some(paths.code_dir.clone());
    }
    info!(
        session_id,
        stage = %state.stage,
        tasks = state.tasks.len(),
        completed = state.completed_tasks.len(),
        "session reconstructed from artifacts"
    );
    Ok(Some(state))
}
