//! Architect stage: PRD in, design document plus task graph out.

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::agents::{GenerativeStage, StageContext};
use crate::core::documents::validate_design;
use crate::core::extract::{DesignParser, HeuristicDesignParser};
use crate::core::state::{SessionState, StateDelta};
use crate::core::task_graph::{graph_violations, graph_warnings};
use crate::core::types::Stage;
use crate::error::MalformedTaskGraph;
use crate::io::config::ModelConfig;
use crate::io::task_store::write_tasks;
use crate::io::workspace::write_text;

pub struct ArchitectStage<'a> {
    ctx: StageContext<'a>,
    parser: Box<dyn DesignParser + 'a>,
}

impl<'a> ArchitectStage<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self::with_parser(ctx, Box::new(HeuristicDesignParser))
    }

    pub fn with_parser(ctx: StageContext<'a>, parser: Box<dyn DesignParser + 'a>) -> Self {
        Self { ctx, parser }
    }
}

impl GenerativeStage for ArchitectStage<'_> {
    fn name(&self) -> String {
        "Architect_Agent".to_string()
    }

    fn model(&self) -> &ModelConfig {
        &self.ctx.config.models.architect
    }

    fn system_prompt(&self) -> Result<String> {
        self.ctx.prompts.architect_system()
    }

    fn build_prompt(&self, state: &SessionState) -> Result<String> {
        let prd = state
            .prd_content
            .as_deref()
            .filter(|prd| !prd.trim().is_empty())
            .ok_or_else(|| anyhow!("no PRD available for session {}", state.session_id))?;
        let prd_path = state.prd_path.as_ref().map(|path| path.display().to_string());
        self.ctx
            .prompts
            .architect(prd, prd_path.as_deref(), state.design_feedback.as_deref())
    }

    fn parse(&self, response: &str, state: &SessionState) -> Result<StateDelta> {
        let parsed = self.parser.parse(response)?;
        info!(tasks = parsed.tasks.len(), source = ?parsed.source, "design parsed");
        for warning in validate_design(&parsed.design) {
            warn!(%warning, "design validation");
        }

        let violations = graph_violations(&parsed.tasks);
        if !violations.is_empty() {
            return Err(MalformedTaskGraph { violations }.into());
        }
        for warning in graph_warnings(&parsed.tasks) {
            warn!(%warning, "task graph");
        }

        let paths = self.ctx.workspace.session(&state.session_id);
        write_text(&paths.design, &format!("{}\n", parsed.design.trim())).context("save design")?;
        write_tasks(&paths.tasks, &parsed.tasks).context("save tasks")?;
        info!(design = %paths.design.display(), tasks = %paths.tasks.display(), "design saved");

        Ok(StateDelta {
            stage: Some(Stage::Design),
            design_content: Some(parsed.design),
            design_path: Some(paths.design),
            design_iteration: Some(state.design_iteration + 1),
            clear_design_feedback: true,
            tasks: Some(parsed.tasks),
            tasks_path: Some(paths.tasks),
            current_task_index: Some(0),
            completed_tasks: Some(Vec::new()),
            coding_iterations: Some(0),
            ..StateDelta::default()
        })
    }
}
