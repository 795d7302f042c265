//! Stage execution contract.
//!
//! A stage never fails outward. [`run_generative`] and [`run_tool`] catch
//! every error at the boundary and return a [`StateDelta`] whose `error` is
//! set; on success they append one trace entry to the message log.

use anyhow::Result;
use tracing::{error, info, instrument};

use crate::core::state::{SessionState, StateDelta};
use crate::io::config::{AutodevConfig, ModelConfig};
use crate::io::llm::{LlmClient, LlmRequest};
use crate::io::prompt::PromptEngine;
use crate::io::workspace::Workspace;

pub mod architect;
pub mod coder;
pub mod pm;
pub mod reviewer;

pub use architect::ArchitectStage;
pub use coder::CoderStage;
pub use pm::PmStage;
pub use reviewer::ReviewerStage;

/// Shared, read-only collaborators every stage needs.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub config: &'a AutodevConfig,
    pub workspace: &'a Workspace,
    pub prompts: &'a PromptEngine,
}

/// Stage that asks the LLM for text and turns it into a delta.
pub trait GenerativeStage {
    /// Name used in trace entries, e.g. `PM_Agent`.
    fn name(&self) -> String;
    fn model(&self) -> &ModelConfig;
    fn system_prompt(&self) -> Result<String>;
    fn build_prompt(&self, state: &SessionState) -> Result<String>;
    fn parse(&self, response: &str, state: &SessionState) -> Result<StateDelta>;
}

/// Stage that drives an external tool and reports a delta.
pub trait ToolStage {
    fn name(&self) -> String;
    fn execute(&self, state: &SessionState) -> Result<StateDelta>;
}

/// Build, invoke, and parse with errors contained in the delta.
#[instrument(skip_all, fields(stage = %stage.name(), session_id = %state.session_id))]
pub fn run_generative<S: GenerativeStage + ?Sized>(
    stage: &S,
    llm: &dyn LlmClient,
    state: &SessionState,
) -> StateDelta {
    info!("stage started");
    let result = (|| -> Result<StateDelta> {
        let request = LlmRequest {
            model: stage.model().clone(),
            system: stage.system_prompt()?,
            history: Vec::new(),
            prompt: stage.build_prompt(state)?,
        };
        let response = llm.complete(&request)?;
        stage.parse(&response, state)
    })();
    contain(stage.name(), result)
}

/// Execute a tool stage with errors contained in the delta.
#[instrument(skip_all, fields(stage = %stage.name(), session_id = %state.session_id))]
pub fn run_tool<S: ToolStage + ?Sized>(stage: &S, state: &SessionState) -> StateDelta {
    info!("stage started");
    contain(stage.name(), stage.execute(state))
}

fn contain(name: String, result: Result<StateDelta>) -> StateDelta {
    match result {
        Ok(delta) => {
            info!("stage completed");
            delta.with_message(format!("[{name}] Completed successfully"))
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "stage failed");
            StateDelta::failed(format!("Execution failed: {err:#}"))
        }
    }
}
