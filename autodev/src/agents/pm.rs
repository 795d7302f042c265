//! Product Manager stage: requirement in, PRD out.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::agents::{GenerativeStage, StageContext};
use crate::core::documents::validate_prd;
use crate::core::state::{SessionState, StateDelta};
use crate::core::types::Stage;
use crate::io::config::ModelConfig;
use crate::io::workspace::write_text;

/// Which prompt the PM stage uses for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmMode {
    Initial,
    /// Revise the current PRD against human feedback.
    FeedbackRevision,
    /// Revise the current PRD against a complete review round.
    ReviewRevision,
}

pub fn pm_mode(state: &SessionState) -> PmMode {
    if state.prd_iteration == 0 || state.prd_content.is_none() {
        return PmMode::Initial;
    }
    if state.prd_reviews.is_complete() {
        return PmMode::ReviewRevision;
    }
    if state
        .prd_feedback
        .as_deref()
        .is_some_and(|feedback| !feedback.trim().is_empty())
    {
        return PmMode::FeedbackRevision;
    }
    PmMode::Initial
}

pub struct PmStage<'a> {
    ctx: StageContext<'a>,
}

impl<'a> PmStage<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx }
    }
}

impl GenerativeStage for PmStage<'_> {
    fn name(&self) -> String {
        "PM_Agent".to_string()
    }

    fn model(&self) -> &ModelConfig {
        &self.ctx.config.models.pm
    }

    fn system_prompt(&self) -> Result<String> {
        self.ctx.prompts.pm_system()
    }

    fn build_prompt(&self, state: &SessionState) -> Result<String> {
        let prompts = self.ctx.prompts;
        let prd = state.prd_content.as_deref().unwrap_or_default();
        let mode = pm_mode(state);
        info!(mode = ?mode, iteration = state.prd_iteration, "building PRD prompt");
        match mode {
            PmMode::ReviewRevision => prompts.pm_review_revision(prd, &state.prd_reviews),
            PmMode::FeedbackRevision => {
                prompts.pm_revision(prd, state.prd_feedback.as_deref().unwrap_or_default())
            }
            PmMode::Initial => {
                prompts.pm_initial(&state.requirement, state.prd_feedback.as_deref())
            }
        }
    }

    fn parse(&self, response: &str, state: &SessionState) -> Result<StateDelta> {
        let content = response.trim();
        if content.is_empty() {
            anyhow::bail!("PM response was empty");
        }
        for warning in validate_prd(content) {
            warn!(%warning, "PRD validation");
        }

        let path = self.ctx.workspace.session(&state.session_id).prd;
        write_text(&path, &format!("{content}\n")).context("save PRD")?;
        info!(path = %path.display(), "PRD saved");

        Ok(StateDelta {
            stage: Some(Stage::Prd),
            prd_content: Some(content.to_string()),
            prd_path: Some(path),
            prd_iteration: Some(state.prd_iteration + 1),
            clear_prd_feedback: true,
            clear_reviews: true,
            ..StateDelta::default()
        })
    }
}
