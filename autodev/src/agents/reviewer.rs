//! PRD reviewers: one stage per [`ReviewRole`].

use anyhow::{Result, anyhow, bail};
use tracing::info;

use crate::agents::{GenerativeStage, StageContext};
use crate::core::state::{ReviewSet, SessionState, StateDelta};
use crate::core::types::ReviewRole;
use crate::io::config::ModelConfig;

pub struct ReviewerStage<'a> {
    ctx: StageContext<'a>,
    role: ReviewRole,
}

impl<'a> ReviewerStage<'a> {
    pub fn new(ctx: StageContext<'a>, role: ReviewRole) -> Self {
        Self { ctx, role }
    }
}

impl GenerativeStage for ReviewerStage<'_> {
    fn name(&self) -> String {
        format!("PRD_Reviewer_{}", self.role.as_str().to_ascii_uppercase())
    }

    fn model(&self) -> &ModelConfig {
        &self.ctx.config.models.reviewer
    }

    fn system_prompt(&self) -> Result<String> {
        self.ctx.prompts.reviewer_system(self.role)
    }

    fn build_prompt(&self, state: &SessionState) -> Result<String> {
        let prd = state
            .prd_content
            .as_deref()
            .ok_or_else(|| anyhow!("no PRD to review for session {}", state.session_id))?;
        self.ctx.prompts.reviewer(prd)
    }

    fn parse(&self, response: &str, _state: &SessionState) -> Result<StateDelta> {
        let review = response.trim();
        if review.is_empty() {
            bail!("{} review was empty", self.role.title());
        }
        info!(role = self.role.as_str(), chars = review.len(), "review recorded");
        Ok(StateDelta {
            review: Some((self.role, review.to_string())),
            ..StateDelta::default()
        })
    }
}

/// Markdown rendering of a review round for `PRD_reviews.md`.
pub fn format_reviews(reviews: &ReviewSet) -> String {
    let mut out = String::from("# PRD Reviews\n");
    for (role, text) in reviews.iter() {
        out.push_str(&format!("\n## {} Review\n\n{}\n", role.title(), text.trim()));
    }
    out
}
