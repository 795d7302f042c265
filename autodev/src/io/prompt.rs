//! Prompt templates for the generative stages and the coding assistant.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::state::ReviewSet;
use crate::core::types::{ReviewRole, Task};

const TEMPLATES: [(&str, &str); 9] = [
    ("pm_system", include_str!("prompts/pm_system.md")),
    ("pm", include_str!("prompts/pm.md")),
    ("pm_revision", include_str!("prompts/pm_revision.md")),
    ("pm_review_revision", include_str!("prompts/pm_review_revision.md")),
    ("architect_system", include_str!("prompts/architect_system.md")),
    ("architect", include_str!("prompts/architect.md")),
    ("reviewer_system", include_str!("prompts/reviewer_system.md")),
    ("reviewer", include_str!("prompts/reviewer.md")),
    ("coder", include_str!("prompts/coder.md")),
];

#[derive(Debug, Serialize)]
struct ReviewContext<'a> {
    role: &'static str,
    title: &'static str,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct TaskContext<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self { env })
    }

    fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("prompt template {name}"))?;
        let rendered = template
            .render(ctx)
            .with_context(|| format!("render prompt template {name}"))?;
        Ok(rendered.trim().to_string())
    }

    pub fn pm_system(&self) -> Result<String> {
        self.render("pm_system", context! {})
    }

    /// First draft, optionally steered by feedback given before any PRD existed.
    pub fn pm_initial(&self, requirement: &str, feedback: Option<&str>) -> Result<String> {
        self.render(
            "pm",
            context! {
                requirement => requirement.trim(),
                feedback => non_empty(feedback),
            },
        )
    }

    pub fn pm_revision(&self, prd: &str, feedback: &str) -> Result<String> {
        self.render(
            "pm_revision",
            context! { prd => prd.trim(), feedback => feedback.trim() },
        )
    }

    pub fn pm_review_revision(&self, prd: &str, reviews: &ReviewSet) -> Result<String> {
        let reviews: Vec<ReviewContext<'_>> = reviews
            .iter()
            .map(|(role, text)| ReviewContext {
                role: role.as_str(),
                title: role.title(),
                text: text.trim(),
            })
            .collect();
        self.render(
            "pm_review_revision",
            context! { prd => prd.trim(), reviews => reviews },
        )
    }

    pub fn architect_system(&self) -> Result<String> {
        self.render("architect_system", context! {})
    }

    pub fn architect(
        &self,
        prd: &str,
        prd_path: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<String> {
        self.render(
            "architect",
            context! {
                prd => prd.trim(),
                prd_path => prd_path,
                feedback => non_empty(feedback),
            },
        )
    }

    pub fn reviewer_system(&self, role: ReviewRole) -> Result<String> {
        self.render(
            "reviewer_system",
            context! { role => role.as_str(), title => role.title() },
        )
    }

    pub fn reviewer(&self, prd: &str) -> Result<String> {
        self.render("reviewer", context! { prd => prd.trim() })
    }

    /// Non-interactive task prompt for the coding assistant.
    pub fn coder(&self, task: &Task, design: Option<&str>, feedback: Option<&str>) -> Result<String> {
        self.render(
            "coder",
            context! {
                task => TaskContext {
                    id: &task.id,
                    title: &task.title,
                    description: task.description.trim(),
                },
                design => non_empty(design),
                feedback => non_empty(feedback),
            },
        )
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
