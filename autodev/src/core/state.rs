//! Typed session state and the delta merge applied after every stage.
//!
//! Stages never mutate [`SessionState`] directly. They return a
//! [`StateDelta`] and the workflow folds it in with [`SessionState::apply`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::types::{HaltReason, ReviewRole, Stage, Task};

/// Reviewer outputs keyed by role.
///
/// Complete only once every role in [`ReviewRole::ALL`] has reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewSet {
    reviews: BTreeMap<ReviewRole, String>,
}

impl ReviewSet {
    pub fn record(&mut self, role: ReviewRole, review: String) {
        self.reviews.insert(role, review);
    }

    pub fn get(&self, role: ReviewRole) -> Option<&str> {
        self.reviews.get(&role).map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        ReviewRole::ALL
            .iter()
            .all(|role| self.reviews.contains_key(role))
    }

    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reviews.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ReviewRole, &str)> {
        self.reviews.iter().map(|(role, text)| (*role, text.as_str()))
    }

    pub fn clear(&mut self) {
        self.reviews.clear();
    }
}

/// Full state of one workflow session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub requirement: String,
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
    pub stage: Stage,

    #[serde(default)]
    pub prd_content: Option<String>,
    #[serde(default)]
    pub prd_path: Option<PathBuf>,
    #[serde(default)]
    pub prd_iteration: u32,
    #[serde(default)]
    pub prd_feedback: Option<String>,
    #[serde(default)]
    pub prd_reviews: ReviewSet,

    #[serde(default)]
    pub design_content: Option<String>,
    #[serde(default)]
    pub design_path: Option<PathBuf>,
    #[serde(default)]
    pub design_iteration: u32,
    #[serde(default)]
    pub design_feedback: Option<String>,

    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub tasks_path: Option<PathBuf>,
    #[serde(default)]
    pub current_task_index: usize,
    #[serde(default)]
    pub completed_tasks: Vec<String>,
    #[serde(default)]
    pub coding_iterations: u32,
    #[serde(default)]
    pub coding_output: Option<String>,
    #[serde(default)]
    pub code_directory: Option<PathBuf>,
    #[serde(default)]
    pub halt: Option<HaltReason>,

    #[serde(default)]
    pub human_feedback: Option<String>,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl SessionState {
    /// Fresh session at the `prd` stage.
    pub fn new(session_id: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            requirement: requirement.into(),
            project_dir: None,
            stage: Stage::Prd,
            prd_content: None,
            prd_path: None,
            prd_iteration: 0,
            prd_feedback: None,
            prd_reviews: ReviewSet::default(),
            design_content: None,
            design_path: None,
            design_iteration: 0,
            design_feedback: None,
            tasks: Vec::new(),
            tasks_path: None,
            current_task_index: 0,
            completed_tasks: Vec::new(),
            coding_iterations: 0,
            coding_output: None,
            code_directory: None,
            halt: None,
            human_feedback: None,
            messages: Vec::new(),
            error: None,
            retry_count: 0,
        }
    }

    /// Number of tasks whose status is `completed`.
    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|task| task.is_completed()).count()
    }

    /// Store resume feedback on the field the current stage reads.
    pub fn inject_feedback(&mut self, feedback: &str) {
        match self.stage {
            Stage::Prd => self.prd_feedback = Some(feedback.to_string()),
            Stage::Design => self.design_feedback = Some(feedback.to_string()),
            Stage::Dev | Stage::Done => {}
        }
        self.human_feedback = Some(feedback.to_string());
    }

    /// Fold a stage delta into the session.
    ///
    /// A delta with `stage_failed` records the error and bumps `retry_count`
    /// without touching anything else. Any other delta clears a previous
    /// stage failure unless it carries its own error.
    pub fn apply(&mut self, delta: StateDelta) {
        if delta.stage_failed {
            self.error = delta.error;
            self.retry_count += 1;
            return;
        }

        if let Some(stage) = delta.stage {
            self.stage = stage;
        }
        if let Some(content) = delta.prd_content {
            self.prd_content = Some(content);
        }
        if let Some(path) = delta.prd_path {
            self.prd_path = Some(path);
        }
        if let Some(iteration) = delta.prd_iteration {
            self.prd_iteration = iteration;
        }
        if delta.clear_prd_feedback {
            self.prd_feedback = None;
        }
        if let Some((role, review)) = delta.review {
            self.prd_reviews.record(role, review);
        }
        if delta.clear_reviews {
            self.prd_reviews.clear();
        }
        if let Some(content) = delta.design_content {
            self.design_content = Some(content);
        }
        if let Some(path) = delta.design_path {
            self.design_path = Some(path);
        }
        if let Some(iteration) = delta.design_iteration {
            self.design_iteration = iteration;
        }
        if delta.clear_design_feedback {
            self.design_feedback = None;
        }
        if let Some(tasks) = delta.tasks {
            self.tasks = tasks;
        }
        if let Some(path) = delta.tasks_path {
            self.tasks_path = Some(path);
        }
        if let Some(index) = delta.current_task_index {
            self.current_task_index = index;
        }
        if let Some(completed) = delta.completed_tasks {
            self.completed_tasks = completed;
        }
        if let Some(iterations) = delta.coding_iterations {
            self.coding_iterations = iterations;
        }
        if let Some(output) = delta.coding_output {
            self.coding_output = Some(output);
        }
        if let Some(dir) = delta.code_directory {
            self.code_directory = Some(dir);
        }
        if let Some(halt) = delta.halt {
            self.halt = Some(halt);
        }
        self.messages.extend(delta.messages);

        match delta.error {
            Some(error) => self.error = Some(error),
            None => {
                self.error = None;
                self.retry_count = 0;
            }
        }
    }
}

/// Partial update produced by one stage execution.
///
/// `None` fields leave the session untouched. Feedback and reviews are
/// cleared through explicit flags since `None` already means "unchanged".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub stage: Option<Stage>,
    pub prd_content: Option<String>,
    pub prd_path: Option<PathBuf>,
    pub prd_iteration: Option<u32>,
    pub clear_prd_feedback: bool,
    pub review: Option<(ReviewRole, String)>,
    pub clear_reviews: bool,
    pub design_content: Option<String>,
    pub design_path: Option<PathBuf>,
    pub design_iteration: Option<u32>,
    pub clear_design_feedback: bool,
    pub tasks: Option<Vec<Task>>,
    pub tasks_path: Option<PathBuf>,
    pub current_task_index: Option<usize>,
    pub completed_tasks: Option<Vec<String>>,
    pub coding_iterations: Option<u32>,
    pub coding_output: Option<String>,
    pub code_directory: Option<PathBuf>,
    pub halt: Option<HaltReason>,
    /// Trace entries appended to the session message log.
    pub messages: Vec<String>,
    /// Error recorded on the session (stage failure or task failure).
    pub error: Option<String>,
    /// True when the stage itself failed and the rest of the delta is empty.
    pub stage_failed: bool,
}

impl StateDelta {
    /// Delta for a stage that failed at its boundary.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            stage_failed: true,
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
}
