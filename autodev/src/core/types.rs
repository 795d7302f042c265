//! Shared deterministic types for the workflow core.
//!
//! These types are the stable contract between the state machine, the
//! scheduler, and the persisted artifacts. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Workflow stage recorded on the session.
///
/// Stages advance `prd -> design -> dev -> done` during normal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Prd,
    Design,
    Dev,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Prd => "prd",
            Stage::Design => "design",
            Stage::Dev => "dev",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node of the fixed stage graph: PM, then architect, then the coder loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphNode {
    Pm,
    Architect,
    Coder,
}

impl GraphNode {
    pub fn as_str(self) -> &'static str {
        match self {
            GraphNode::Pm => "pm",
            GraphNode::Architect => "architect",
            GraphNode::Coder => "coder",
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a single coding task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

/// A unit of coding work produced by the architect stage.
///
/// The full list is the unit of persistence: it is rewritten wholesale on
/// every status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Ids of tasks that must complete before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Ordering hint only; never used to reorder execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// New pending task with no dependencies.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            priority: None,
            started_at: None,
            completed_at: None,
            blocked_at: None,
            duration_secs: None,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Reviewer perspective in a PRD review round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewRole {
    Product,
    Dev,
    Qa,
}

impl ReviewRole {
    pub const ALL: [ReviewRole; 3] = [ReviewRole::Product, ReviewRole::Dev, ReviewRole::Qa];

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewRole::Product => "product",
            ReviewRole::Dev => "dev",
            ReviewRole::Qa => "qa",
        }
    }

    /// Human-readable reviewer title used in prompts and review files.
    pub fn title(self) -> &'static str {
        match self {
            ReviewRole::Product => "Product Manager",
            ReviewRole::Dev => "Senior Developer",
            ReviewRole::Qa => "QA Engineer",
        }
    }
}

/// Why the dev stage stopped before exhausting the task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// No task was ready while unfinished tasks remained.
    CircularDependency { pending: Vec<String> },
    /// The coding iteration cap was reached.
    IterationCap { completed: usize, total: usize },
}
