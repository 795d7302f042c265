//! Typed failures that callers match on.
//!
//! Plumbing errors travel as `anyhow::Error`; these types are attached at
//! the boundaries that need to tell failures apart and can be recovered with
//! `downcast_ref`.

use std::time::Duration;

/// The LLM collaborator failed.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("LLM request timed out after {0:?}")]
    Timeout(Duration),
    #[error("LLM authentication failed (HTTP {status})")]
    Auth { status: u16 },
    #[error("LLM rate limited (HTTP 429)")]
    RateLimited,
    #[error("LLM API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },
    #[error("LLM transport error: {0}")]
    Transport(String),
    #[error("LLM returned no text content")]
    EmptyResponse,
    #[error("ANTHROPIC_API_KEY is not set")]
    MissingApiKey,
}

/// The coding assistant failed after exhausting its retries.
#[derive(Debug, thiserror::Error)]
#[error("coding assistant failed after {attempts} attempt(s): {reason}")]
pub struct ToolExecutionError {
    pub attempts: u32,
    pub reason: String,
    /// Output of the last attempt, kept for the task log.
    pub output: String,
}

/// A task list that cannot be scheduled.
#[derive(Debug, thiserror::Error)]
#[error("malformed task graph: {}", violations.join("; "))]
pub struct MalformedTaskGraph {
    pub violations: Vec<String>,
}

/// No task is ready while unfinished tasks remain.
#[derive(Debug, thiserror::Error)]
#[error("No tasks ready to execute - possible circular dependencies (pending: {})", pending.join(", "))]
pub struct CircularDependencyStall {
    pub pending: Vec<String>,
}
