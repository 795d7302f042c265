//! Text extraction for architect responses.
//!
//! The architect returns free-form markdown that should contain a task list.
//! [`DesignParser`] turns that text into a design document plus tasks; the
//! rest of the crate only sees [`ParsedDesign`].

use std::sync::LazyLock;

use jsonschema::validator_for;
use regex::Regex;
use serde_json::Value;

use crate::core::types::{Task, TaskStatus};

/// JSON Schema for the persisted task list.
pub const TASKS_SCHEMA: &str = include_str!("../../schemas/tasks.schema.json");

/// Where the parsed task list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSource {
    /// First fenced `json` block.
    JsonBlock,
    /// Fenced block introduced by `tasks.json`.
    TasksFile,
    /// Bare JSON array found anywhere in the response.
    JsonArray,
    /// `- **Task N:** title` bullets.
    Markdown,
    /// Nothing usable; generic placeholder tasks.
    Fallback,
}

/// Design document and task list split out of one response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDesign {
    pub design: String,
    pub tasks: Vec<Task>,
    pub source: TaskSource,
}

/// The response could not be turned into a design at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("design parse failure: {0}")]
pub struct ParseFailure(pub String);

/// Turns architect output into a [`ParsedDesign`].
pub trait DesignParser {
    fn parse(&self, response: &str) -> Result<ParsedDesign, ParseFailure>;
}

/// Regex-based parser with a fallback chain ending in placeholder tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicDesignParser;

impl DesignParser for HeuristicDesignParser {
    fn parse(&self, response: &str) -> Result<ParsedDesign, ParseFailure> {
        if response.trim().is_empty() {
            return Err(ParseFailure("empty response".to_string()));
        }

        let (design, block) = split_design_and_tasks(response);
        if let Some((json, source)) = block {
            match parse_task_list(&json) {
                Ok(tasks) => {
                    return Ok(ParsedDesign {
                        design,
                        tasks,
                        source,
                    });
                }
                Err(err) => tracing::warn!(error = %err, "task block rejected, trying flexible extraction"),
            }
        }

        let (tasks, source) = extract_tasks_flexible(response);
        Ok(ParsedDesign {
            design,
            tasks,
            source,
        })
    }
}

static JSON_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```").unwrap());

static TASKS_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)tasks\.json[:\s]*```(?:json)?[ \t]*\r?\n(.*?)```").unwrap()
});

static JSON_ARRAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[\s*\{.*?\}\s*\]").unwrap());

static TASK_BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\*\*Task\s+(\d+)[:\s]*\*\*(.*)$").unwrap());

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[-*]\s").unwrap());

/// Split a response into design text and an optional raw task block.
///
/// The first fenced `json` block wins and every `json` block is stripped from
/// the design. Otherwise a fenced block after `tasks.json` is used and the
/// design is everything before it.
pub fn split_design_and_tasks(response: &str) -> (String, Option<(String, TaskSource)>) {
    if let Some(caps) = JSON_BLOCK_RE.captures(response) {
        let json = caps[1].trim().to_string();
        let design = JSON_BLOCK_RE.replace_all(response, "").trim().to_string();
        return (design, Some((json, TaskSource::JsonBlock)));
    }
    if let Some(caps) = TASKS_FILE_RE.captures(response) {
        let start = caps.get(0).map_or(0, |m| m.start());
        let json = caps[1].trim().to_string();
        let design = response[..start].trim().to_string();
        return (design, Some((json, TaskSource::TasksFile)));
    }
    (response.to_string(), None)
}

/// Parse a JSON task list and check it against [`TASKS_SCHEMA`].
///
/// Graph-level problems (unknown dependencies, duplicate ids) are left to
/// [`crate::core::task_graph::graph_violations`].
pub fn parse_task_list(json: &str) -> Result<Vec<Task>, String> {
    let value: Value = serde_json::from_str(json).map_err(|err| format!("invalid JSON: {err}"))?;
    validate_task_schema(&value)?;
    let tasks: Vec<Task> =
        serde_json::from_value(value).map_err(|err| format!("invalid task list: {err}"))?;
    if tasks.is_empty() {
        return Err("task list is empty".to_string());
    }
    Ok(tasks)
}

/// Validate a JSON value against the task-list schema.
pub fn validate_task_schema(value: &Value) -> Result<(), String> {
    let schema: Value =
        serde_json::from_str(TASKS_SCHEMA).map_err(|err| format!("parse task schema: {err}"))?;
    let validator = validator_for(&schema).map_err(|err| format!("invalid task schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(format!("schema validation failed: {}", messages.join("; ")))
    }
}

/// Recover tasks from a response with no usable task block.
pub fn extract_tasks_flexible(response: &str) -> (Vec<Task>, TaskSource) {
    if let Some(found) = JSON_ARRAY_RE.find(response)
        && let Ok(tasks) = parse_task_list(found.as_str())
    {
        return (tasks, TaskSource::JsonArray);
    }

    let tasks = markdown_tasks(response);
    if !tasks.is_empty() {
        tracing::info!(count = tasks.len(), "extracted tasks from markdown bullets");
        return (tasks, TaskSource::Markdown);
    }

    tracing::warn!("could not extract tasks, using placeholder tasks");
    (fallback_tasks(), TaskSource::Fallback)
}

/// Parse `- **Task N:** title` bullets.
///
/// Lines after a bullet, up to the next bullet or blank line, form its
/// description. Earlier bullets get higher priority.
pub fn markdown_tasks(response: &str) -> Vec<Task> {
    let lines: Vec<&str> = response.lines().collect();
    let mut tasks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let Some(caps) = TASK_BULLET_RE.captures(lines[i]) else {
            i += 1;
            continue;
        };
        let number: u32 = caps[1].parse().unwrap_or(0);
        let mut body: Vec<&str> = Vec::new();
        let head = caps[2].trim();
        if !head.is_empty() {
            body.push(head);
        }
        i += 1;
        while i < lines.len() && !lines[i].trim().is_empty() && !BULLET_RE.is_match(lines[i]) {
            body.push(lines[i].trim());
            i += 1;
        }

        let title = body
            .first()
            .map_or_else(|| format!("Task {number}"), |t| (*t).to_string());
        let rest = body.get(1..).unwrap_or_default().join("\n");
        let description = if rest.is_empty() {
            body.join("\n")
        } else {
            rest
        };
        let mut task = Task::new(format!("task_{number:03}"), title);
        task.description = description;
        task.priority = Some(10 - tasks.len() as i64);
        tasks.push(task);
    }
    tasks
}

/// Placeholder tasks used when nothing could be extracted.
pub fn fallback_tasks() -> Vec<Task> {
    let mut review = Task::new("task_001", "Review Design Document");
    review.description = "Review the technical design document before implementation".to_string();
    review.priority = Some(10);

    let mut implement = Task::new("task_002", "Implement Core Features");
    implement.description = "Implement the core features as specified in the design".to_string();
    implement.dependencies = vec!["task_001".to_string()];
    implement.status = TaskStatus::Pending;
    implement.priority = Some(9);

    vec![review, implement]
}
