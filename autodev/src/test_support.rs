//! Test-only builders and scripted collaborators.
//!
//! Enabled for unit tests and, through the `test-support` feature, for the
//! integration tests under `tests/`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Result, anyhow, bail};

use crate::core::types::Task;
use crate::error::ProviderError;
use crate::io::assistant::{AssistantRequest, AssistantRun, CodingAssistant};
use crate::io::config::AutodevConfig;
use crate::io::llm::{LlmClient, LlmRequest};

/// Deterministic pending task with the given dependencies.
pub fn task(id: &str, deps: &[&str]) -> Task {
    let mut task = Task::new(id, format!("{id} title"));
    task.description = format!("{id} description");
    task.dependencies = deps.iter().map(|dep| dep.to_string()).collect();
    task
}

/// Config rooted in a temp dir: no retries, no delays, file checkpoints.
pub fn test_config(root: &Path) -> AutodevConfig {
    let mut config = AutodevConfig {
        workspace_root: root.join("workspace"),
        data_root: root.join("data"),
        ..AutodevConfig::default()
    };
    config.assistant.max_retries = 0;
    config.assistant.retry_delay_ms = 0;
    config.assistant.stream_output = false;
    config
}

/// LLM client that replays queued responses and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: RefCell<VecDeque<Result<String, ProviderError>>>,
    requests: RefCell<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Queue of successful responses.
    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|text| Ok(text.to_string())).collect())
    }

    pub fn push(&self, response: Result<String, ProviderError>) {
        self.responses.borrow_mut().push_back(response);
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.borrow().clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let left = self.responses.borrow().len();
        if left > 0 {
            bail!("{left} scripted LLM response(s) unused");
        }
        Ok(())
    }
}

impl LlmClient for ScriptedLlm {
    fn complete(&self, request: &LlmRequest) -> Result<String, ProviderError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("scripted LLM exhausted".to_string())))
    }
}

/// Coding assistant that replays queued runs; `Err` entries fail to spawn.
#[derive(Default)]
pub struct ScriptedAssistant {
    runs: RefCell<VecDeque<Result<AssistantRun, String>>>,
    requests: RefCell<Vec<AssistantRequest>>,
}

impl ScriptedAssistant {
    pub fn new(runs: Vec<Result<AssistantRun, String>>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, run: Result<AssistantRun, String>) {
        self.runs.borrow_mut().push_back(run);
    }

    pub fn requests(&self) -> Vec<AssistantRequest> {
        self.requests.borrow().clone()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let left = self.runs.borrow().len();
        if left > 0 {
            bail!("{left} scripted assistant run(s) unused");
        }
        Ok(())
    }
}

impl CodingAssistant for ScriptedAssistant {
    fn invoke(&self, request: &AssistantRequest) -> Result<AssistantRun> {
        self.requests.borrow_mut().push(request.clone());
        match self.runs.borrow_mut().pop_front() {
            Some(Ok(run)) => Ok(run),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted assistant exhausted")),
        }
    }
}

/// Successful run with the given stdout.
pub fn assistant_ok(stdout: &str) -> AssistantRun {
    AssistantRun {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
        timed_out: false,
    }
}

/// Run that exits with `code`.
pub fn assistant_exit(code: i32, stderr: &str) -> AssistantRun {
    AssistantRun {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
        timed_out: false,
    }
}

/// PRD text that passes every structural check.
pub const SAMPLE_PRD: &str = "# Todo CLI PRD

## Overview
A command line todo manager that stores items in a local JSON file and supports tagging.

## User Stories
- As a developer, I want to add todos from the terminal so that I do not leave my shell.
- As a developer, I want to list open todos so that I can plan my day.

Acceptance criteria: adding prints the new id; listing shows open items only.

## Functional Requirements
1. `add <text>` stores a todo.
2. `list` prints open todos.
3. `done <id>` closes a todo.

## Non-Functional Requirements
Commands finish in under 100 ms for 10k items.

## Success Metrics
Daily active use by the team within two weeks.
";

/// Architect response whose task list is the given JSON array.
pub fn design_response(tasks_json: &str) -> String {
    format!(
        "# Design\n\n## Architecture Overview\nSingle binary.\n\n## System Design\nStore module plus CLI module.\n\n## Technology Stack\nRust.\n\n## Data Model\nTodo {{ id, text, done }}.\n\n## File Structure\nsrc/main.rs, src/store.rs\n\n## Implementation Approach\nBuild the store first.\n\n```json\n{tasks_json}\n```\n"
    )
}

/// Two-task chain `t1 <- t2` as architect JSON.
pub const CHAIN_TASKS_JSON: &str = r#"[
  {"id": "t1", "title": "Store", "description": "JSON file store", "dependencies": [], "status": "pending", "priority": 1},
  {"id": "t2", "title": "CLI", "description": "clap commands", "dependencies": ["t1"], "status": "pending", "priority": 2}
]"#;
