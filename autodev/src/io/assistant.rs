//! Coding-assistant subprocess collaborator.
//!
//! The [`CodingAssistant`] trait decouples the coder stage from the actual
//! backend (the `claude` CLI). Tests use scripted assistants that return
//! predetermined outputs without spawning processes.
//!
//! [`execute_with_retry`] is the retry boundary: it judges each attempt by
//! exit code and the output policy, retries with a fixed delay, and turns
//! exhaustion into a [`ToolExecutionError`].

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::output_policy::{ValidationMode, judge_output};
use crate::error::ToolExecutionError;
use crate::io::config::AssistantConfig;
use crate::io::process::{CommandOutput, RunOptions, run_command_streaming};

/// Parameters for one assistant invocation.
#[derive(Debug, Clone)]
pub struct AssistantRequest {
    /// Working directory for the assistant process.
    pub workdir: PathBuf,
    /// Extra directories the assistant may read and write.
    pub extra_dirs: Vec<PathBuf>,
    pub prompt: String,
    /// Where to write the stdout/stderr log of the last attempt.
    pub log_path: Option<PathBuf>,
}

/// Raw result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantRun {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl AssistantRun {
    fn combined_output(&self) -> String {
        if self.stderr.trim().is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Abstraction over coding-assistant backends.
pub trait CodingAssistant {
    /// Run the assistant once. `Err` means it could not be run at all.
    fn invoke(&self, request: &AssistantRequest) -> Result<AssistantRun>;
}

/// Assistant that spawns the `claude` CLI with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    program: String,
    args: Vec<String>,
    model: Option<String>,
    run_options: RunOptions,
}

impl ClaudeCli {
    pub fn new(config: &AssistantConfig, model: Option<String>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            model,
            run_options: RunOptions {
                label: "assistant".to_string(),
                timeout: Duration::from_secs(config.timeout_secs),
                output_limit_bytes: config.output_limit_bytes,
                stream_lines: config.stream_output,
                heartbeat: Some(Duration::from_secs(config.heartbeat_interval_secs)),
            },
        }
    }

    fn command(&self, request: &AssistantRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for dir in &request.extra_dirs {
            cmd.arg("--add-dir").arg(dir);
        }
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(&request.workdir);
        cmd
    }
}

impl CodingAssistant for ClaudeCli {
    #[instrument(skip_all, fields(program = %self.program, workdir = %request.workdir.display()))]
    fn invoke(&self, request: &AssistantRequest) -> Result<AssistantRun> {
        fs::create_dir_all(&request.workdir)
            .with_context(|| format!("create workdir {}", request.workdir.display()))?;
        info!("starting coding assistant");

        let output = run_command_streaming(
            self.command(request),
            Some(request.prompt.as_bytes()),
            &self.run_options,
        )
        .with_context(|| format!("run {}", self.program))?;

        if let Some(path) = &request.log_path {
            write_assistant_log(path, &output)?;
        }

        Ok(AssistantRun {
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}

/// Retry bound and output policy for [`execute_with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub delay: Duration,
    pub mode: ValidationMode,
}

impl RetryPolicy {
    pub fn from_config(config: &AssistantConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: Duration::from_millis(config.retry_delay_ms),
            mode: config.validation_mode,
        }
    }
}

/// Successful assistant execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReport {
    pub output: String,
    pub attempts: u32,
    /// Why the output policy accepted the run.
    pub verdict: String,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
}

/// Run the assistant until an attempt passes or retries run out.
///
/// An attempt fails when the process cannot be spawned, times out, exits
/// non-zero, or its output fails the policy.
#[instrument(skip_all, fields(max_retries = policy.max_retries, mode = ?policy.mode))]
pub fn execute_with_retry<A: CodingAssistant + ?Sized>(
    assistant: &A,
    request: &AssistantRequest,
    policy: &RetryPolicy,
) -> Result<AssistantReport, ToolExecutionError> {
    let total = policy.max_retries + 1;
    let mut last_reason = String::new();
    let mut last_output = String::new();

    for attempt in 1..=total {
        match assistant.invoke(request) {
            Ok(run) => {
                let output = run.combined_output();
                match judge_run(&run, &output, policy.mode) {
                    Ok(verdict) => {
                        debug!(attempt, verdict = %verdict, "assistant attempt passed");
                        return Ok(AssistantReport {
                            files_created: mentioned_files(&output, &CREATED_RE),
                            files_modified: mentioned_files(&output, &MODIFIED_RE),
                            output,
                            attempts: attempt,
                            verdict,
                        });
                    }
                    Err(reason) => {
                        warn!(attempt, total, reason = %reason, "assistant attempt failed");
                        last_reason = reason;
                        last_output = output;
                    }
                }
            }
            Err(err) => {
                warn!(attempt, total, error = %format!("{err:#}"), "assistant could not run");
                last_reason = format!("{err:#}");
                last_output.clear();
            }
        }
        if attempt < total && !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
    }

    Err(ToolExecutionError {
        attempts: total,
        reason: last_reason,
        output: last_output,
    })
}

fn judge_run(run: &AssistantRun, output: &str, mode: ValidationMode) -> Result<String, String> {
    if run.timed_out {
        return Err("timed out".to_string());
    }
    match run.exit_code {
        Some(0) => {}
        Some(code) => return Err(format!("exited with code {code}")),
        None => return Err("terminated by signal".to_string()),
    }
    let verdict = judge_output(output, mode);
    if verdict.success {
        Ok(verdict.reason)
    } else {
        Err(verdict.reason)
    }
}

static CREATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:created|wrote|written)\s+(?:file\s+|to\s+)?`?([\w./-]+\.\w+)`?").unwrap()
});

static MODIFIED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:modified|updated|edited)\s+(?:file\s+)?`?([\w./-]+\.\w+)`?").unwrap()
});

fn mentioned_files(output: &str, re: &Regex) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for caps in re.captures_iter(output) {
        let file = caps[1].to_string();
        if !files.contains(&file) {
            files.push(file);
        }
    }
    files
}

fn write_assistant_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create assistant log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_lossy());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_lossy());
    buf.push_str(&output.truncated_notice("assistant"));
    if output.timed_out {
        buf.push_str("\n[assistant timed out]\n");
    }
    buf.push_str(&format!(
        "\n[exit code {:?}, {} ms]\n",
        output.status.code(),
        output.elapsed.as_millis()
    ));
    fs::write(path, buf).with_context(|| format!("write assistant log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAssistant, assistant_ok};

    fn request(dir: &Path) -> AssistantRequest {
        AssistantRequest {
            workdir: dir.to_path_buf(),
            extra_dirs: Vec::new(),
            prompt: "do it".to_string(),
            log_path: None,
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay: Duration::ZERO,
            mode: ValidationMode::Lenient,
        }
    }

    /// Retries past a non-zero exit and reports the attempt that passed.
    #[test]
    fn retries_until_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let assistant = ScriptedAssistant::new(vec![
            Ok(AssistantRun {
                stdout: "boom".to_string(),
                stderr: String::new(),
                exit_code: Some(1),
                timed_out: false,
            }),
            Ok(assistant_ok("Created file src/lib.rs and modified Cargo.toml. Completed.")),
        ]);

        let report = execute_with_retry(&assistant, &request(temp.path()), &policy(2)).expect("ok");
        assert_eq!(report.attempts, 2);
        assert_eq!(report.files_created, vec!["src/lib.rs".to_string()]);
        assert_eq!(report.files_modified, vec!["Cargo.toml".to_string()]);
        assistant.assert_drained().expect("drained");
    }

    #[test]
    fn exhausted_retries_surface_tool_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let assistant = ScriptedAssistant::new(vec![
            Ok(AssistantRun {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                timed_out: true,
            }),
            Err("spawn failed".to_string()),
        ]);

        let err = execute_with_retry(&assistant, &request(temp.path()), &policy(1)).unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.reason.contains("spawn failed"), "{}", err.reason);
    }

    /// Exit code zero is not enough when the output shows a critical error.
    #[test]
    fn policy_rejects_critical_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let assistant = ScriptedAssistant::new(vec![Ok(assistant_ok(
            "python: can't open file: No such file or directory",
        ))]);

        let err = execute_with_retry(&assistant, &request(temp.path()), &policy(0)).unwrap_err();
        assert!(err.reason.contains("critical error"));
        assert!(err.output.contains("No such file"));
    }

    #[cfg(unix)]
    #[test]
    fn claude_cli_runs_configured_program() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AssistantConfig {
            program: "cat".to_string(),
            args: Vec::new(),
            ..AssistantConfig::default()
        };
        let cli = ClaudeCli::new(&config, None);
        let log_path = temp.path().join("logs/task.log");
        let run = cli
            .invoke(&AssistantRequest {
                log_path: Some(log_path.clone()),
                prompt: "Implemented the feature".to_string(),
                ..request(&temp.path().join("code"))
            })
            .expect("invoke");
        assert_eq!(run.stdout, "Implemented the feature");
        assert_eq!(run.exit_code, Some(0));
        assert!(log_path.exists());
        assert!(temp.path().join("code").is_dir());
    }
}
