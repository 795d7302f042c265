//! Workflow configuration: `autodev.toml` plus environment overrides.
//!
//! The config is loaded once in `main` and passed by reference to every
//! component that needs it.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::output_policy::ValidationMode;

/// Default config file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "autodev.toml";

/// Top-level configuration (TOML).
///
/// Missing fields default to the values in the `Default` impls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutodevConfig {
    /// Root under which each session gets `<session_id>/`.
    pub workspace_root: PathBuf,
    /// Root for checkpoint logs.
    pub data_root: PathBuf,
    pub llm: LlmConfig,
    pub models: ModelsConfig,
    pub assistant: AssistantConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Only ever read from `ANTHROPIC_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: None,
        }
    }
}

/// Per-call model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            temperature: 0.7,
            max_tokens: 8192,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ModelsConfig {
    pub pm: ModelConfig,
    pub architect: ModelConfig,
    pub reviewer: ModelConfig,
    /// Passed to the coding assistant as `--model` when set.
    pub coder: Option<String>,
}

/// Coding-assistant subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// Attempts after the first one.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Log each stdout line as it arrives.
    pub stream_output: bool,
    pub heartbeat_interval_secs: u64,
    pub validation_mode: ValidationMode,
    pub output_limit_bytes: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec![
                "--print".to_string(),
                "--permission-mode".to_string(),
                "acceptEdits".to_string(),
            ],
            timeout_secs: 300,
            max_retries: 3,
            retry_delay_ms: 1000,
            stream_output: true,
            heartbeat_interval_secs: 30,
            validation_mode: ValidationMode::Lenient,
            output_limit_bytes: 200_000,
        }
    }
}

/// Where checkpoints live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// Append-only JSONL files under `data_root/checkpoints/`.
    #[default]
    File,
    /// Process-local; gone after exit.
    Memory,
}

impl FromStr for CheckpointBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "sqlite" => Ok(CheckpointBackend::File),
            "memory" => Ok(CheckpointBackend::Memory),
            other => Err(anyhow!("unknown checkpoint backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_coding_iterations: u32,
    /// Pause after the PM and architect stages.
    pub human_in_loop: bool,
    /// Run the whole dev loop inside one coder invocation.
    pub batch_coding: bool,
    /// Graph steps per `start`/`continue` call before yielding.
    pub max_graph_steps: u32,
    pub checkpoint_backend: CheckpointBackend,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_coding_iterations: 50,
            human_in_loop: false,
            batch_coding: false,
            max_graph_steps: 100,
            checkpoint_backend: CheckpointBackend::File,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for AutodevConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("workspace"),
            data_root: PathBuf::from("data"),
            llm: LlmConfig::default(),
            models: ModelsConfig::default(),
            assistant: AssistantConfig::default(),
            workflow: WorkflowConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AutodevConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, model) in [
            ("pm", &self.models.pm),
            ("architect", &self.models.architect),
            ("reviewer", &self.models.reviewer),
        ] {
            if model.model.trim().is_empty() {
                return Err(anyhow!("models.{name}.model must not be empty"));
            }
            if model.timeout_secs == 0 {
                return Err(anyhow!("models.{name}.timeout_secs must be > 0"));
            }
            if model.max_tokens == 0 {
                return Err(anyhow!("models.{name}.max_tokens must be > 0"));
            }
        }
        if self.assistant.program.trim().is_empty() {
            return Err(anyhow!("assistant.program must not be empty"));
        }
        if self.assistant.timeout_secs == 0 {
            return Err(anyhow!("assistant.timeout_secs must be > 0"));
        }
        if self.assistant.heartbeat_interval_secs == 0 {
            return Err(anyhow!("assistant.heartbeat_interval_secs must be > 0"));
        }
        if self.assistant.output_limit_bytes == 0 {
            return Err(anyhow!("assistant.output_limit_bytes must be > 0"));
        }
        if self.workflow.max_coding_iterations == 0 {
            return Err(anyhow!("workflow.max_coding_iterations must be > 0"));
        }
        if self.workflow.max_graph_steps == 0 {
            return Err(anyhow!("workflow.max_graph_steps must be > 0"));
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// `DEFAULT_MODEL` applies to every stage; the stage-specific variables
    /// win over it.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = get("DEFAULT_MODEL") {
            self.models.pm.model = model.clone();
            self.models.architect.model = model.clone();
            self.models.reviewer.model = model;
        }
        if let Some(model) = get("PM_MODEL") {
            self.models.pm.model = model.clone();
            self.models.reviewer.model = model;
        }
        if let Some(model) = get("ARCHITECT_MODEL") {
            self.models.architect.model = model;
        }
        if let Some(model) = get("CODER_MODEL") {
            self.models.coder = Some(model);
        }
        if let Some(root) = get("WORKSPACE_ROOT") {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(root) = get("DATA_ROOT") {
            self.data_root = PathBuf::from(root);
        }
        if let Some(program) = get("CLAUDE_CLI_PATH") {
            self.assistant.program = program;
        }
        if let Some(value) = get("CLAUDE_CLI_TIMEOUT") {
            self.assistant.timeout_secs = parse_env("CLAUDE_CLI_TIMEOUT", &value)?;
        }
        if let Some(value) = get("CLAUDE_CLI_MAX_RETRIES") {
            self.assistant.max_retries = parse_env("CLAUDE_CLI_MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("CLAUDE_CLI_RETRY_DELAY_MS") {
            self.assistant.retry_delay_ms = parse_env("CLAUDE_CLI_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = get("CLAUDE_CLI_STREAM_OUTPUT") {
            self.assistant.stream_output = parse_bool("CLAUDE_CLI_STREAM_OUTPUT", &value)?;
        }
        if let Some(value) = get("CLAUDE_CLI_HEARTBEAT_INTERVAL") {
            self.assistant.heartbeat_interval_secs =
                parse_env("CLAUDE_CLI_HEARTBEAT_INTERVAL", &value)?;
        }
        if let Some(value) = get("CLAUDE_CLI_VALIDATION_MODE") {
            self.assistant.validation_mode = value
                .parse()
                .map_err(|err: String| anyhow!("CLAUDE_CLI_VALIDATION_MODE: {err}"))?;
        }
        if let Some(value) = get("MAX_CODING_ITERATIONS") {
            self.workflow.max_coding_iterations = parse_env("MAX_CODING_ITERATIONS", &value)?;
        }
        if let Some(value) = get("HUMAN_IN_LOOP") {
            self.workflow.human_in_loop = parse_bool("HUMAN_IN_LOOP", &value)?;
        }
        if let Some(value) = get("BATCH_CODING") {
            self.workflow.batch_coding = parse_bool("BATCH_CODING", &value)?;
        }
        if let Some(value) = get("CHECKPOINT_BACKEND") {
            self.workflow.checkpoint_backend =
                value.parse().context("parse CHECKPOINT_BACKEND")?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level.to_ascii_lowercase();
        }
        if let Some(file) = get("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|err| anyhow!("{key}: invalid value '{value}': {err}"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{key}: expected a boolean, got '{value}'")),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AutodevConfig::default()`.
pub fn load_config(path: &Path) -> Result<AutodevConfig> {
    if !path.exists() {
        let cfg = AutodevConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AutodevConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load the TOML file (or defaults), then apply process environment overrides.
pub fn load_with_env(path: &Path) -> Result<AutodevConfig> {
    let mut cfg = load_config(path)?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AutodevConfig::default());
    }

    /// Partial files keep defaults for everything they omit.
    #[test]
    fn partial_toml_merges_with_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("autodev.toml");
        fs::write(
            &path,
            "workspace_root = \"ws\"\n\n[workflow]\nhuman_in_loop = true\n\n[assistant]\nvalidation_mode = \"strict\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.workspace_root, PathBuf::from("ws"));
        assert!(cfg.workflow.human_in_loop);
        assert_eq!(cfg.workflow.max_coding_iterations, 50);
        assert_eq!(cfg.assistant.validation_mode, ValidationMode::Strict);
        assert_eq!(cfg.models.pm.max_tokens, 8192);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("autodev.toml");
        fs::write(&path, "[workflow]\nmax_coding_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_coding_iterations"));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("DEFAULT_MODEL", "model-a"),
            ("ARCHITECT_MODEL", "model-b"),
            ("CLAUDE_CLI_TIMEOUT", "42"),
            ("CLAUDE_CLI_VALIDATION_MODE", "strict"),
            ("HUMAN_IN_LOOP", "true"),
            ("CHECKPOINT_BACKEND", "memory"),
            ("WORKSPACE_ROOT", "/tmp/ws"),
            ("LOG_LEVEL", "DEBUG"),
        ]);
        let mut cfg = AutodevConfig::default();
        cfg.apply_env(|key| env.get(key).map(|v| (*v).to_string()))
            .expect("apply env");

        assert_eq!(cfg.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.models.pm.model, "model-a");
        assert_eq!(cfg.models.architect.model, "model-b");
        assert_eq!(cfg.assistant.timeout_secs, 42);
        assert_eq!(cfg.assistant.validation_mode, ValidationMode::Strict);
        assert!(cfg.workflow.human_in_loop);
        assert_eq!(cfg.workflow.checkpoint_backend, CheckpointBackend::Memory);
        assert_eq!(cfg.workspace_root, PathBuf::from("/tmp/ws"));
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn bad_env_number_names_the_variable() {
        let mut cfg = AutodevConfig::default();
        let err = cfg
            .apply_env(|key| (key == "MAX_CODING_ITERATIONS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_CODING_ITERATIONS"));
    }

    #[test]
    fn api_key_is_never_serialized() {
        let mut cfg = AutodevConfig::default();
        cfg.llm.api_key = Some("secret".to_string());
        let rendered = toml::to_string(&cfg).expect("serialize");
        assert!(!rendered.contains("secret"));
    }
}
