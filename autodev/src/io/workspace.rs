//! Per-session workspace layout and artifact writes.
//!
//! Each session owns `<workspace_root>/<session_id>/` holding `PRD.md`,
//! `Design.md`, `tasks.json`, the reviewer notes, assistant logs, and the
//! default `code/` directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use serde::Serialize;
use tracing::debug;

pub const PRD_FILE: &str = "PRD.md";
pub const DESIGN_FILE: &str = "Design.md";
pub const TASKS_FILE: &str = "tasks.json";
pub const REVIEWS_FILE: &str = "PRD_reviews.md";
const CODE_DIR: &str = "code";
const LOGS_DIR: &str = "logs";

/// Workspace root shared by all sessions.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical paths for one session. Does not touch the filesystem.
    pub fn session(&self, session_id: &str) -> SessionPaths {
        SessionPaths::new(&self.root, session_id)
    }

    /// Session ids with a directory under the root, sorted.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("read workspace {}", self.root.display()))?
        {
            let entry = entry.with_context(|| format!("read entry in {}", self.root.display()))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && validate_session_id(name).is_ok()
            {
                ids.push(name.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Canonical artifact paths for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub prd: PathBuf,
    pub design: PathBuf,
    pub tasks: PathBuf,
    pub reviews: PathBuf,
    pub code_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(root: &Path, session_id: &str) -> Self {
        let dir = root.join(session_id);
        Self {
            prd: dir.join(PRD_FILE),
            design: dir.join(DESIGN_FILE),
            tasks: dir.join(TASKS_FILE),
            reviews: dir.join(REVIEWS_FILE),
            code_dir: dir.join(CODE_DIR),
            logs_dir: dir.join(LOGS_DIR),
            dir,
        }
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn task_log(&self, task_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{task_id}.log"))
    }
}

/// Generate `YYYYmmdd_HHMMSS_<8 hex>`.
pub fn generate_session_id() -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}_{}", &suffix[..8])
}

/// Validate that a session id is safe as a single path component.
pub fn validate_session_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("session id must not be empty"));
    }
    if id == "." || id == ".." {
        return Err(anyhow!("session id must not be '.' or '..'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!(
            "session id must be [A-Za-z0-9._-] only (got '{id}')"
        ));
    }
    Ok(())
}

/// Atomically write text (temp file + rename), creating parent directories.
pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("artifact path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("artifact path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), bytes = contents.len(), "artifact written");
    Ok(())
}

/// Serialize `value` to pretty-printed JSON with trailing newline and write atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    write_text(path, &payload)
}

/// Read a text artifact, treating a missing file as absent.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}
