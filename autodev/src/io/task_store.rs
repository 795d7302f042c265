//! Task list load/save with schema validation.
//!
//! The list is always rewritten wholesale; there is no field-level patching.

use std::path::Path;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::debug;

use crate::core::extract::validate_task_schema;
use crate::core::types::Task;
use crate::io::workspace::{read_optional, write_json};

/// Load a task list, or `None` when the file does not exist yet.
pub fn load_tasks(path: &Path) -> Result<Option<Vec<Task>>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(&contents)
        .map_err(|err| anyhow!("parse tasks {}: {err}", path.display()))?;
    validate_task_schema(&value).map_err(|err| anyhow!("{}: {err}", path.display()))?;
    let tasks: Vec<Task> = serde_json::from_value(value)
        .map_err(|err| anyhow!("deserialize tasks {}: {err}", path.display()))?;
    debug!(path = %path.display(), count = tasks.len(), "tasks loaded");
    Ok(Some(tasks))
}

/// Atomically rewrite the whole task list.
pub fn write_tasks(path: &Path, tasks: &[Task]) -> Result<()> {
    debug!(path = %path.display(), count = tasks.len(), "writing tasks");
    write_json(path, &tasks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;
    use crate::test_support::task;
    use std::fs;

    /// Write then read keeps id, title, description, dependencies, and status.
    #[test]
    fn tasks_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let mut done = task("t1", &[]);
        done.status = TaskStatus::Completed;
        done.duration_secs = Some(1.5);
        let mut blocked = task("t2", &["t1"]);
        blocked.status = TaskStatus::Blocked;
        blocked.error = Some("exit 1".to_string());
        let tasks = vec![done, blocked, task("t3", &["t1", "t2"])];

        write_tasks(&path, &tasks).expect("write");
        let loaded = load_tasks(&path).expect("load").expect("present");
        assert_eq!(loaded, tasks);
    }

    #[test]
    fn missing_file_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_tasks(&temp.path().join("tasks.json")).expect("load").is_none());
    }

    #[test]
    fn unknown_status_fails_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(&path, r#"[{"id": "a", "title": "A", "status": "paused"}]"#).expect("write");
        let err = load_tasks(&path).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn persisted_format_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        write_tasks(&path, &[task("t1", &[])]).expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        let expected = "[\n  {\n    \"id\": \"t1\",\n    \"title\": \"t1 title\",\n    \"description\": \"t1 description\",\n    \"dependencies\": [],\n    \"status\": \"pending\"\n  }\n]\n";
        assert_eq!(contents, expected);
    }
}
