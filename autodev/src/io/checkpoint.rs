//! Checkpoint storage keyed by session id.
//!
//! A session's checkpoints form an append-only log; `load` returns the most
//! recent entry. Load never fails: an unreadable store is reported as absent
//! so the caller can fall back to artifact reconstruction.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::state::SessionState;
use crate::core::types::GraphNode;
use crate::io::config::{AutodevConfig, CheckpointBackend};

/// Snapshot format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// One persisted snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    /// Position in the session's log, starting at 1.
    pub seq: u64,
    pub saved_at: String,
    pub session_id: String,
    /// Node that runs when the session resumes; `None` once finished.
    pub next: Option<GraphNode>,
    pub state: SessionState,
}

/// Durable snapshot store.
pub trait CheckpointStore {
    /// Append a snapshot and return its sequence number.
    fn save(&self, state: &SessionState, next: Option<GraphNode>) -> Result<u64>;
    /// Latest snapshot, or `None` if missing or unreadable.
    fn load(&self, session_id: &str) -> Option<Checkpoint>;
}

/// JSONL log per session under `<data_root>/checkpoints/`.
///
/// The last sequence number per session is cached after the first save, so
/// the log is scanned at most once per process.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    last_seq: Mutex<HashMap<String, u64>>,
}

impl FileCheckpointStore {
    pub fn new(data_root: &Path) -> Self {
        Self {
            dir: data_root.join("checkpoints"),
            last_seq: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.jsonl"))
    }

    fn read_log(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let mut entries = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Checkpoint>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %err,
                    "skipping unreadable checkpoint entry"
                ),
            }
        }
        Ok(entries)
    }

    fn next_seq(&self, session_id: &str) -> Result<u64> {
        let mut cache = self
            .last_seq
            .lock()
            .map_err(|_| anyhow!("checkpoint seq cache lock poisoned"))?;
        let last = match cache.get(session_id) {
            Some(seq) => *seq,
            None => self
                .read_log(session_id)
                .ok()
                .and_then(|entries| entries.last().map(|entry| entry.seq))
                .unwrap_or(0),
        };
        cache.insert(session_id.to_string(), last + 1);
        Ok(last + 1)
    }
}

/// True when the file has content whose last byte is not a newline.
fn has_torn_tail(file: &mut fs::File) -> Result<bool> {
    let len = file.metadata().context("stat checkpoint log")?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).context("seek checkpoint log")?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).context("read checkpoint log tail")?;
    Ok(last[0] != b'\n')
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, state: &SessionState, next: Option<GraphNode>) -> Result<u64> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create checkpoint dir {}", self.dir.display()))?;
        let seq = self.next_seq(&state.session_id)?;
        let entry = snapshot(state, next, seq);
        let mut line = serde_json::to_string(&entry).context("serialize checkpoint")?;
        line.push('\n');

        let path = self.path_for(&state.session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        if has_torn_tail(&mut file)? {
            warn!(path = %path.display(), "terminating torn checkpoint line before append");
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        file.sync_data()
            .with_context(|| format!("sync {}", path.display()))?;
        debug!(session_id = %state.session_id, seq, next = ?next, "checkpoint saved");
        Ok(seq)
    }

    fn load(&self, session_id: &str) -> Option<Checkpoint> {
        match self.read_log(session_id) {
            Ok(mut entries) => entries.pop(),
            Err(err) => {
                warn!(session_id, error = %format!("{err:#}"), "checkpoint store unreadable");
                None
            }
        }
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    logs: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots saved for a session.
    pub fn len(&self, session_id: &str) -> usize {
        self.logs
            .lock()
            .map(|logs| logs.get(session_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, state: &SessionState, next: Option<GraphNode>) -> Result<u64> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| anyhow!("checkpoint store lock poisoned"))?;
        let log = logs.entry(state.session_id.clone()).or_default();
        let seq = log.last().map_or(0, |entry| entry.seq) + 1;
        log.push(snapshot(state, next, seq));
        Ok(seq)
    }

    fn load(&self, session_id: &str) -> Option<Checkpoint> {
        let logs = self.logs.lock().ok()?;
        logs.get(session_id).and_then(|log| log.last().cloned())
    }
}

fn snapshot(state: &SessionState, next: Option<GraphNode>, seq: u64) -> Checkpoint {
    Checkpoint {
        version: CHECKPOINT_VERSION,
        seq,
        saved_at: Utc::now().to_rfc3339(),
        session_id: state.session_id.clone(),
        next,
        state: state.clone(),
    }
}

/// Build the store selected in config.
pub fn open_store(config: &AutodevConfig) -> Box<dyn CheckpointStore> {
    match config.workflow.checkpoint_backend {
        CheckpointBackend::File => Box::new(FileCheckpointStore::new(&config.data_root)),
        CheckpointBackend::Memory => Box::new(MemoryCheckpointStore::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Stage;

    #[test]
    fn file_store_returns_latest_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path());
        let mut state = SessionState::new("s1", "build a cli");

        assert_eq!(store.save(&state, Some(GraphNode::Architect)).expect("save"), 1);
        state.stage = Stage::Design;
        assert_eq!(store.save(&state, Some(GraphNode::Coder)).expect("save"), 2);

        let latest = store.load("s1").expect("checkpoint");
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.next, Some(GraphNode::Coder));
        assert_eq!(latest.state.stage, Stage::Design);
        assert_eq!(latest.version, CHECKPOINT_VERSION);

        let log = fs::read_to_string(store.path_for("s1")).expect("read");
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn missing_session_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(FileCheckpointStore::new(temp.path()).load("nope").is_none());
    }

    /// A torn trailing write falls back to the last good entry.
    #[test]
    fn corrupt_tail_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path());
        let state = SessionState::new("s1", "req");
        store.save(&state, Some(GraphNode::Pm)).expect("save");
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.path_for("s1"))
            .expect("open");
        file.write_all(b"{\"version\": 1, \"seq\"").expect("write");

        let latest = store.load("s1").expect("checkpoint");
        assert_eq!(latest.seq, 1);
    }

    /// A save after a torn write lands on its own line and wins.
    #[test]
    fn save_after_torn_tail_is_loadable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path());
        let mut state = SessionState::new("s1", "req");
        store.save(&state, Some(GraphNode::Pm)).expect("save");
        let mut file = OpenOptions::new()
            .append(true)
            .open(store.path_for("s1"))
            .expect("open");
        file.write_all(b"{\"version\": 1, \"seq\"").expect("write");

        state.stage = Stage::Design;
        let seq = store.save(&state, Some(GraphNode::Coder)).expect("save");

        let latest = store.load("s1").expect("checkpoint");
        assert_eq!(latest.seq, seq);
        assert_eq!(latest.next, Some(GraphNode::Coder));
        assert_eq!(latest.state.stage, Stage::Design);
    }

    /// A fresh store picks up numbering from an existing log.
    #[test]
    fn seq_continues_across_store_instances() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = SessionState::new("s1", "req");
        let first = FileCheckpointStore::new(temp.path());
        first.save(&state, Some(GraphNode::Pm)).expect("save");
        first.save(&state, Some(GraphNode::Architect)).expect("save");

        let second = FileCheckpointStore::new(temp.path());
        assert_eq!(second.save(&state, Some(GraphNode::Coder)).expect("save"), 3);
        assert_eq!(second.save(&state, None).expect("save"), 4);
        assert_eq!(second.load("s1").expect("checkpoint").seq, 4);
    }

    /// A log that cannot be read as text is absent, not an error.
    #[test]
    fn unreadable_store_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path());
        fs::create_dir_all(store.path_for("s1")).expect("dir in place of file");
        assert!(store.load("s1").is_none());
    }

    #[test]
    fn memory_store_is_append_only() {
        let store = MemoryCheckpointStore::new();
        let state = SessionState::new("s1", "req");
        store.save(&state, Some(GraphNode::Pm)).expect("save");
        store.save(&state, None).expect("save");
        assert_eq!(store.len("s1"), 2);
        let latest = store.load("s1").expect("checkpoint");
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.next, None);
        assert!(store.load("other").is_none());
    }
}
