//! Durable task records on the filesystem.
//!
//! Each task owns two files in the tasks directory: `<id>.json` with the
//! [`TaskRecord`] and `<id>.log` with the captured process output. Records
//! are replaced atomically (write to a temp file, then rename); logs are
//! append-only. A per-id mutex serializes read-modify-write cycles so the
//! supervisor and the status tools never interleave a lost update.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

use crate::types::{TaskKind, TaskPatch, TaskRecord, TaskState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task record already exists: {0}")]
    Duplicate(String),

    #[error("task record not found: {0}")]
    NotFound(String),

    #[error("invalid transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("task store io error: {0}")]
    Io(String),

    #[error("task record is corrupt: {0}")]
    Serde(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Filesystem-backed store for task records and logs.
pub struct TaskStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    pub fn log_path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.log"))
    }

    fn id_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(task_id.to_string()).or_default().clone()
    }

    /// Mint a fresh id of the form `{kind}_{project}_{YYYYMMDD_HHMMSS}`.
    /// Same-second submissions get a `_2`, `_3`, ... suffix.
    pub fn allocate_id(&self, kind: TaskKind, project: &str, now: DateTime<Utc>) -> String {
        let base = format!(
            "{}_{}_{}",
            kind.id_prefix(),
            project,
            now.format("%Y%m%d_%H%M%S")
        );
        if !self.record_path(&base).exists() {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.record_path(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Persist a brand-new record. Fails if the id is already taken.
    pub fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let lock = self.id_lock(&record.id);
        let _guard = lock.lock().unwrap();

        if self.record_path(&record.id).exists() {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        self.write_record(record)
    }

    pub fn get(&self, task_id: &str) -> Result<TaskRecord, StoreError> {
        let path = self.record_path(task_id);
        if !path.exists() {
            return Err(StoreError::NotFound(task_id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| StoreError::Serde(e.to_string()))
    }

    /// Apply a patch under the per-id lock, enforcing the state machine.
    ///
    /// Moving into `Started` stamps `started_at`; moving into a terminal
    /// state stamps `finished_at`. Returns the updated record.
    pub fn update(&self, task_id: &str, patch: TaskPatch) -> Result<TaskRecord, StoreError> {
        let lock = self.id_lock(task_id);
        let _guard = lock.lock().unwrap();

        let mut record = self.get(task_id)?;

        if let Some(next) = patch.state {
            if !record.state.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: record.state,
                    to: next,
                });
            }
            record.state = next;
            let now = Utc::now();
            if next == TaskState::Started {
                record.started_at = Some(now);
            }
            if next.is_terminal() {
                record.finished_at = Some(now);
            }
        }

        if let Some(code) = patch.exit_code {
            record.exit_code = Some(code);
        }
        if let Some(message) = patch.message {
            record.message = Some(message);
        }
        if let Some(progress) = patch.progress {
            record.progress = Some(progress);
        }
        if let Some(backup) = patch.backup_file {
            record.backup_file = Some(backup);
        }

        self.write_record(&record)?;
        Ok(record)
    }

    /// Append lines to the task's log file, creating it on first write. The
    /// whole batch goes out as a single write, so a concurrent tail read
    /// only ever sees complete lines.
    pub fn append_log(&self, task_id: &str, lines: &[String]) -> Result<(), StoreError> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut batch = String::new();
        for line in lines {
            batch.push_str(line);
            batch.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(task_id))?;
        file.write_all(batch.as_bytes())?;
        Ok(())
    }

    /// Last `max_lines` lines of the log, oldest first. A task that has not
    /// produced output yet yields an empty vec.
    pub fn read_log_tail(&self, task_id: &str, max_lines: usize) -> Result<Vec<String>, StoreError> {
        let path = self.log_path(task_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        Ok(lines[start..].iter().map(|s| s.to_string()).collect())
    }

    /// All records, newest first. Unreadable files are skipped with a
    /// warning rather than failing the whole listing.
    pub fn list(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable task record");
                    continue;
                }
            };
            match serde_json::from_str::<TaskRecord>(&content) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping corrupt task record");
                }
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Delete terminal records (and their logs) beyond the newest
    /// `retention`. Non-terminal records are never touched. Returns how many
    /// tasks were removed. A pruned id leaves the lock map with its files.
    pub fn prune(&self, retention: usize) -> Result<usize, StoreError> {
        let terminal: Vec<TaskRecord> = self
            .list()?
            .into_iter()
            .filter(|r| r.state.is_terminal())
            .collect();

        let mut removed = 0;
        for record in terminal.iter().skip(retention) {
            let lock = self.id_lock(&record.id);
            let _guard = lock.lock().unwrap();
            fs::remove_file(self.record_path(&record.id))?;
            let log = self.log_path(&record.id);
            if log.exists() {
                fs::remove_file(log)?;
            }
            self.locks.lock().unwrap().remove(&record.id);
            removed += 1;
        }
        Ok(removed)
    }

    fn write_record(&self, record: &TaskRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.id);
        let tmp = self.dir.join(format!("{}.json.tmp", record.id));
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
