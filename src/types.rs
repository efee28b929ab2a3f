//! Core task model shared by the store, supervisor, and tools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a background task.
///
/// Valid transitions: `Pending -> Started`, `Pending -> Failed` (launch
/// failures before the worker runs), and `Started -> Completed | Failed |
/// Cancelled`. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Pending, TaskState::Started)
                | (TaskState::Pending, TaskState::Failed)
                | (TaskState::Started, TaskState::Completed)
                | (TaskState::Started, TaskState::Failed)
                | (TaskState::Started, TaskState::Cancelled)
        )
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "started" => Some(TaskState::Started),
            "completed" => Some(TaskState::Completed),
            "failed" => Some(TaskState::Failed),
            "cancelled" => Some(TaskState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Started => "started",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// What a background task does. Currently only autorouting runs in the
/// background; synchronous tools never create task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Autoroute,
}

impl TaskKind {
    /// Short prefix used when minting task ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            TaskKind::Autoroute => "route",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Autoroute => "autoroute",
        };
        write!(f, "{s}")
    }
}

/// Durable record of one background task, persisted as `<id>.json` in the
/// tasks directory. The paired `<id>.log` file holds the captured output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub kind: TaskKind,
    pub project: String,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Pre-mutation board backup, recorded once the task starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_file: Option<PathBuf>,
    /// Pid of the server process that owns this task. A non-terminal record
    /// whose pid is not ours is stale (orphaned by a restart).
    pub supervisor_pid: u32,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl TaskRecord {
    pub fn new(id: String, kind: TaskKind, project: String, params: Value) -> Self {
        Self {
            id,
            kind,
            project,
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            message: None,
            progress: None,
            backup_file: None,
            supervisor_pid: std::process::id(),
            params,
        }
    }

    /// True when this record was written by a different server process and
    /// never reached a terminal state. Reported as-is; stale records are
    /// never resumed and never block new work.
    pub fn is_stale(&self) -> bool {
        !self.state.is_terminal() && self.supervisor_pid != std::process::id()
    }
}

/// Partial update applied to a task record. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub state: Option<TaskState>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
    pub progress: Option<String>,
    pub backup_file: Option<PathBuf>,
}

impl TaskPatch {
    pub fn state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = Some(progress.into());
        self
    }

    pub fn with_backup_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_file = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            for next in [
                TaskState::Pending,
                TaskState::Started,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pending_can_start_or_fail() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Started));
        assert!(TaskState::Pending.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn started_reaches_any_terminal() {
        assert!(TaskState::Started.can_transition_to(TaskState::Completed));
        assert!(TaskState::Started.can_transition_to(TaskState::Failed));
        assert!(TaskState::Started.can_transition_to(TaskState::Cancelled));
        assert!(!TaskState::Started.can_transition_to(TaskState::Pending));
    }

    #[test]
    fn new_record_is_pending_with_own_pid() {
        let record = TaskRecord::new(
            "route_demo_20260101_000000".into(),
            TaskKind::Autoroute,
            "demo".into(),
            Value::Null,
        );
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.supervisor_pid, std::process::id());
        assert!(!record.is_stale());
    }
}
