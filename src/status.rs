//! Read-only task status queries.
//!
//! Everything here reads the record store only. It never waits on a live
//! process, so a status call answers in store-I/O time no matter what the
//! router is doing.

use serde::Serialize;
use std::sync::Arc;

use crate::store::{StoreError, TaskStore};
use crate::types::{TaskRecord, TaskState};

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub project: Option<String>,
    pub state: Option<TaskState>,
}

/// Full view of one task: the record, a staleness flag, and the log tail.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub stale: bool,
    pub log_tail: Vec<String>,
}

/// Listing view: the record plus staleness, without the log.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    #[serde(flatten)]
    pub record: TaskRecord,
    pub stale: bool,
}

pub struct StatusQuery {
    store: Arc<TaskStore>,
    default_tail: usize,
}

impl StatusQuery {
    pub fn new(store: Arc<TaskStore>, default_tail: usize) -> Self {
        Self {
            store,
            default_tail,
        }
    }

    pub fn status(
        &self,
        task_id: &str,
        tail_lines: Option<usize>,
    ) -> Result<TaskSnapshot, StoreError> {
        let record = self.store.get(task_id)?;
        let log_tail = self
            .store
            .read_log_tail(task_id, tail_lines.unwrap_or(self.default_tail))?;
        let stale = record.is_stale();
        Ok(TaskSnapshot {
            record,
            stale,
            log_tail,
        })
    }

    /// Tasks newest first, optionally narrowed by project and state.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskSummary>, StoreError> {
        let summaries = self
            .store
            .list()?
            .into_iter()
            .filter(|record| {
                filter
                    .project
                    .as_deref()
                    .map_or(true, |project| record.project == project)
            })
            .filter(|record| filter.state.map_or(true, |state| record.state == state))
            .map(|record| {
                let stale = record.is_stale();
                TaskSummary { record, stale }
            })
            .collect();
        Ok(summaries)
    }
}
