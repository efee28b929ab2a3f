//! Tasks subcommand for the kicad-ops CLI
//!
//! Reads the task record store directly, so task history can be inspected
//! from a separate invocation while a server is running, or after it has
//! exited.

use crate::types::TaskState;
use clap::Args;

/// Arguments for the tasks subcommand
#[derive(Args, Debug)]
pub struct TasksArgs {
    /// Show one task in full, with a log tail, instead of the listing
    #[arg(value_name = "TASK_ID")]
    pub task_id: Option<String>,

    /// Only list tasks for this project
    #[arg(short, long, value_name = "NAME")]
    pub project: Option<String>,

    /// Only list tasks in this state (pending, started, completed, failed, cancelled)
    #[arg(short, long, value_name = "STATE")]
    pub status: Option<String>,

    /// Number of log lines to show for a single task
    #[arg(short, long, default_value_t = 20, value_name = "N")]
    pub tail: usize,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    pub format: TasksFormat,
}

impl TasksArgs {
    /// Parse the --status filter, rejecting unknown states.
    pub fn state_filter(&self) -> Result<Option<TaskState>, String> {
        match &self.status {
            None => Ok(None),
            Some(s) => TaskState::from_str(s).map(Some).ok_or_else(|| {
                format!(
                    "unknown state '{s}', expected pending, started, completed, failed or cancelled"
                )
            }),
        }
    }
}

/// Output format for task listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TasksFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for TasksFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(TasksFormat::Text),
            "json" => Ok(TasksFormat::Json),
            _ => Err(format!("Invalid format '{}'. Valid options: text, json", s)),
        }
    }
}

impl std::fmt::Display for TasksFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TasksFormat::Text => write!(f, "text"),
            TasksFormat::Json => write!(f, "json"),
        }
    }
}
