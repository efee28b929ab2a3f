//! Background task queries and cancellation.

use super::{get_string, make_tool, optional_count, ToolContext};
use crate::error::ToolError;
use crate::status::{StatusQuery, TaskFilter};
use crate::supervisor::TaskSupervisor;
use crate::types::TaskState;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{json, Value};

pub fn get_tools() -> Vec<Tool> {
    vec![
        make_tool(
            "get_task_status",
            "Get one background task: state, timestamps, exit code, progress and the tail of its log.",
            json!({
                "task_id": {
                    "type": "string",
                    "description": "Task id returned by auto_route"
                },
                "tail_lines": {
                    "type": "integer",
                    "description": "Log lines to include (default 10)"
                }
            }),
            vec!["task_id"],
        ),
        make_tool(
            "list_tasks",
            "List background tasks, newest first, optionally narrowed by project or state.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Only tasks for this project"
                },
                "state": {
                    "type": "string",
                    "enum": ["pending", "started", "completed", "failed", "cancelled"],
                    "description": "Only tasks in this state"
                }
            }),
            vec![],
        ),
        make_tool(
            "cancel_task",
            "Cancel a running background task. The task reports cancelled once its process has exited.",
            json!({
                "task_id": {
                    "type": "string",
                    "description": "Task id to cancel"
                }
            }),
            vec!["task_id"],
        ),
    ]
}

pub fn get_task_status(status: &StatusQuery, args: Value) -> Result<Value> {
    let task_id =
        get_string(&args, "task_id").ok_or_else(|| ToolError::missing_field("task_id"))?;
    let tail_lines = optional_count(&args, "tail_lines")?;

    let snapshot = status.status(&task_id, tail_lines).map_err(ToolError::from)?;
    Ok(serde_json::to_value(&snapshot)?)
}

pub fn list_tasks(status: &StatusQuery, args: Value) -> Result<Value> {
    let state = match get_string(&args, "state") {
        None => None,
        Some(s) => Some(TaskState::from_str(&s).ok_or_else(|| {
            ToolError::invalid_value(
                "state",
                "expected pending, started, completed, failed or cancelled",
            )
        })?),
    };
    let filter = TaskFilter {
        project: get_string(&args, "project"),
        state,
    };

    let tasks = status.list(&filter).map_err(ToolError::from)?;
    let count = tasks.len();
    Ok(json!({
        "tasks": tasks,
        "count": count
    }))
}

pub fn cancel_task(
    supervisor: &TaskSupervisor,
    ctx: &ToolContext,
    args: Value,
) -> Result<Value> {
    let task_id =
        get_string(&args, "task_id").ok_or_else(|| ToolError::missing_field("task_id"))?;

    supervisor.cancel(&task_id).map_err(ToolError::from)?;
    ctx.logger
        .info(&format!("cancellation requested for task {task_id}"));

    Ok(json!({
        "success": true,
        "task_id": task_id,
        "message": "Cancellation requested, the task will report cancelled once its process exits"
    }))
}
