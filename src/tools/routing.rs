//! Autorouting submission.

use super::{get_i64, get_string, make_tool, ToolContext};
use crate::config::TasksConfig;
use crate::error::ToolError;
use crate::supervisor::TaskSupervisor;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn get_tools() -> Vec<Tool> {
    vec![make_tool(
        "auto_route",
        "Route the board with FreeRouting in the background. The board is backed up to output/backup/ first, then rewritten in place once routing finishes. Returns a task_id immediately; poll get_task_status for progress and use cancel_task to stop it.",
        json!({
            "project": {
                "type": "string",
                "description": "Project directory name"
            },
            "max_passes": {
                "type": "integer",
                "default": 100,
                "description": "Maximum optimization passes"
            }
        }),
        vec!["project"],
    )]
}

pub async fn auto_route(
    supervisor: &Arc<TaskSupervisor>,
    tasks: &TasksConfig,
    ctx: &ToolContext,
    args: Value,
) -> Result<Value> {
    let project =
        get_string(&args, "project").ok_or_else(|| ToolError::missing_field("project"))?;
    let max_passes = match get_i64(&args, "max_passes") {
        None => tasks.default_max_passes,
        Some(n) => u32::try_from(n)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ToolError::invalid_value("max_passes", "must be a positive integer"))?,
    };

    let submitted = supervisor
        .submit_autoroute(&project, max_passes)
        .await
        .map_err(ToolError::from)?;

    ctx.logger.info(&format!(
        "autoroute task {} started for {project}",
        submitted.task_id
    ));

    Ok(json!({
        "success": true,
        "task_id": submitted.task_id,
        "backup": submitted.backup.display().to_string(),
        "message": "Autoroute task started, poll get_task_status for progress"
    }))
}
