//! MCP tool implementations.

pub mod checks;
pub mod context;
pub mod exports;
pub mod projects;
pub mod routing;
pub mod tasks;

pub use context::ToolContext;

use anyhow::Result;
use rmcp::model::Tool;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ExecConfig, TasksConfig};
use crate::error::{ErrorCode, ToolError};
use crate::project::Projects;
use crate::runner::{capture, CommandSpec, ProcessRunner, RunOutput};
use crate::status::StatusQuery;
use crate::supervisor::TaskSupervisor;

/// Tool handler that processes MCP tool calls.
pub struct ToolHandler {
    pub supervisor: Arc<TaskSupervisor>,
    pub status: StatusQuery,
    pub projects: Projects,
    pub runner: Arc<dyn ProcessRunner>,
    pub exec: ExecConfig,
    pub tasks: TasksConfig,
}

impl ToolHandler {
    pub fn new(
        supervisor: Arc<TaskSupervisor>,
        status: StatusQuery,
        projects: Projects,
        runner: Arc<dyn ProcessRunner>,
        exec: ExecConfig,
        tasks: TasksConfig,
    ) -> Self {
        Self {
            supervisor,
            status,
            projects,
            runner,
            exec,
            tasks,
        }
    }

    /// Get all available tools.
    pub fn get_tools(&self) -> Vec<Tool> {
        let mut tools = Vec::new();

        // Project tools
        tools.extend(projects::get_tools());

        // Rule check and board inspection tools
        tools.extend(checks::get_tools());

        // Export tools
        tools.extend(exports::get_tools());

        // Routing tools
        tools.extend(routing::get_tools());

        // Background task tools
        tools.extend(tasks::get_tools());

        tools
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value, ctx: &ToolContext) -> Result<Value> {
        match name {
            // Project tools
            "list_projects" => projects::list_projects(&self.projects, arguments),
            "get_output_files" => projects::get_output_files(&self.projects, arguments),
            "read_file" => projects::read_file(&self.projects, arguments),
            "get_version" => {
                projects::get_version(self.runner.as_ref(), &self.exec, arguments).await
            }

            // Rule check and board inspection tools
            "run_drc" => {
                checks::run_drc(&self.projects, self.runner.as_ref(), &self.exec, arguments).await
            }
            "run_erc" => {
                checks::run_erc(&self.projects, self.runner.as_ref(), &self.exec, arguments).await
            }
            "fill_zones" => {
                checks::fill_zones(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "get_board_info" => {
                checks::get_board_info(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }

            // Export tools
            "export_gerber" => {
                exports::export_gerber(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_bom" => {
                exports::export_bom(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_netlist" => {
                exports::export_netlist(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_svg" => {
                exports::export_svg(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_pdf" => {
                exports::export_pdf(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_sch_pdf" => {
                exports::export_sch_pdf(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_sch_svg" => {
                exports::export_sch_svg(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_step" => {
                exports::export_step(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_3d" => {
                exports::export_3d(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_jlcpcb" => {
                exports::export_jlcpcb(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }
            "export_all" => {
                exports::export_all(&self.projects, self.runner.as_ref(), &self.exec, arguments)
                    .await
            }

            // Routing tools
            "auto_route" => routing::auto_route(&self.supervisor, &self.tasks, ctx, arguments).await,

            // Background task tools
            "get_task_status" => tasks::get_task_status(&self.status, arguments),
            "list_tasks" => tasks::list_tasks(&self.status, arguments),
            "cancel_task" => tasks::cancel_task(&self.supervisor, ctx, arguments),

            _ => Err(ToolError::unknown_tool(name).into()),
        }
    }
}

/// Helper to create a tool definition.
pub fn make_tool(name: &str, description: &str, properties: Value, required: Vec<&str>) -> Tool {
    let input_schema = rmcp::model::JsonObject::from_iter([
        ("type".to_string(), serde_json::json!("object")),
        ("properties".to_string(), properties),
        ("required".to_string(), serde_json::json!(required)),
    ]);

    Tool::new(name.to_string(), description.to_string(), input_schema)
}

/// Helper to get a string from arguments.
pub fn get_string(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str().map(String::from))
}

/// Helper to get an i64 from arguments.
pub fn get_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

/// Helper to parse an optional non-negative count argument.
pub(crate) fn optional_count(args: &Value, key: &str) -> Result<Option<usize>> {
    match get_i64(args, key) {
        None => Ok(None),
        Some(n) if n >= 0 => Ok(Some(n as usize)),
        Some(_) => Err(ToolError::invalid_value(key, "must be a non-negative integer").into()),
    }
}

/// Run one synchronous tool command to completion under the configured
/// timeout. The handle is dropped on timeout, which kills the child.
pub(crate) async fn run_sync(
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    spec: CommandSpec,
) -> Result<RunOutput> {
    let command_line = spec.command_line();
    let handle = runner.start(spec).await.map_err(ToolError::from)?;
    let timeout = Duration::from_secs(exec.sync_timeout_seconds);
    match tokio::time::timeout(timeout, capture(handle)).await {
        Ok(output) => Ok(output),
        Err(_) => Err(ToolError::new(
            ErrorCode::ToolTimeout,
            format!(
                "command timed out after {}s: {command_line}",
                exec.sync_timeout_seconds
            ),
        )
        .into()),
    }
}

/// Resolve a project and its board file.
pub(crate) fn project_board(projects: &Projects, project: &str) -> Result<(PathBuf, PathBuf)> {
    let dir = projects.resolve(project)?;
    let pcb = crate::project::find_pcb(&dir).ok_or_else(|| ToolError::pcb_not_found(project))?;
    Ok((dir, pcb))
}

/// Resolve a project and its schematic file.
pub(crate) fn project_schematic(projects: &Projects, project: &str) -> Result<(PathBuf, PathBuf)> {
    let dir = projects.resolve(project)?;
    let sch =
        crate::project::find_sch(&dir).ok_or_else(|| ToolError::schematic_not_found(project))?;
    Ok((dir, sch))
}
