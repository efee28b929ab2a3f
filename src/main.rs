//! KiCad Ops MCP Server
//!
//! A Rust MCP server that drives KiCad automation for PCB projects:
//! rule checks, fabrication exports and background autorouting over stdio.

use anyhow::Result;
use clap::Parser;
use kicad_ops_mcp::cli::tasks::{TasksArgs, TasksFormat};
use kicad_ops_mcp::cli::{Cli, Command};
use kicad_ops_mcp::config::Config;
use kicad_ops_mcp::error::ToolError;
use kicad_ops_mcp::logging::{LogLevelFilter, Logger};
use kicad_ops_mcp::project::Projects;
use kicad_ops_mcp::runner::{ProcessRunner, TokioProcessRunner};
use kicad_ops_mcp::status::{StatusQuery, TaskFilter};
use kicad_ops_mcp::store::TaskStore;
use kicad_ops_mcp::supervisor::TaskSupervisor;
use kicad_ops_mcp::tools::{ToolContext, ToolHandler};
use rmcp::{
    ErrorData, RoleServer, ServerHandler, ServiceExt,
    model::{
        CallToolRequestParams, CallToolResult, Content, InitializeResult, ListToolsResult,
        PaginatedRequestParams, ServerCapabilities,
    },
    service::RequestContext,
    transport::io::stdio,
};
use serde_json::{Value, json};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

/// MCP server handler.
#[derive(Clone)]
struct KicadOpsServer {
    tool_handler: Arc<ToolHandler>,
    /// Atomic level filter for logging (client can adjust via logging/setLevel).
    level_filter: Arc<LogLevelFilter>,
}

impl KicadOpsServer {
    fn new(tool_handler: Arc<ToolHandler>, level_filter: Arc<LogLevelFilter>) -> Self {
        Self {
            tool_handler,
            level_filter,
        }
    }
}

const INSTRUCTIONS: &str = "\
KiCad automation for PCB projects. Start with list_projects() to see what is available. \
run_drc/run_erc check a board, export_* tools produce fabrication outputs, and auto_route \
starts a background FreeRouting job: poll get_task_status(task_id) for progress and call \
cancel_task(task_id) to stop it.";

impl ServerHandler for KicadOpsServer {
    fn get_info(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: Default::default(),
            server_info: rmcp::model::Implementation {
                name: "kicad-ops-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            capabilities: ServerCapabilities {
                tools: Some(rmcp::model::ToolsCapability::default()),
                logging: Some(Default::default()),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }

    async fn set_level(
        &self,
        request: rmcp::model::SetLevelRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<(), ErrorData> {
        self.level_filter.set(request.level);
        info!(level = ?request.level, "Logging level updated via MCP");
        Ok(())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> std::result::Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.tool_handler.get_tools(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> std::result::Result<CallToolResult, ErrorData> {
        let tool_name = request.name.clone();
        let start = std::time::Instant::now();

        // Per-request logger so tool output reaches the connected client.
        let logger = Logger::new()
            .with_peer(context.peer.clone())
            .with_level_filter(Arc::clone(&self.level_filter))
            .with_name(format!("tool:{}", tool_name));
        let tool_ctx = ToolContext::new(logger);

        let args = Value::Object(request.arguments.unwrap_or_default());

        match self
            .tool_handler
            .call_tool(&tool_name, args, &tool_ctx)
            .await
        {
            Ok(result) => {
                let elapsed = start.elapsed();
                debug!(
                    tool = %tool_name,
                    duration_ms = elapsed.as_millis() as u64,
                    "Tool call succeeded"
                );
                Ok(CallToolResult {
                    content: vec![Content::text(result.to_string())],
                    is_error: None,
                    meta: None,
                    structured_content: None,
                })
            }
            Err(e) => {
                let elapsed = start.elapsed();
                let error_json = match e.downcast::<ToolError>() {
                    Ok(tool_err) => {
                        warn!(
                            tool = %tool_name,
                            error_code = ?tool_err.code,
                            error_message = %tool_err.message,
                            duration_ms = elapsed.as_millis() as u64,
                            "Tool call failed"
                        );
                        serde_json::to_string(&tool_err)
                            .unwrap_or_else(|_| json!({ "error": tool_err.to_string() }).to_string())
                    }
                    Err(e) => {
                        warn!(
                            tool = %tool_name,
                            error = %e,
                            duration_ms = elapsed.as_millis() as u64,
                            "Tool call failed"
                        );
                        json!({ "code": "INTERNAL_ERROR", "message": e.to_string() }).to_string()
                    }
                };
                Ok(CallToolResult {
                    content: vec![Content::text(error_json)],
                    is_error: Some(true),
                    meta: None,
                    structured_content: None,
                })
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option. Stdout carries the MCP
    // transport, so stderr is the default sink.
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    if let Some(projects_root) = cli.projects_root {
        config.paths.projects_root = projects_root;
    }
    if let Some(tasks_dir) = cli.tasks_dir {
        config.paths.tasks_dir = tasks_dir;
    }

    match cli.command {
        Some(Command::Tasks(args)) => run_tasks(&config, args),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Run the MCP server
async fn run_server(config: Config) -> Result<()> {
    config.ensure_dirs()?;

    info!(
        "Starting KiCad Ops MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Projects root: {:?}", config.paths.projects_root);
    info!("Tasks dir: {:?}", config.paths.tasks_dir);
    info!("kicad-cli: {}", config.exec.kicad_cli);
    info!("FreeRouting jar: {:?}", config.exec.freerouting_jar);

    let store = Arc::new(TaskStore::new(config.paths.tasks_dir.clone())?);
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
    let projects = Projects::new(config.paths.projects_root.clone());

    let supervisor = Arc::new(TaskSupervisor::new(
        Arc::clone(&store),
        Arc::clone(&runner),
        projects.clone(),
        config.exec.clone(),
        config.tasks.clone(),
    ));

    // Records left over from a previous server run are dead processes by
    // now; trim the backlog before accepting new work.
    supervisor.prune_old_tasks();

    let status = StatusQuery::new(Arc::clone(&store), config.tasks.log_tail_lines);

    let tool_handler = Arc::new(ToolHandler::new(
        supervisor,
        status,
        projects,
        runner,
        config.exec.clone(),
        config.tasks.clone(),
    ));

    // Level filter for client-visible logging (defaults to Debug - logs everything)
    let level_filter = Arc::new(LogLevelFilter::default());

    let server = KicadOpsServer::new(tool_handler, level_filter);

    // Run the stdio server
    info!("Server ready, listening on stdio");
    let transport = stdio();
    let service = server.serve(transport).await?;
    service.waiting().await?;

    Ok(())
}

/// Inspect the task record store directly, without going through a server.
fn run_tasks(config: &Config, args: TasksArgs) -> Result<()> {
    let store = Arc::new(TaskStore::new(config.paths.tasks_dir.clone())?);
    let status = StatusQuery::new(store, config.tasks.log_tail_lines);

    if let Some(ref task_id) = args.task_id {
        let snapshot = status.status(task_id, Some(args.tail))?;
        if args.format == TasksFormat::Json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(());
        }
        let record = &snapshot.record;
        let stale = if snapshot.stale { " (stale)" } else { "" };
        println!("{} [{}{}]", record.id, record.state, stale);
        println!("  kind:     {}", record.kind);
        println!("  project:  {}", record.project);
        println!("  created:  {}", record.created_at.to_rfc3339());
        if let Some(started) = record.started_at {
            println!("  started:  {}", started.to_rfc3339());
        }
        if let Some(finished) = record.finished_at {
            println!("  finished: {}", finished.to_rfc3339());
        }
        if let Some(code) = record.exit_code {
            println!("  exit:     {code}");
        }
        if let Some(ref progress) = record.progress {
            println!("  progress: {progress}");
        }
        if let Some(ref message) = record.message {
            println!("  message:  {message}");
        }
        if !snapshot.log_tail.is_empty() {
            println!("  log:");
            for line in &snapshot.log_tail {
                println!("    {line}");
            }
        }
        return Ok(());
    }

    let state = args.state_filter().map_err(anyhow::Error::msg)?;
    let filter = TaskFilter {
        project: args.project.clone(),
        state,
    };
    let tasks = status.list(&filter)?;

    if args.format == TasksFormat::Json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks recorded.");
        return Ok(());
    }
    for task in &tasks {
        let record = &task.record;
        let mark = if task.stale { " (stale)" } else { "" };
        println!(
            "{:<44} {:<10} {}  {}{}",
            record.id,
            record.state.to_string(),
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.project,
            mark
        );
    }
    Ok(())
}
