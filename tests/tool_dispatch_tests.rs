//! Tool dispatch tests covering the MCP surface: catalog, argument
//! validation, structured error codes and the JSON response shapes.

mod common;

use crate::common::{Script, ScriptedRunner};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tempfile::TempDir;

use kicad_ops_mcp::config::{ExecConfig, TasksConfig};
use kicad_ops_mcp::error::{ErrorCode, ToolError};
use kicad_ops_mcp::logging::Logger;
use kicad_ops_mcp::project::Projects;
use kicad_ops_mcp::runner::ProcessRunner;
use kicad_ops_mcp::status::StatusQuery;
use kicad_ops_mcp::store::TaskStore;
use kicad_ops_mcp::supervisor::TaskSupervisor;
use kicad_ops_mcp::tools::{ToolContext, ToolHandler};
use kicad_ops_mcp::types::{TaskKind, TaskRecord};

struct Fixture {
    _tmp: TempDir,
    handler: ToolHandler,
    store: Arc<TaskStore>,
    root: PathBuf,
    jar: PathBuf,
}

/// A wired-up tool handler over one project ("demo", with board and
/// schematic) and a scripted process runner. The closure gets the demo
/// project directory so scripts can drop artifacts into it.
fn fixture<F>(build_scripts: F) -> Fixture
where
    F: FnOnce(&Path) -> Vec<Script>,
{
    fixture_with_exec(build_scripts, |_| {})
}

/// Same as `fixture`, with a hook to adjust the exec settings first.
fn fixture_with_exec<F>(build_scripts: F, adjust: impl FnOnce(&mut ExecConfig)) -> Fixture
where
    F: FnOnce(&Path) -> Vec<Script>,
{
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("projects");
    let demo = root.join("demo");
    fs::create_dir_all(&demo).expect("project dir");
    fs::write(demo.join("demo.kicad_pcb"), "(kicad_pcb demo)").expect("board");
    fs::write(demo.join("demo.kicad_sch"), "(kicad_sch demo)").expect("schematic");

    let jar = tmp.path().join("freerouting.jar");
    fs::write(&jar, "jar").expect("jar");

    let store = Arc::new(TaskStore::new(tmp.path().join("tasks")).expect("store"));
    let runner: Arc<dyn ProcessRunner> = ScriptedRunner::new(build_scripts(&demo));

    let mut exec = ExecConfig::default();
    exec.freerouting_jar = jar.clone();
    exec.use_xvfb = false;
    adjust(&mut exec);
    let tasks = TasksConfig::default();

    let supervisor = Arc::new(TaskSupervisor::new(
        Arc::clone(&store),
        Arc::clone(&runner),
        Projects::new(root.clone()),
        exec.clone(),
        tasks.clone(),
    ));
    let status = StatusQuery::new(Arc::clone(&store), tasks.log_tail_lines);
    let handler = ToolHandler::new(
        supervisor,
        status,
        Projects::new(root.clone()),
        Arc::clone(&runner),
        exec,
        tasks,
    );

    Fixture {
        _tmp: tmp,
        handler,
        store,
        root,
        jar,
    }
}

fn ctx() -> ToolContext {
    ToolContext::new(Logger::new())
}

fn tool_error(err: anyhow::Error) -> ToolError {
    err.downcast::<ToolError>().expect("structured tool error")
}

#[test]
fn the_tool_catalog_is_complete_and_unique() {
    let f = fixture(|_| vec![]);
    let tools = f.handler.get_tools();

    let expected = [
        "list_projects",
        "get_output_files",
        "read_file",
        "get_version",
        "run_drc",
        "run_erc",
        "fill_zones",
        "get_board_info",
        "export_gerber",
        "export_bom",
        "export_netlist",
        "export_svg",
        "export_pdf",
        "export_sch_pdf",
        "export_sch_svg",
        "export_step",
        "export_3d",
        "export_jlcpcb",
        "export_all",
        "auto_route",
        "get_task_status",
        "list_tasks",
        "cancel_task",
    ];
    for name in &expected {
        assert!(tools.iter().any(|t| t.name == *name), "missing tool {name}");
    }
    assert_eq!(tools.len(), expected.len());

    let mut names: Vec<String> = tools.iter().map(|t| t.name.to_string()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), expected.len());

    for tool in &tools {
        assert_eq!(
            tool.input_schema.get("type").and_then(Value::as_str),
            Some("object"),
            "schema for {}",
            tool.name
        );
    }
}

#[tokio::test]
async fn unknown_tools_are_rejected_with_a_code() {
    let f = fixture(|_| vec![]);
    let err = f
        .handler
        .call_tool("frobnicate", json!({}), &ctx())
        .await
        .expect_err("unknown tool");
    assert_eq!(tool_error(err).code, ErrorCode::UnknownTool);
}

#[tokio::test]
async fn missing_required_fields_name_the_field() {
    let f = fixture(|_| vec![]);
    let cases = [
        ("run_drc", "project"),
        ("get_output_files", "project"),
        ("read_file", "filepath"),
        ("auto_route", "project"),
        ("get_task_status", "task_id"),
        ("cancel_task", "task_id"),
    ];
    for (tool, field) in cases {
        let err = f
            .handler
            .call_tool(tool, json!({}), &ctx())
            .await
            .expect_err("missing field");
        let err = tool_error(err);
        assert_eq!(err.code, ErrorCode::MissingRequiredField, "{tool}");
        assert_eq!(err.field.as_deref(), Some(field), "{tool}");
    }
}

#[tokio::test]
async fn list_projects_reports_boards_and_schematics() {
    let f = fixture(|_| vec![]);
    let result = f
        .handler
        .call_tool("list_projects", json!({}), &ctx())
        .await
        .expect("list_projects");

    assert_eq!(result["count"], 1);
    assert_eq!(result["projects"][0]["name"], "demo");
    assert_eq!(result["projects"][0]["has_pcb"], true);
    assert_eq!(result["projects"][0]["has_sch"], true);
    assert_eq!(result["projects"][0]["pcb_file"], "demo.kicad_pcb");
}

#[tokio::test]
async fn project_lookup_failures_carry_codes() {
    let f = fixture(|_| vec![]);

    let err = f
        .handler
        .call_tool("run_drc", json!({ "project": "ghost" }), &ctx())
        .await
        .expect_err("unknown project");
    assert_eq!(tool_error(err).code, ErrorCode::ProjectNotFound);

    let err = f
        .handler
        .call_tool("run_erc", json!({ "project": "../etc" }), &ctx())
        .await
        .expect_err("escaping name");
    assert_eq!(tool_error(err).code, ErrorCode::InvalidFieldValue);
}

#[tokio::test]
async fn run_drc_parses_the_generated_report() {
    let report = json!({
        "violations": [
            {
                "type": "clearance",
                "description": "Track too close to pad",
                "severity": "error"
            }
        ]
    });
    let f = fixture(|dir| {
        vec![Script::ok().line("Running DRC").writes(
            dir.join("output/reports/drc_report.json"),
            &report.to_string(),
        )]
    });

    let result = f
        .handler
        .call_tool("run_drc", json!({ "project": "demo" }), &ctx())
        .await
        .expect("run_drc");

    assert_eq!(result["success"], true);
    assert_eq!(result["violations"], 1);
    assert_eq!(result["summary"][0]["type"], "clearance");
    let file = result["file"].as_str().expect("report path");
    assert!(file.ends_with("drc_report.json"), "{file}");
}

#[tokio::test]
async fn a_failing_drc_run_reports_the_output() {
    let f = fixture(|_| vec![Script::exit(4).line("Error: board is corrupt")]);

    let result = f
        .handler
        .call_tool("run_drc", json!({ "project": "demo" }), &ctx())
        .await
        .expect("run_drc");

    assert_eq!(result["success"], false);
    let error = result["error"].as_str().expect("error text");
    assert!(error.contains("board is corrupt"), "{error}");
}

#[tokio::test]
async fn a_hung_tool_run_times_out_with_a_code() {
    // Zero deadline: the scripted process never exits, so the tool call
    // must come back as a timeout rather than blocking the request.
    let f = fixture_with_exec(
        |_| vec![Script::hanging().line("checking board...")],
        |exec| exec.sync_timeout_seconds = 0,
    );

    let err = f
        .handler
        .call_tool("run_drc", json!({ "project": "demo" }), &ctx())
        .await
        .expect_err("deadline");
    let err = tool_error(err);
    assert_eq!(err.code, ErrorCode::ToolTimeout);
    assert!(err.message.contains("timed out"), "{}", err.message);
}

#[tokio::test]
async fn task_status_and_listing_read_the_store() {
    let f = fixture(|_| vec![]);
    let record = TaskRecord::new(
        "route_demo_20260101_000000".to_string(),
        TaskKind::Autoroute,
        "demo".to_string(),
        json!({ "max_passes": 10 }),
    );
    f.store.insert(&record).expect("insert");
    f.store
        .append_log(&record.id, &["line one".to_string(), "line two".to_string()])
        .expect("log");

    let status = f
        .handler
        .call_tool(
            "get_task_status",
            json!({ "task_id": &record.id, "tail_lines": 1 }),
            &ctx(),
        )
        .await
        .expect("get_task_status");
    assert_eq!(status["id"], "route_demo_20260101_000000");
    assert_eq!(status["state"], "pending");
    assert_eq!(status["stale"], false);
    assert_eq!(status["log_tail"], json!(["line two"]));

    let listed = f
        .handler
        .call_tool("list_tasks", json!({ "project": "demo" }), &ctx())
        .await
        .expect("list_tasks");
    assert_eq!(listed["count"], 1);

    let none = f
        .handler
        .call_tool("list_tasks", json!({ "state": "completed" }), &ctx())
        .await
        .expect("list_tasks");
    assert_eq!(none["count"], 0);

    let err = f
        .handler
        .call_tool("list_tasks", json!({ "state": "zombie" }), &ctx())
        .await
        .expect_err("bad state");
    assert_eq!(tool_error(err).code, ErrorCode::InvalidFieldValue);

    let err = f
        .handler
        .call_tool("get_task_status", json!({ "task_id": "route_missing" }), &ctx())
        .await
        .expect_err("unknown task");
    assert_eq!(tool_error(err).code, ErrorCode::TaskNotFound);

    // Pending record with no live process behind it.
    let err = f
        .handler
        .call_tool("cancel_task", json!({ "task_id": &record.id }), &ctx())
        .await
        .expect_err("nothing to cancel");
    assert_eq!(tool_error(err).code, ErrorCode::TaskNotRunning);
}

#[tokio::test]
async fn read_file_handles_text_and_binary_content() {
    let f = fixture(|_| vec![]);
    let out = f.root.join("demo/output");
    fs::create_dir_all(out.join("3d")).expect("dirs");
    fs::write(out.join("report.txt"), "all clear").expect("text file");
    let png = [0x89u8, 0x50, 0x4e, 0x47];
    fs::write(out.join("3d/pcb_top.png"), png).expect("binary file");

    let text = f
        .handler
        .call_tool(
            "read_file",
            json!({ "filepath": "demo/output/report.txt" }),
            &ctx(),
        )
        .await
        .expect("text read");
    assert_eq!(text["encoding"], "utf-8");
    assert_eq!(text["content"], "all clear");

    let binary = f
        .handler
        .call_tool(
            "read_file",
            json!({ "filepath": "demo/output/3d/pcb_top.png" }),
            &ctx(),
        )
        .await
        .expect("binary read");
    assert_eq!(binary["encoding"], "base64");
    let decoded = STANDARD
        .decode(binary["content"].as_str().expect("base64 payload"))
        .expect("valid base64");
    assert_eq!(decoded, png);

    let err = f
        .handler
        .call_tool("read_file", json!({ "filepath": "/etc/hostname" }), &ctx())
        .await
        .expect_err("outside the projects root");
    let code = tool_error(err).code;
    assert!(
        code == ErrorCode::InvalidFieldValue || code == ErrorCode::FileNotFound,
        "{code:?}"
    );
}

#[tokio::test]
async fn get_version_reports_missing_tooling() {
    let f = fixture(|_| vec![Script::broken(), Script::broken()]);
    fs::remove_file(&f.jar).expect("drop jar");

    let result = f
        .handler
        .call_tool("get_version", json!({}), &ctx())
        .await
        .expect("get_version");

    assert_eq!(result["kicad"], "not installed");
    assert_eq!(result["pcbnew_api"], false);
    assert_eq!(result["freerouting"], false);
    assert_eq!(result["server"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn output_files_are_listed_relative_to_the_output_tree() {
    let f = fixture(|_| vec![]);
    let gerber = f.root.join("demo/output/gerber");
    fs::create_dir_all(&gerber).expect("dirs");
    fs::write(gerber.join("demo-F_Cu.gbr"), vec![b'x'; 2048]).expect("gerber");

    let result = f
        .handler
        .call_tool("get_output_files", json!({ "project": "demo" }), &ctx())
        .await
        .expect("get_output_files");

    assert_eq!(result["count"], 1);
    assert_eq!(result["files"][0]["name"], "demo-F_Cu.gbr");
    assert_eq!(result["files"][0]["path"], "gerber/demo-F_Cu.gbr");
    assert_eq!(result["files"][0]["size"], "2.0KB");
}

#[tokio::test]
async fn auto_route_validates_before_submitting() {
    let f = fixture(|_| vec![]);

    let err = f
        .handler
        .call_tool(
            "auto_route",
            json!({ "project": "demo", "max_passes": 0 }),
            &ctx(),
        )
        .await
        .expect_err("zero passes");
    assert_eq!(tool_error(err).code, ErrorCode::InvalidFieldValue);

    fs::remove_file(&f.jar).expect("drop jar");
    let err = f
        .handler
        .call_tool("auto_route", json!({ "project": "demo" }), &ctx())
        .await
        .expect_err("router missing");
    assert_eq!(tool_error(err).code, ErrorCode::LaunchFailed);
}

#[tokio::test]
async fn auto_route_round_trips_through_the_task_tools() {
    let f = fixture(|_| vec![Script::hanging().line("Pass 1/10")]);

    let submitted = f
        .handler
        .call_tool(
            "auto_route",
            json!({ "project": "demo", "max_passes": 10 }),
            &ctx(),
        )
        .await
        .expect("auto_route");
    assert_eq!(submitted["success"], true);
    let task_id = submitted["task_id"].as_str().expect("task id").to_string();
    assert!(task_id.starts_with("route_demo_"), "{task_id}");

    let status = f
        .handler
        .call_tool("get_task_status", json!({ "task_id": &task_id }), &ctx())
        .await
        .expect("get_task_status");
    assert_eq!(status["state"], "started");
    assert_eq!(status["stale"], false);

    let cancelled = f
        .handler
        .call_tool("cancel_task", json!({ "task_id": &task_id }), &ctx())
        .await
        .expect("cancel_task");
    assert_eq!(cancelled["success"], true);

    for _ in 0..300 {
        let status = f
            .handler
            .call_tool("get_task_status", json!({ "task_id": &task_id }), &ctx())
            .await
            .expect("get_task_status");
        if status["state"] == "cancelled" {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reported cancelled");
}

#[tokio::test]
async fn export_bom_counts_lines_and_previews() {
    let f = fixture(|dir| {
        vec![Script::ok().writes(
            dir.join("output/bom/bom.csv"),
            "Ref,Qty,Value\nR1,2,10k\nC1,1,100n\n",
        )]
    });

    let result = f
        .handler
        .call_tool("export_bom", json!({ "project": "demo" }), &ctx())
        .await
        .expect("export_bom");

    assert_eq!(result["success"], true);
    assert_eq!(result["lines"], 3);
    assert_eq!(result["preview"][0], "Ref,Qty,Value");
    let file = result["file"].as_str().expect("bom path");
    assert!(file.ends_with("bom.csv"), "{file}");
}
