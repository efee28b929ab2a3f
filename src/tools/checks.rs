//! Rule checks and board inspection.

use super::{get_string, make_tool, project_board, project_schematic, run_sync};
use crate::config::ExecConfig;
use crate::error::ToolError;
use crate::kicad;
use crate::pcbnew;
use crate::project::{self, Projects};
use crate::runner::{ProcessRunner, RunOutput};
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

pub fn get_tools() -> Vec<Tool> {
    vec![
        make_tool(
            "run_drc",
            "Run the design rule check on a project's board. Writes the full JSON report to output/reports/ and returns the violation count with the first few entries.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "run_erc",
            "Run the electrical rule check on a project's schematic. Writes the full JSON report to output/reports/ and returns the violation count with the first few entries.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "fill_zones",
            "Refill every copper zone on the board and save it in place.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "get_board_info",
            "Report board dimensions, copper layer count, component totals, nets, zones and vias.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
    ]
}

pub async fn run_drc(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project =
        get_string(&args, "project").ok_or_else(|| ToolError::missing_field("project"))?;
    let (dir, pcb) = project_board(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let report = dir.join("output/reports/drc_report.json");

    let output = run_sync(runner, exec, kicad::drc(exec, &pcb, &report)).await?;
    check_response("DRC", &report, output)
}

pub async fn run_erc(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project =
        get_string(&args, "project").ok_or_else(|| ToolError::missing_field("project"))?;
    let (dir, sch) = project_schematic(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let report = dir.join("output/reports/erc_report.json");

    let output = run_sync(runner, exec, kicad::erc(exec, &sch, &report)).await?;
    check_response("ERC", &report, output)
}

fn check_response(what: &str, report: &Path, output: RunOutput) -> Result<Value> {
    if !output.success() || !report.exists() {
        return Ok(json!({ "success": false, "error": output.joined() }));
    }
    let content = fs::read_to_string(report)?;
    match kicad::parse_check_report(&content) {
        Some(parsed) => Ok(json!({
            "success": true,
            "violations": parsed.violations,
            "file": report.display().to_string(),
            "summary": parsed.summary
        })),
        None => Ok(json!({
            "success": false,
            "error": format!("{what} report was not valid JSON")
        })),
    }
}

pub async fn fill_zones(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project =
        get_string(&args, "project").ok_or_else(|| ToolError::missing_field("project"))?;
    let (_, pcb) = project_board(projects, &project)?;

    let output = run_sync(runner, exec, pcbnew::fill_zones(exec, &pcb)).await?;
    if !output.success() {
        return Ok(json!({ "success": false, "error": output.joined() }));
    }

    let zones = pcbnew::parse_json_line(&output.lines)
        .and_then(|v| v.get("zones").and_then(Value::as_u64))
        .unwrap_or(0);
    let message = if zones == 0 {
        "no zones to fill".to_string()
    } else {
        format!("filled {zones} zones")
    };
    Ok(json!({
        "success": true,
        "message": message,
        "zones": zones,
        "file": pcb.display().to_string()
    }))
}

pub async fn get_board_info(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project =
        get_string(&args, "project").ok_or_else(|| ToolError::missing_field("project"))?;
    let (_, pcb) = project_board(projects, &project)?;

    let output = run_sync(runner, exec, pcbnew::board_info(exec, &pcb)).await?;
    if !output.success() {
        return Ok(json!({ "success": false, "error": output.joined() }));
    }

    match pcbnew::parse_json_line(&output.lines) {
        Some(Value::Object(mut info)) => {
            info.insert("success".to_string(), json!(true));
            Ok(Value::Object(info))
        }
        _ => Ok(json!({
            "success": false,
            "error": "board info script produced no JSON"
        })),
    }
}
