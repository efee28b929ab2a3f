//! Project listing, output file access, and version reporting.

use super::{get_string, make_tool, run_sync};
use crate::config::ExecConfig;
use crate::error::ToolError;
use crate::project::{self, Projects};
use crate::runner::ProcessRunner;
use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use rmcp::model::Tool;
use serde_json::{json, Value};
use std::fs;

/// Files larger than this are refused by `read_file`.
const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Extensions returned base64-encoded instead of as text.
const BINARY_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "zip", "pdf", "step", "glb"];

pub fn get_tools() -> Vec<Tool> {
    vec![
        make_tool(
            "list_projects",
            "List all KiCad projects under the projects root, with whether each has a board and a schematic.",
            json!({}),
            vec![],
        ),
        make_tool(
            "get_output_files",
            "List every generated file under a project's output/ directory.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "read_file",
            "Read a file from the projects tree. Text files are returned as UTF-8; images, PDFs and 3D models are returned base64-encoded. Files over 10MB are refused.",
            json!({
                "filepath": {
                    "type": "string",
                    "description": "Path to read, absolute or relative to the projects root"
                }
            }),
            vec!["filepath"],
        ),
        make_tool(
            "get_version",
            "Report the kicad-cli version and whether the pcbnew API and FreeRouting are available.",
            json!({}),
            vec![],
        ),
    ]
}

pub fn list_projects(projects: &Projects, _args: Value) -> Result<Value> {
    let listed = projects.list()?;
    let count = listed.len();
    Ok(json!({
        "projects": listed,
        "count": count
    }))
}

pub fn get_output_files(projects: &Projects, args: Value) -> Result<Value> {
    let project =
        get_string(&args, "project").ok_or_else(|| ToolError::missing_field("project"))?;
    let dir = projects.resolve(&project)?;
    let out = project::output_dir(&dir);

    let mut files = Vec::new();
    for path in project::walk_files(&out)? {
        let size = fs::metadata(&path)?.len();
        let rel = path.strip_prefix(&out).unwrap_or(&path);
        files.push(json!({
            "name": path.file_name().map(|n| n.to_string_lossy().to_string()),
            "path": rel.display().to_string(),
            "full_path": path.display().to_string(),
            "size": human_size(size)
        }));
    }

    let count = files.len();
    Ok(json!({
        "files": files,
        "count": count
    }))
}

pub fn read_file(projects: &Projects, args: Value) -> Result<Value> {
    let filepath =
        get_string(&args, "filepath").ok_or_else(|| ToolError::missing_field("filepath"))?;
    let path = projects.confine(&filepath)?;

    let size = fs::metadata(&path)?.len();
    if size > MAX_READ_BYTES {
        return Err(ToolError::invalid_value("filepath", "file is larger than 10MB").into());
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let bytes = fs::read(&path)?;

    if BINARY_EXTENSIONS.contains(&extension.as_str()) {
        Ok(json!({
            "encoding": "base64",
            "content": STANDARD.encode(&bytes),
            "size": size
        }))
    } else {
        Ok(json!({
            "encoding": "utf-8",
            "content": String::from_utf8_lossy(&bytes),
            "size": size
        }))
    }
}

pub async fn get_version(
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    _args: Value,
) -> Result<Value> {
    let kicad = match run_sync(runner, exec, crate::kicad::version(exec)).await {
        Ok(output) if output.success() => output.joined().trim().to_string(),
        _ => "not installed".to_string(),
    };
    let pcbnew = matches!(
        run_sync(runner, exec, crate::pcbnew::probe(exec)).await,
        Ok(output) if output.success()
    );

    Ok(json!({
        "kicad": kicad,
        "pcbnew_api": pcbnew,
        "freerouting": exec.freerouting_jar.exists(),
        "server": env!("CARGO_PKG_VERSION"),
        "features": [
            "drc", "erc", "fill_zones", "board_info",
            "auto_route", "task_status", "cancel",
            "gerber", "drill", "bom", "netlist", "pos",
            "3d_render", "svg", "pdf", "step",
            "sch_pdf", "sch_svg"
        ]
    }))
}

fn human_size(bytes: u64) -> String {
    if bytes > 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes}B")
    }
}
