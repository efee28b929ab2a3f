//! Fabrication and documentation exports.
//!
//! Every export resolves the project, makes sure the `output/` tree exists,
//! runs kicad-cli, and reports where the artifacts landed. Failures of the
//! underlying tool come back as `success: false` payloads; only argument
//! and project validation raise structured errors.

use super::{checks, get_string, make_tool, project_board, project_schematic, run_sync};
use crate::config::ExecConfig;
use crate::error::ToolError;
use crate::kicad;
use crate::project::{self, Projects};
use crate::runner::ProcessRunner;
use anyhow::Result;
use rmcp::model::Tool;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;

pub fn get_tools() -> Vec<Tool> {
    vec![
        make_tool(
            "export_gerber",
            "Export Gerber and drill files for manufacturing into output/gerber/.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_bom",
            "Export the bill of materials as CSV into output/bom/.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_netlist",
            "Export the schematic netlist into output/netlist/.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                },
                "format": {
                    "type": "string",
                    "enum": ["kicadxml", "spice", "cadstar", "orcadpcb2"],
                    "default": "kicadxml",
                    "description": "Netlist format"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_svg",
            "Export board images as SVG into output/images/. The bottom view is mirrored.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                },
                "view": {
                    "type": "string",
                    "enum": ["top", "bottom", "all"],
                    "default": "all",
                    "description": "Which side to export"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_pdf",
            "Export the board as PDF into output/docs/. Accepts a layer preset (top, bottom, all) or an explicit comma-separated layer list.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                },
                "layers": {
                    "type": "string",
                    "default": "all",
                    "description": "Layer preset or comma-separated layer names"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_sch_pdf",
            "Export the schematic as PDF into output/docs/.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_sch_svg",
            "Export the schematic sheets as SVG into output/images/.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_step",
            "Export the 3D STEP model into output/3d/.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_3d",
            "Render the board as PNG images into output/3d/. 'all' renders top, bottom and an isometric view.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                },
                "view": {
                    "type": "string",
                    "enum": ["top", "bottom", "front", "back", "iso", "iso_back", "all"],
                    "default": "top",
                    "description": "Camera preset"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_jlcpcb",
            "Export a complete JLCPCB fabrication package (gerbers, drill, BOM, pick-and-place) into output/jlcpcb/.",
            json!({
                "project": {
                    "type": "string",
                    "description": "Project directory name"
                }
            }),
            vec!["project"],
        ),
        make_tool(
            "export_all",
            "Run DRC, ERC and every standard export for a project in one call.",
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

fn require_project(args: &Value) -> Result<String> {
    get_string(args, "project")
        .ok_or_else(|| ToolError::missing_field("project").into())
}

/// Entry names of a directory, the way a flat listing reports them.
fn dir_entries(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            let mut names: Vec<String> = entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            names
        })
        .unwrap_or_default()
}

pub async fn export_gerber(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let (dir, pcb) = project_board(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let out = dir.join("output/gerber");

    let gerbers = run_sync(runner, exec, kicad::export_gerbers(exec, &pcb, &out)).await?;
    let drill = run_sync(runner, exec, kicad::export_drill(exec, &pcb, &out)).await?;

    if gerbers.success() && drill.success() {
        let files = dir_entries(&out);
        let count = files.len();
        return Ok(json!({
            "success": true,
            "dir": out.display().to_string(),
            "files": files,
            "count": count
        }));
    }
    Ok(json!({
        "success": false,
        "error": format!("{} {}", gerbers.joined(), drill.joined()).trim()
    }))
}

pub async fn export_bom(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let (dir, sch) = project_schematic(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let out = dir.join("output/bom/bom.csv");

    let output = run_sync(runner, exec, kicad::export_bom(exec, &sch, &out)).await?;
    if output.success() && out.exists() {
        let content = fs::read_to_string(&out)?;
        let lines: Vec<&str> = content.lines().collect();
        return Ok(json!({
            "success": true,
            "file": out.display().to_string(),
            "lines": lines.len(),
            "preview": lines.iter().take(5).collect::<Vec<_>>()
        }));
    }
    Ok(json!({ "success": false, "error": output.joined() }))
}

pub async fn export_netlist(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let format = get_string(&args, "format").unwrap_or_else(|| "kicadxml".to_string());
    if !matches!(format.as_str(), "kicadxml" | "spice" | "cadstar" | "orcadpcb2") {
        return Err(ToolError::invalid_value(
            "format",
            "expected kicadxml, spice, cadstar or orcadpcb2",
        )
        .into());
    }
    let (dir, sch) = project_schematic(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let out = dir.join(format!(
        "output/netlist/netlist.{}",
        kicad::netlist_extension(&format)
    ));

    let output = run_sync(runner, exec, kicad::export_netlist(exec, &sch, &format, &out)).await?;
    if output.success() && out.exists() {
        return Ok(json!({
            "success": true,
            "file": out.display().to_string(),
            "format": format
        }));
    }
    Ok(json!({ "success": false, "error": output.joined() }))
}

pub async fn export_svg(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let view = get_string(&args, "view").unwrap_or_else(|| "all".to_string());
    let views: Vec<kicad::SvgView> = if view == "all" {
        kicad::SVG_VIEWS.to_vec()
    } else {
        match kicad::svg_view(&view) {
            Some(v) => vec![v],
            None => {
                return Err(ToolError::invalid_value(
                    "view",
                    format!("unknown view {view}, expected top, bottom or all"),
                )
                .into());
            }
        }
    };

    let (dir, pcb) = project_board(projects, &project)?;
    project::ensure_output_dirs(&dir)?;

    let mut results = Map::new();
    let mut files = Vec::new();
    for v in views {
        let out_file = dir.join(format!("output/images/pcb_{}.svg", v.name));
        let output = run_sync(
            runner,
            exec,
            kicad::export_pcb_svg(exec, &pcb, v.layers, v.mirror, &out_file),
        )
        .await?;
        let ok = output.success() && out_file.exists();
        if ok {
            files.push(out_file.display().to_string());
        }
        results.insert(
            v.name.to_string(),
            json!({
                "success": ok,
                "file": ok.then(|| out_file.display().to_string())
            }),
        );
    }

    Ok(json!({
        "success": !files.is_empty(),
        "files": files,
        "results": results
    }))
}

pub async fn export_pdf(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let layers = get_string(&args, "layers").unwrap_or_else(|| "all".to_string());
    let (dir, pcb) = project_board(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let out = dir.join(format!("output/docs/pcb_{layers}.pdf"));

    let output = run_sync(
        runner,
        exec,
        kicad::export_pcb_pdf(exec, &pcb, kicad::pdf_layers(&layers), &out),
    )
    .await?;
    if output.success() && out.exists() {
        return Ok(json!({
            "success": true,
            "file": out.display().to_string()
        }));
    }
    Ok(json!({ "success": false, "error": output.joined() }))
}

pub async fn export_sch_pdf(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let (dir, sch) = project_schematic(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let out = dir.join("output/docs/schematic.pdf");

    let output = run_sync(runner, exec, kicad::export_sch_pdf(exec, &sch, &out)).await?;
    if output.success() && out.exists() {
        return Ok(json!({
            "success": true,
            "file": out.display().to_string()
        }));
    }
    Ok(json!({ "success": false, "error": output.joined() }))
}

pub async fn export_sch_svg(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let (dir, sch) = project_schematic(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let out_dir = dir.join("output/images");

    let output = run_sync(runner, exec, kicad::export_sch_svg(exec, &sch, &out_dir)).await?;
    if output.success() {
        // One SVG per sheet, named by kicad-cli.
        let files: Vec<String> = dir_entries(&out_dir)
            .into_iter()
            .filter(|name| name.ends_with(".svg"))
            .map(|name| out_dir.join(name).display().to_string())
            .collect();
        return Ok(json!({ "success": true, "files": files }));
    }
    Ok(json!({ "success": false, "error": output.joined() }))
}

pub async fn export_step(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let (dir, pcb) = project_board(projects, &project)?;
    project::ensure_output_dirs(&dir)?;
    let out = dir.join("output/3d/pcb.step");

    let output = run_sync(runner, exec, kicad::export_step(exec, &pcb, &out)).await?;
    if output.success() && out.exists() {
        let size = fs::metadata(&out)?.len();
        return Ok(json!({
            "success": true,
            "file": out.display().to_string(),
            "size": format!("{:.1}MB", size as f64 / 1024.0 / 1024.0)
        }));
    }
    Ok(json!({ "success": false, "error": output.joined() }))
}

pub async fn export_3d(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let view = get_string(&args, "view").unwrap_or_else(|| "top".to_string());
    let views: Vec<kicad::RenderView> = if view == "all" {
        kicad::RENDER_ALL
            .iter()
            .filter_map(|name| kicad::render_view(name))
            .collect()
    } else {
        match kicad::render_view(&view) {
            Some(v) => vec![v],
            None => {
                return Err(ToolError::invalid_value(
                    "view",
                    format!(
                        "unknown view {view}, expected top, bottom, front, back, iso, iso_back or all"
                    ),
                )
                .into());
            }
        }
    };

    let (dir, pcb) = project_board(projects, &project)?;
    project::ensure_output_dirs(&dir)?;

    let total = views.len();
    let mut results = Map::new();
    let mut files = Vec::new();
    for v in views {
        let out_file = dir.join(format!("output/3d/pcb_{}.png", v.name));
        let spec = kicad::render(exec, &pcb, v.side, v.rotate, &out_file).current_dir(&dir);
        let output = run_sync(runner, exec, spec).await?;
        let ok = output.success() && out_file.exists();

        let size = if ok {
            fs::metadata(&out_file)
                .ok()
                .map(|m| format!("{:.1}KB", m.len() as f64 / 1024.0))
        } else {
            None
        };
        if ok {
            files.push(out_file.display().to_string());
        }
        results.insert(
            v.name.to_string(),
            json!({
                "success": ok,
                "file": ok.then(|| out_file.display().to_string()),
                "size": size,
                "error": (!ok).then(|| output.joined())
            }),
        );
    }

    let rendered = files.len();
    Ok(json!({
        "success": rendered > 0,
        "results": results,
        "files": files,
        "message": format!("rendered {rendered}/{total} views")
    }))
}

pub async fn export_jlcpcb(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    let (dir, pcb) = project_board(projects, &project)?;
    let out = dir.join("output/jlcpcb");
    fs::create_dir_all(&out)?;

    let gerbers = run_sync(runner, exec, kicad::export_gerbers(exec, &pcb, &out)).await?;
    let drill = run_sync(runner, exec, kicad::export_drill(exec, &pcb, &out)).await?;
    let gerber_ok = gerbers.success() && drill.success();

    let bom_ok = match project::find_sch(&dir) {
        Some(sch) => {
            let bom = out.join("bom.csv");
            run_sync(runner, exec, kicad::export_bom(exec, &sch, &bom))
                .await?
                .success()
        }
        None => false,
    };

    let pos = out.join("position.csv");
    let pos_ok = run_sync(runner, exec, kicad::export_pos(exec, &pcb, &pos))
        .await?
        .success()
        && pos.exists();

    let files = dir_entries(&out);
    let count = files.len();
    Ok(json!({
        "success": gerber_ok,
        "results": { "gerber": gerber_ok, "bom": bom_ok, "position": pos_ok },
        "dir": out.display().to_string(),
        "files": files,
        "count": count,
        "message": "JLCPCB package generated"
    }))
}

pub async fn export_all(
    projects: &Projects,
    runner: &dyn ProcessRunner,
    exec: &ExecConfig,
    args: Value,
) -> Result<Value> {
    let project = require_project(&args)?;
    // Validate once up front; each step re-resolves on its own.
    let dir = projects.resolve(&project)?;

    let mut results = Map::new();
    results.insert(
        "drc".to_string(),
        step(checks::run_drc(projects, runner, exec, json!({ "project": &project })).await),
    );
    results.insert(
        "erc".to_string(),
        step(checks::run_erc(projects, runner, exec, json!({ "project": &project })).await),
    );
    results.insert(
        "gerber".to_string(),
        step(export_gerber(projects, runner, exec, json!({ "project": &project })).await),
    );
    results.insert(
        "bom".to_string(),
        step(export_bom(projects, runner, exec, json!({ "project": &project })).await),
    );
    results.insert(
        "3d".to_string(),
        step(
            export_3d(projects, runner, exec, json!({ "project": &project, "view": "all" })).await,
        ),
    );
    results.insert(
        "svg".to_string(),
        step(
            export_svg(projects, runner, exec, json!({ "project": &project, "view": "all" }))
                .await,
        ),
    );
    results.insert(
        "sch_pdf".to_string(),
        step(export_sch_pdf(projects, runner, exec, json!({ "project": &project })).await),
    );

    let output = dir.join("output");
    let total_files = project::walk_files(&output)?.len();

    Ok(json!({
        "success": true,
        "results": results,
        "total_files": total_files,
        "output_dir": output.display().to_string()
    }))
}

/// Fold a step's error into its result entry so one missing schematic does
/// not abort the rest of the run.
fn step(result: Result<Value>) -> Value {
    result.unwrap_or_else(|err| {
        let tool_err = ToolError::from(err);
        serde_json::to_value(&tool_err)
            .unwrap_or_else(|_| json!({ "error": tool_err.to_string() }))
    })
}
