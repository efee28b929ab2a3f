//! kicad-cli invocations and report parsing.
//!
//! Each function builds the exact argument list the CLI expects; nothing
//! here runs anything. Directory outputs get a trailing slash, which is how
//! kicad-cli distinguishes them from file outputs.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::config::ExecConfig;
use crate::runner::CommandSpec;

fn dir_arg(dir: &Path) -> String {
    format!("{}/", dir.display())
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

pub fn version(exec: &ExecConfig) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli).arg("--version")
}

pub fn drc(exec: &ExecConfig, pcb: &Path, report: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "drc"])
        .arg(path_arg(pcb))
        .args(["--severity-all", "--format", "json", "--output"])
        .arg(path_arg(report))
}

pub fn erc(exec: &ExecConfig, sch: &Path, report: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["sch", "erc"])
        .arg(path_arg(sch))
        .args(["--severity-all", "--format", "json", "--output"])
        .arg(path_arg(report))
}

pub fn export_gerbers(exec: &ExecConfig, pcb: &Path, out_dir: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "export", "gerbers", "--output"])
        .arg(dir_arg(out_dir))
        .arg(path_arg(pcb))
}

pub fn export_drill(exec: &ExecConfig, pcb: &Path, out_dir: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "export", "drill", "--output"])
        .arg(dir_arg(out_dir))
        .arg(path_arg(pcb))
}

pub fn export_bom(exec: &ExecConfig, sch: &Path, out_file: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["sch", "export", "bom", "--output"])
        .arg(path_arg(out_file))
        .arg(path_arg(sch))
}

pub fn export_netlist(exec: &ExecConfig, sch: &Path, format: &str, out_file: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["sch", "export", "netlist", "--format"])
        .arg(format)
        .arg("--output")
        .arg(path_arg(out_file))
        .arg(path_arg(sch))
}

/// File extension matching a netlist format.
pub fn netlist_extension(format: &str) -> &'static str {
    match format {
        "kicadxml" => "xml",
        "cadstar" | "spice" => "cir",
        _ => "net",
    }
}

pub fn export_sch_pdf(exec: &ExecConfig, sch: &Path, out_file: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["sch", "export", "pdf", "--output"])
        .arg(path_arg(out_file))
        .arg(path_arg(sch))
}

pub fn export_sch_svg(exec: &ExecConfig, sch: &Path, out_dir: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["sch", "export", "svg", "--output"])
        .arg(dir_arg(out_dir))
        .arg(path_arg(sch))
}

pub fn export_pcb_pdf(exec: &ExecConfig, pcb: &Path, layers: &str, out_file: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "export", "pdf", "--output"])
        .arg(path_arg(out_file))
        .arg("--layers")
        .arg(layers)
        .arg(path_arg(pcb))
}

pub fn export_pcb_svg(
    exec: &ExecConfig,
    pcb: &Path,
    layers: &str,
    mirror: bool,
    out_file: &Path,
) -> CommandSpec {
    let mut spec = CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "export", "svg", "--output"])
        .arg(path_arg(out_file))
        .arg("--layers")
        .arg(layers)
        .args(["--page-size-mode", "2", "--exclude-drawing-sheet"]);
    if mirror {
        spec = spec.arg("--mirror");
    }
    spec.arg(path_arg(pcb))
}

pub fn render(
    exec: &ExecConfig,
    pcb: &Path,
    side: &str,
    rotate: Option<&str>,
    out_file: &Path,
) -> CommandSpec {
    let mut spec = CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "render", "--output"])
        .arg(path_arg(out_file))
        .args(["--width", "1920", "--height", "1080", "--side"])
        .arg(side)
        .args(["--quality", "high", "--background", "opaque", "--perspective"]);
    if let Some(rotate) = rotate {
        spec = spec.args(["--rotate", rotate]);
    }
    spec.arg(path_arg(pcb)).xvfb(exec.use_xvfb)
}

pub fn export_step(exec: &ExecConfig, pcb: &Path, out_file: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "export", "step", "--output"])
        .arg(path_arg(out_file))
        .arg("--subst-models")
        .arg(path_arg(pcb))
}

pub fn export_pos(exec: &ExecConfig, pcb: &Path, out_file: &Path) -> CommandSpec {
    CommandSpec::new(&exec.kicad_cli)
        .args(["pcb", "export", "pos", "--output"])
        .arg(path_arg(out_file))
        .args(["--format", "csv", "--units", "mm", "--side", "both", "--smd-only"])
        .arg(path_arg(pcb))
}

/// 3D render viewpoint presets.
#[derive(Debug, Clone, Copy)]
pub struct RenderView {
    pub name: &'static str,
    pub side: &'static str,
    pub rotate: Option<&'static str>,
}

pub const RENDER_VIEWS: [RenderView; 6] = [
    RenderView { name: "top", side: "top", rotate: None },
    RenderView { name: "bottom", side: "bottom", rotate: None },
    RenderView { name: "front", side: "front", rotate: None },
    RenderView { name: "back", side: "back", rotate: None },
    RenderView { name: "iso", side: "top", rotate: Some("30,0,-45") },
    RenderView { name: "iso_back", side: "bottom", rotate: Some("30,0,135") },
];

/// Views rendered when the caller asks for `all`.
pub const RENDER_ALL: [&str; 3] = ["top", "bottom", "iso"];

pub fn render_view(name: &str) -> Option<RenderView> {
    RENDER_VIEWS.iter().copied().find(|v| v.name == name)
}

/// SVG board-view presets.
#[derive(Debug, Clone, Copy)]
pub struct SvgView {
    pub name: &'static str,
    pub layers: &'static str,
    pub mirror: bool,
}

pub const SVG_VIEWS: [SvgView; 2] = [
    SvgView { name: "top", layers: "F.Cu,F.SilkS,F.Mask,Edge.Cuts", mirror: false },
    SvgView { name: "bottom", layers: "B.Cu,B.SilkS,B.Mask,Edge.Cuts", mirror: true },
];

pub fn svg_view(name: &str) -> Option<SvgView> {
    SVG_VIEWS.iter().copied().find(|v| v.name == name)
}

/// Layer presets for PCB PDF export; anything else passes through verbatim.
pub fn pdf_layers(preset: &str) -> &str {
    match preset {
        "top" => "F.Cu,F.SilkS,F.Mask,Edge.Cuts",
        "bottom" => "B.Cu,B.SilkS,B.Mask,Edge.Cuts",
        "all" => "F.Cu,B.Cu,F.SilkS,B.SilkS,F.Mask,B.Mask,Edge.Cuts",
        custom => custom,
    }
}

/// One entry of a DRC/ERC report summary.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationSummary {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub desc: Option<String>,
}

/// Parsed DRC/ERC report: violation count plus the first few entries.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub violations: usize,
    pub summary: Vec<ViolationSummary>,
}

/// Parse a kicad-cli JSON check report. ERC reports sometimes use `errors`
/// instead of `violations`.
pub fn parse_check_report(content: &str) -> Option<CheckReport> {
    let data: Value = serde_json::from_str(content).ok()?;
    let entries = data
        .get("violations")
        .or_else(|| data.get("errors"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let summary = entries
        .iter()
        .take(10)
        .map(|v| ViolationSummary {
            kind: v.get("type").and_then(Value::as_str).map(String::from),
            desc: v
                .get("description")
                .and_then(Value::as_str)
                .map(String::from),
        })
        .collect();

    Some(CheckReport {
        violations: entries.len(),
        summary,
    })
}
