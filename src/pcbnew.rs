//! Bridges to KiCad's `pcbnew` Python API.
//!
//! A handful of board operations (Specctra DSN/SES, zone filling, board
//! statistics) have no kicad-cli equivalent, so they run as `python3 -c`
//! one-shots. Scripts take their paths via argv and report results as a
//! single JSON line on stdout, which [`parse_json_line`] digs out of
//! whatever else pcbnew prints.

use serde_json::Value;
use std::path::Path;

use crate::config::ExecConfig;
use crate::runner::CommandSpec;

const EXPORT_DSN_SCRIPT: &str = r#"
import sys, pcbnew
board = pcbnew.LoadBoard(sys.argv[1])
ok = pcbnew.ExportSpecctraDSN(board, sys.argv[2])
print("dsn export ok" if ok else "dsn export failed")
sys.exit(0 if ok else 1)
"#;

const IMPORT_SES_SCRIPT: &str = r#"
import sys, pcbnew
board = pcbnew.LoadBoard(sys.argv[1])
ok = pcbnew.ImportSpecctraSES(board, sys.argv[2])
if ok:
    pcbnew.SaveBoard(sys.argv[1], board)
    print("session imported")
sys.exit(0 if ok else 1)
"#;

const FILL_ZONES_SCRIPT: &str = r#"
import sys, json, pcbnew
board = pcbnew.LoadBoard(sys.argv[1])
zones = board.Zones()
count = zones.size() if hasattr(zones, "size") else len(list(zones))
if count:
    pcbnew.ZONE_FILLER(board).Fill(board.Zones())
    pcbnew.SaveBoard(sys.argv[1], board)
print(json.dumps({"zones": count}))
"#;

const BOARD_INFO_SCRIPT: &str = r#"
import sys, json, pcbnew
board = pcbnew.LoadBoard(sys.argv[1])
bbox = board.GetBoardEdgesBoundingBox()
width = bbox.GetWidth() / 1e6
height = bbox.GetHeight() / 1e6
fps = board.GetFootprints()
smd = sum(1 for f in fps if f.GetAttributes() & pcbnew.FP_SMD)
tht = sum(1 for f in fps if f.GetAttributes() & pcbnew.FP_THROUGH_HOLE)
zones = board.Zones()
zone_count = zones.size() if hasattr(zones, "size") else len(list(zones))
vias = sum(1 for t in board.GetTracks() if t.GetClass() == "PCB_VIA")
print(json.dumps({
    "board": {
        "width_mm": round(width, 2),
        "height_mm": round(height, 2),
        "area_mm2": round(width * height, 2),
        "layers": board.GetCopperLayerCount(),
    },
    "components": {"total": len(fps), "smd": smd, "tht": tht},
    "nets": board.GetNetInfo().GetNetCount(),
    "zones": zone_count,
    "vias": vias,
}))
"#;

fn script(exec: &ExecConfig, body: &str) -> CommandSpec {
    CommandSpec::new(&exec.python).arg("-c").arg(body)
}

/// Export the board to a Specctra DSN file for the router.
pub fn export_dsn(exec: &ExecConfig, pcb: &Path, dsn: &Path) -> CommandSpec {
    script(exec, EXPORT_DSN_SCRIPT)
        .arg(pcb.display().to_string())
        .arg(dsn.display().to_string())
}

/// Import a routed Specctra session back into the board and save it.
pub fn import_ses(exec: &ExecConfig, pcb: &Path, ses: &Path) -> CommandSpec {
    script(exec, IMPORT_SES_SCRIPT)
        .arg(pcb.display().to_string())
        .arg(ses.display().to_string())
}

/// Refill every copper zone and save the board.
pub fn fill_zones(exec: &ExecConfig, pcb: &Path) -> CommandSpec {
    script(exec, FILL_ZONES_SCRIPT).arg(pcb.display().to_string())
}

/// Collect board statistics (size, layers, component counts, nets, vias).
pub fn board_info(exec: &ExecConfig, pcb: &Path) -> CommandSpec {
    script(exec, BOARD_INFO_SCRIPT).arg(pcb.display().to_string())
}

/// Check whether the interpreter can import pcbnew at all.
pub fn probe(exec: &ExecConfig) -> CommandSpec {
    script(exec, "import pcbnew")
}

/// Last line of output that parses as a JSON object. pcbnew prints version
/// banners and warnings around the payload, so scan from the end.
pub fn parse_json_line(lines: &[String]) -> Option<Value> {
    lines.iter().rev().find_map(|line| {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(Value::is_object)
    })
}
