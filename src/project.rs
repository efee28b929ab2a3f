//! Project discovery and on-disk layout.
//!
//! A project is a directory under the projects root holding a `.kicad_pcb`
//! board and usually a `.kicad_sch` schematic. Generated artifacts live in
//! the project's `output/` tree.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ToolError;

/// Subdirectories of `output/` created before any export runs.
pub const OUTPUT_SUBDIRS: [&str; 8] = [
    "output/gerber",
    "output/bom",
    "output/3d",
    "output/reports",
    "output/jlcpcb",
    "output/docs",
    "output/images",
    "output/netlist",
];

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub has_pcb: bool,
    pub has_sch: bool,
    pub pcb_file: Option<String>,
}

/// The directory tree holding all KiCad projects.
#[derive(Debug, Clone)]
pub struct Projects {
    root: PathBuf,
}

impl Projects {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every project directory, sorted by name. Hidden directories are
    /// skipped, as is anything that is not a directory.
    pub fn list(&self) -> io::Result<Vec<ProjectInfo>> {
        let mut projects = Vec::new();
        if !self.root.exists() {
            return Ok(projects);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            let dir = entry.path();
            let pcb = find_pcb(&dir);
            projects.push(ProjectInfo {
                name,
                has_pcb: pcb.is_some(),
                has_sch: find_sch(&dir).is_some(),
                pcb_file: pcb.and_then(|p| {
                    p.file_name().map(|f| f.to_string_lossy().to_string())
                }),
            });
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    /// Resolve a project name to its directory, rejecting names that could
    /// escape the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ToolError> {
        if !valid_name(name) {
            return Err(ToolError::invalid_value(
                "project",
                "project names may only contain alphanumerics, '-', '_' and '.'",
            ));
        }
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(ToolError::project_not_found(name));
        }
        Ok(dir)
    }

    /// Resolve an arbitrary path, requiring it to live under the projects
    /// root. Used by file reads so a caller cannot walk the whole host.
    pub fn confine(&self, path: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(path);
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let canonical = resolved
            .canonicalize()
            .map_err(|_| ToolError::file_not_found(path))?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| ToolError::internal(format!("projects root unavailable: {e}")))?;
        if !canonical.starts_with(&root) {
            return Err(ToolError::invalid_value(
                "path",
                "path is outside the projects root",
            ));
        }
        Ok(canonical)
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn find_by_extension(dir: &Path, extension: &str) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension)
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// First board file in the project, alphabetically.
pub fn find_pcb(dir: &Path) -> Option<PathBuf> {
    find_by_extension(dir, "kicad_pcb")
}

/// First schematic file in the project, alphabetically.
pub fn find_sch(dir: &Path) -> Option<PathBuf> {
    find_by_extension(dir, "kicad_sch")
}

/// Create the `output/` tree used by exports and reports.
pub fn ensure_output_dirs(dir: &Path) -> io::Result<()> {
    for sub in OUTPUT_SUBDIRS {
        fs::create_dir_all(dir.join(sub))?;
    }
    Ok(())
}

pub fn output_dir(dir: &Path) -> PathBuf {
    dir.join("output")
}

/// Every file under `root`, recursively, sorted by path. A missing root is
/// an empty listing, not an error.
pub fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    if root.is_dir() {
        walk(root, &mut files)?;
    }
    files.sort();
    Ok(files)
}

/// Copy the board into `output/backup/` before a mutating operation.
/// Returns the backup path.
pub fn backup_board(dir: &Path, pcb: &Path) -> io::Result<PathBuf> {
    let backup_dir = dir.join("output/backup");
    fs::create_dir_all(&backup_dir)?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let backup = backup_dir.join(format!("before_autoroute_{stamp}.kicad_pcb"));
    fs::copy(pcb, &backup)?;
    Ok(backup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_projects() -> (TempDir, Projects) {
        let tmp = TempDir::new().unwrap();
        let demo = tmp.path().join("demo");
        fs::create_dir_all(&demo).unwrap();
        fs::write(demo.join("demo.kicad_pcb"), "(kicad_pcb)").unwrap();
        fs::write(demo.join("demo.kicad_sch"), "(kicad_sch)").unwrap();

        let bare = tmp.path().join("bare");
        fs::create_dir_all(&bare).unwrap();

        fs::create_dir_all(tmp.path().join(".hidden")).unwrap();
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        let projects = Projects::new(tmp.path());
        (tmp, projects)
    }

    #[test]
    fn list_reports_board_and_schematic_presence() {
        let (_tmp, projects) = setup_projects();
        let listed = projects.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "bare");
        assert!(!listed[0].has_pcb);
        assert_eq!(listed[1].name, "demo");
        assert!(listed[1].has_pcb);
        assert!(listed[1].has_sch);
        assert_eq!(listed[1].pcb_file.as_deref(), Some("demo.kicad_pcb"));
    }

    #[test]
    fn resolve_rejects_traversal_names() {
        let (_tmp, projects) = setup_projects();
        assert!(projects.resolve("demo").is_ok());
        assert!(projects.resolve("../etc").is_err());
        assert!(projects.resolve("a/b").is_err());
        assert!(projects.resolve("").is_err());
        assert!(projects.resolve("nope").is_err());
    }

    #[test]
    fn confine_blocks_paths_outside_the_root() {
        let (tmp, projects) = setup_projects();
        let inside = tmp.path().join("demo/demo.kicad_pcb");
        assert!(projects.confine(inside.to_str().unwrap()).is_ok());
        assert!(projects.confine("demo/demo.kicad_pcb").is_ok());

        let err = projects.confine("/etc/hostname").unwrap_err();
        assert!(matches!(
            err.code,
            crate::error::ErrorCode::InvalidFieldValue | crate::error::ErrorCode::FileNotFound
        ));
        assert!(projects.confine("demo/missing.txt").is_err());
    }

    #[test]
    fn backup_copies_the_board_aside() {
        let (tmp, projects) = setup_projects();
        let dir = projects.resolve("demo").unwrap();
        let pcb = find_pcb(&dir).unwrap();
        let backup = backup_board(&dir, &pcb).unwrap();
        assert!(backup.exists());
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("before_autoroute_"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "(kicad_pcb)");
        assert!(backup.starts_with(tmp.path().join("demo/output/backup")));
    }

    #[test]
    fn output_tree_is_created_in_full() {
        let (_tmp, projects) = setup_projects();
        let dir = projects.resolve("demo").unwrap();
        ensure_output_dirs(&dir).unwrap();
        for sub in OUTPUT_SUBDIRS {
            assert!(dir.join(sub).is_dir());
        }
    }

    #[test]
    fn walk_collects_nested_files() {
        let (_tmp, projects) = setup_projects();
        let dir = projects.resolve("demo").unwrap();
        fs::create_dir_all(dir.join("output/gerber")).unwrap();
        fs::write(dir.join("output/gerber/demo-F_Cu.gbr"), "g").unwrap();
        fs::write(dir.join("output/report.txt"), "r").unwrap();

        let files = walk_files(&dir.join("output")).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("gerber/demo-F_Cu.gbr"));
        assert!(files[1].ends_with("report.txt"));

        assert!(walk_files(&dir.join("missing")).unwrap().is_empty());
    }
}
