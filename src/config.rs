//! Configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub exec: ExecConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            exec: ExecConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

/// Filesystem layout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory containing one subdirectory per KiCad project.
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,

    /// Directory holding task records and captured logs.
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            tasks_dir: default_tasks_dir(),
        }
    }
}

fn default_projects_root() -> PathBuf {
    PathBuf::from("/root/pcb/projects")
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from("/root/pcb/tasks")
}

/// External tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// kicad-cli binary.
    #[serde(default = "default_kicad_cli")]
    pub kicad_cli: String,

    /// Java binary used to launch FreeRouting.
    #[serde(default = "default_java")]
    pub java: String,

    /// Python interpreter with the pcbnew module available.
    #[serde(default = "default_python")]
    pub python: String,

    /// Path to the FreeRouting jar.
    #[serde(default = "default_freerouting_jar")]
    pub freerouting_jar: PathBuf,

    /// Wrap GUI-dependent commands in xvfb-run.
    #[serde(default = "default_use_xvfb")]
    pub use_xvfb: bool,

    /// Timeout for synchronous tool invocations in seconds.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_seconds: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            kicad_cli: default_kicad_cli(),
            java: default_java(),
            python: default_python(),
            freerouting_jar: default_freerouting_jar(),
            use_xvfb: default_use_xvfb(),
            sync_timeout_seconds: default_sync_timeout(),
        }
    }
}

fn default_kicad_cli() -> String {
    "kicad-cli".to_string()
}

fn default_java() -> String {
    "java".to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_freerouting_jar() -> PathBuf {
    PathBuf::from("/opt/freerouting.jar")
}

fn default_use_xvfb() -> bool {
    true
}

fn default_sync_timeout() -> u64 {
    300 // 5 minutes
}

/// Background task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Routing passes when the caller does not specify one.
    #[serde(default = "default_max_passes")]
    pub default_max_passes: u32,

    /// Terminal records kept per prune pass; older ones are deleted.
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Log lines included in status responses.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            default_max_passes: default_max_passes(),
            retention: default_retention(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

fn default_max_passes() -> u32 {
    100
}

fn default_retention() -> usize {
    200
}

fn default_log_tail_lines() -> usize {
    10
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from default locations or return defaults.
    pub fn load_or_default() -> Self {
        // Try ./kicad-ops.yaml
        if let Ok(config) = Self::load("kicad-ops.yaml") {
            return config;
        }

        // Try the user config directory
        if let Some(dir) = dirs::config_dir() {
            if let Ok(config) = Self::load(dir.join("kicad-ops-mcp/config.yaml")) {
                return config;
            }
        }

        // Fall back to defaults with environment overrides
        let mut config = Self::default();

        if let Ok(root) = std::env::var("KICAD_OPS_PROJECTS_ROOT") {
            config.paths.projects_root = PathBuf::from(root);
        }

        if let Ok(dir) = std::env::var("KICAD_OPS_TASKS_DIR") {
            config.paths.tasks_dir = PathBuf::from(dir);
        }

        if let Ok(cli) = std::env::var("KICAD_OPS_KICAD_CLI") {
            config.exec.kicad_cli = cli;
        }

        if let Ok(jar) = std::env::var("KICAD_OPS_FREEROUTING_JAR") {
            config.exec.freerouting_jar = PathBuf::from(jar);
        }

        if let Ok(java) = std::env::var("KICAD_OPS_JAVA") {
            config.exec.java = java;
        }

        config
    }

    /// Ensure the projects root and tasks directory exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.paths.projects_root)?;
        std::fs::create_dir_all(&self.paths.tasks_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_container_layout() {
        let config = Config::default();
        assert_eq!(config.paths.projects_root, PathBuf::from("/root/pcb/projects"));
        assert_eq!(config.paths.tasks_dir, PathBuf::from("/root/pcb/tasks"));
        assert_eq!(config.exec.kicad_cli, "kicad-cli");
        assert_eq!(config.tasks.default_max_passes, 100);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = r#"
paths:
  projects_root: /srv/boards
exec:
  use_xvfb: false
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.paths.projects_root, PathBuf::from("/srv/boards"));
        assert_eq!(config.paths.tasks_dir, PathBuf::from("/root/pcb/tasks"));
        assert!(!config.exec.use_xvfb);
        assert_eq!(config.exec.sync_timeout_seconds, 300);
    }
}
