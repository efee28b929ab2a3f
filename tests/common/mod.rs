//! Shared test support: a scripted stand-in for the process runner.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use kicad_ops_mcp::runner::{CommandSpec, LaunchError, ProcessHandle, ProcessRunner};

/// One scripted process: the lines it prints, how it exits, and the files
/// it leaves behind.
pub struct Script {
    lines: Vec<String>,
    exit_code: i32,
    files: Vec<(PathBuf, String)>,
    hang: bool,
    fail_launch: bool,
}

#[allow(dead_code)]
impl Script {
    pub fn ok() -> Self {
        Self {
            lines: Vec::new(),
            exit_code: 0,
            files: Vec::new(),
            hang: false,
            fail_launch: false,
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::ok()
        }
    }

    /// Runs until killed, then exits with -1.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::ok()
        }
    }

    /// Refuses to spawn at all.
    pub fn broken() -> Self {
        Self {
            fail_launch: true,
            ..Self::ok()
        }
    }

    pub fn line(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    /// Write a file just before the process exits successfully.
    pub fn writes(mut self, path: impl Into<PathBuf>, content: &str) -> Self {
        self.files.push((path.into(), content.to_string()));
        self
    }

    pub fn touch(self, path: impl Into<PathBuf>) -> Self {
        self.writes(path, "x")
    }
}

/// Hands out scripted processes in launch order and records every spec.
pub struct ScriptedRunner {
    scripts: Mutex<VecDeque<Script>>,
    started: Mutex<Vec<CommandSpec>>,
    on_start: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

#[allow(dead_code)]
impl ScriptedRunner {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            started: Mutex::new(Vec::new()),
            on_start: Mutex::new(None),
        })
    }

    /// Run a closure inside the next launch, before the handle is handed
    /// back. Lets a test change the world mid-submission.
    pub fn on_next_start(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_start.lock().unwrap() = Some(Box::new(hook));
    }

    /// Programs launched so far, in order.
    pub fn started_programs(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.program.clone())
            .collect()
    }

    pub fn started_specs(&self) -> Vec<CommandSpec> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn start(&self, spec: CommandSpec) -> Result<ProcessHandle, LaunchError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted runner ran out of processes");
        if script.fail_launch {
            return Err(LaunchError::Spawn {
                program: spec.program.clone(),
                message: "scripted launch failure".to_string(),
            });
        }
        self.started.lock().unwrap().push(spec);
        let hook = self.on_start.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }

        let (line_tx, line_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            for line in script.lines {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
            let code = if script.hang {
                let _ = kill_rx.await;
                -1
            } else {
                for (path, content) in &script.files {
                    if let Some(parent) = path.parent() {
                        let _ = fs::create_dir_all(parent);
                    }
                    let _ = fs::write(path, content);
                }
                script.exit_code
            };
            drop(line_tx);
            let _ = exit_tx.send(code);
        });

        Ok(ProcessHandle::new(line_rx, exit_rx, kill_tx))
    }
}
