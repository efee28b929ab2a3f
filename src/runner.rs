//! Child process execution.
//!
//! Everything that forks lives behind [`ProcessRunner`] so the task
//! supervisor and the synchronous tools can be driven by scripted fakes in
//! tests. The real implementation pipes stdout and stderr into a single
//! line channel, the way the shell wrapper in earlier deployments merged
//! them with `2>&1`.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const LINE_CHANNEL_CAPACITY: usize = 256;

/// A command to run, described independently of how it is spawned.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Wrap in `xvfb-run -a` for tools that need a display.
    pub use_xvfb: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            use_xvfb: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn xvfb(mut self, enabled: bool) -> Self {
        self.use_xvfb = enabled;
        self
    }

    /// Final argv after xvfb wrapping, program first.
    pub fn resolved_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 3);
        if self.use_xvfb {
            argv.push("xvfb-run".to_string());
            argv.push("-a".to_string());
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Human-readable command line for logs.
    pub fn command_line(&self) -> String {
        self.resolved_argv().join(" ")
    }
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },
}

/// A running child process.
///
/// Lines arrive on a merged stdout/stderr channel. Once the channel is
/// drained (both pipes hit EOF), [`ProcessHandle::exit_code`] yields the
/// status. Dropping the handle kills the process.
pub struct ProcessHandle {
    lines: mpsc::Receiver<String>,
    exit: oneshot::Receiver<i32>,
    kill: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(
        lines: mpsc::Receiver<String>,
        exit: oneshot::Receiver<i32>,
        kill: oneshot::Sender<()>,
    ) -> Self {
        Self {
            lines,
            exit,
            kill: Some(kill),
        }
    }

    /// Next output line, or `None` once the process has closed its pipes.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Receive up to `limit` buffered lines at once. Returns 0 only when the
    /// channel is closed.
    pub async fn recv_lines(&mut self, buf: &mut Vec<String>, limit: usize) -> usize {
        self.lines.recv_many(buf, limit).await
    }

    /// Ask the process to die. Idempotent.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }

    /// Exit code, `-1` when the process was killed by a signal. Call after
    /// the line channel has closed; lines still in flight are dropped.
    pub async fn exit_code(self) -> i32 {
        self.exit.await.unwrap_or(-1)
    }
}

/// Seam between the supervisor/tools and the operating system.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn start(&self, spec: CommandSpec) -> Result<ProcessHandle, LaunchError>;
}

/// Spawns real processes via tokio.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn start(&self, spec: CommandSpec) -> Result<ProcessHandle, LaunchError> {
        let argv = spec.resolved_argv();
        debug!(cmd = %spec.command_line(), "spawning process");

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| LaunchError::Spawn {
            program: argv[0].clone(),
            message: e.to_string(),
        })?;

        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(err) => {
                        warn!(error = %err, "waiting on child failed");
                        -1
                    }
                },
                // A dropped sender also lands here, so an abandoned handle
                // takes its process down with it.
                _ = kill_rx => {
                    let _ = child.start_kill();
                    match child.wait().await {
                        Ok(status) => status.code().unwrap_or(-1),
                        Err(_) => -1,
                    }
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(ProcessHandle::new(line_rx, exit_rx, kill_tx))
    }
}

/// Everything a finished process produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub lines: Vec<String>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn joined(&self) -> String {
        self.lines.join("\n")
    }
}

/// Drain a process to completion, collecting every line.
///
/// Wrap in `tokio::time::timeout` to bound it; on timeout the dropped
/// handle kills the child.
pub async fn capture(mut handle: ProcessHandle) -> RunOutput {
    let mut lines = Vec::new();
    while let Some(line) = handle.next_line().await {
        lines.push(line);
    }
    let exit_code = handle.exit_code().await;
    RunOutput { exit_code, lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn captures_merged_output_and_exit_code() {
        let runner = TokioProcessRunner;
        let handle = runner
            .start(sh("echo out; echo err 1>&2; exit 0"))
            .await
            .unwrap();
        let output = capture(handle).await;
        assert_eq!(output.exit_code, 0);
        assert!(output.lines.contains(&"out".to_string()));
        assert!(output.lines.contains(&"err".to_string()));
    }

    #[tokio::test]
    async fn reports_nonzero_exit_codes() {
        let runner = TokioProcessRunner;
        let handle = runner.start(sh("exit 3")).await.unwrap();
        let output = capture(handle).await;
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn kill_terminates_a_long_running_process() {
        let runner = TokioProcessRunner;
        let mut handle = runner.start(sh("sleep 30")).await.unwrap();
        handle.kill();
        let output = capture(handle).await;
        assert_eq!(output.exit_code, -1);
    }

    #[tokio::test]
    async fn timeout_drop_kills_the_child() {
        let runner = TokioProcessRunner;
        let handle = runner.start(sh("sleep 30")).await.unwrap();
        let result = tokio::time::timeout(Duration::from_millis(100), capture(handle)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let runner = TokioProcessRunner;
        let result = runner
            .start(CommandSpec::new("kicad-ops-no-such-binary"))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn xvfb_wrapping_prefixes_argv() {
        let spec = CommandSpec::new("kicad-cli")
            .args(["pcb", "drc"])
            .xvfb(true);
        assert_eq!(
            spec.resolved_argv(),
            vec!["xvfb-run", "-a", "kicad-cli", "pcb", "drc"]
        );
        assert_eq!(spec.command_line(), "xvfb-run -a kicad-cli pcb drc");
    }
}
