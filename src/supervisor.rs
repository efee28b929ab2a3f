//! Background task supervision.
//!
//! `submit_autoroute` is the admission path: it enforces per-project mutual
//! exclusion, creates the durable record, takes the pre-mutation backup and
//! launches the first pipeline stage, all before returning the task id. The
//! rest of the pipeline runs on a spawned driver that streams process
//! output into the task log and walks the record to a terminal state. No
//! error after admission ever propagates to a caller; everything lands in
//! the record and is observed by polling.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::{ExecConfig, TasksConfig};
use crate::project::{self, Projects};
use crate::runner::{CommandSpec, LaunchError, ProcessHandle, ProcessRunner};
use crate::store::{StoreError, TaskStore};
use crate::types::{TaskKind, TaskPatch, TaskRecord, TaskState};

const LOG_BATCH: usize = 64;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a task is already running for project {project}: {task_id}")]
    Conflict { project: String, task_id: String },

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("no .kicad_pcb file found in project: {0}")]
    PcbNotFound(String),

    #[error("freerouting jar not found: {0}")]
    RouterMissing(PathBuf),

    #[error("board backup failed: {0}")]
    Backup(String),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum CancelError {
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {task_id} is not running (state: {state})")]
    NotRunning { task_id: String, state: TaskState },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What `submit_autoroute` hands back to the caller.
#[derive(Debug, Clone)]
pub struct Submitted {
    pub task_id: String,
    pub backup: PathBuf,
}

struct ActiveTask {
    project: String,
    cancel: watch::Sender<bool>,
}

/// One stage of a background pipeline.
struct Step {
    label: &'static str,
    spec: CommandSpec,
    /// File the previous stage must have produced for this one to run.
    requires: Option<PathBuf>,
}

/// Stages remaining after the first, plus temp files removed on success.
struct RoutePlan {
    steps: Vec<Step>,
    cleanup: Vec<PathBuf>,
}

enum RouteOutcome {
    Completed,
    Failed {
        message: String,
        exit_code: Option<i32>,
    },
    Cancelled {
        exit_code: i32,
    },
}

struct StepEnd {
    exit_code: i32,
    cancelled: bool,
}

pub struct TaskSupervisor {
    store: Arc<TaskStore>,
    runner: Arc<dyn ProcessRunner>,
    projects: Projects,
    exec: ExecConfig,
    tasks: TasksConfig,
    active: Mutex<HashMap<String, ActiveTask>>,
}

impl TaskSupervisor {
    pub fn new(
        store: Arc<TaskStore>,
        runner: Arc<dyn ProcessRunner>,
        projects: Projects,
        exec: ExecConfig,
        tasks: TasksConfig,
    ) -> Self {
        Self {
            store,
            runner,
            projects,
            exec,
            tasks,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Drop terminal records beyond the configured retention and log any
    /// orphans a previous server run left behind. Called once at server
    /// start.
    pub fn prune_old_tasks(&self) {
        match self.store.prune(self.tasks.retention) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "pruned old task records"),
            Err(err) => warn!(error = %err, "task record pruning failed"),
        }
        if let Ok(records) = self.store.list() {
            for record in records.iter().filter(|r| r.is_stale()) {
                warn!(
                    task = %record.id,
                    state = %record.state,
                    "orphaned task from a previous server run"
                );
            }
        }
    }

    /// Admit and start an autoroute task. Returns as soon as the first
    /// pipeline stage is running; the caller polls for everything else.
    pub async fn submit_autoroute(
        self: &Arc<Self>,
        project: &str,
        max_passes: u32,
    ) -> Result<Submitted, SubmitError> {
        let dir = self
            .projects
            .resolve(project)
            .map_err(|_| SubmitError::ProjectNotFound(project.to_string()))?;
        let pcb = project::find_pcb(&dir)
            .ok_or_else(|| SubmitError::PcbNotFound(project.to_string()))?;
        if !self.exec.freerouting_jar.exists() {
            return Err(SubmitError::RouterMissing(self.exec.freerouting_jar.clone()));
        }

        let task_id = self.store.allocate_id(TaskKind::Autoroute, project, Utc::now());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        // Conflict check and reservation are one critical section, so two
        // concurrent submits for the same project cannot both pass.
        {
            let mut active = self.active.lock().unwrap();
            if let Some((running_id, _)) =
                active.iter().find(|(_, task)| task.project == project)
            {
                return Err(SubmitError::Conflict {
                    project: project.to_string(),
                    task_id: running_id.clone(),
                });
            }
            active.insert(
                task_id.clone(),
                ActiveTask {
                    project: project.to_string(),
                    cancel: cancel_tx,
                },
            );
        }

        let record = TaskRecord::new(
            task_id.clone(),
            TaskKind::Autoroute,
            project.to_string(),
            json!({ "max_passes": max_passes }),
        );
        if let Err(err) = self.store.insert(&record) {
            self.release(&task_id);
            return Err(SubmitError::Store(err));
        }

        // Backup before anything may touch the board. Failure here means
        // the router is never launched.
        let backup = match project::ensure_output_dirs(&dir)
            .and_then(|_| project::backup_board(&dir, &pcb))
        {
            Ok(backup) => backup,
            Err(err) => {
                self.fail_pending(&task_id, format!("board backup failed: {err}"));
                return Err(SubmitError::Backup(err.to_string()));
            }
        };

        let (first, plan) = autoroute_plan(&self.exec, &dir, &pcb, max_passes);

        self.log_command(&task_id, &first.spec);
        let handle = match self.runner.start(first.spec.clone()).await {
            Ok(handle) => handle,
            Err(err) => {
                self.fail_pending(&task_id, format!("{}: {err}", first.label));
                return Err(SubmitError::Launch(err));
            }
        };

        if let Err(err) = self.store.update(
            &task_id,
            TaskPatch::state(TaskState::Started).with_backup_file(&backup),
        ) {
            drop(handle);
            self.fail_pending(&task_id, format!("recording task start failed: {err}"));
            return Err(SubmitError::Store(err));
        }

        info!(task = %task_id, project = %project, max_passes, "autoroute task started");

        let supervisor = Arc::clone(self);
        let driver_id = task_id.clone();
        tokio::spawn(async move {
            supervisor
                .drive(driver_id, first.label, handle, plan, cancel_rx)
                .await;
        });

        Ok(Submitted { task_id, backup })
    }

    /// Request cancellation of a running task. The state flips to
    /// `cancelled` once the driver observes the process die.
    pub fn cancel(&self, task_id: &str) -> Result<(), CancelError> {
        {
            let active = self.active.lock().unwrap();
            if let Some(task) = active.get(task_id) {
                let _ = task.cancel.send(true);
                info!(task = %task_id, "cancellation requested");
                return Ok(());
            }
        }
        match self.store.get(task_id) {
            Ok(record) => Err(CancelError::NotRunning {
                task_id: task_id.to_string(),
                state: record.state,
            }),
            Err(StoreError::NotFound(id)) => Err(CancelError::NotFound(id)),
            Err(err) => Err(CancelError::Store(err)),
        }
    }

    async fn drive(
        self: Arc<Self>,
        task_id: String,
        first_label: &'static str,
        handle: ProcessHandle,
        plan: RoutePlan,
        mut cancel: watch::Receiver<bool>,
    ) {
        let outcome = self
            .run_plan(&task_id, first_label, handle, plan, &mut cancel)
            .await;

        let patch = match outcome {
            RouteOutcome::Completed => {
                info!(task = %task_id, "autoroute completed");
                TaskPatch::state(TaskState::Completed)
                    .with_exit_code(0)
                    .with_message("Autorouting completed, board updated")
            }
            RouteOutcome::Failed { message, exit_code } => {
                warn!(task = %task_id, message = %message, "autoroute failed");
                let mut patch = TaskPatch::state(TaskState::Failed).with_message(message);
                if let Some(code) = exit_code {
                    patch = patch.with_exit_code(code);
                }
                patch
            }
            RouteOutcome::Cancelled { exit_code } => {
                info!(task = %task_id, "autoroute cancelled");
                TaskPatch::state(TaskState::Cancelled)
                    .with_exit_code(exit_code)
                    .with_message("Cancelled by request")
            }
        };

        if let Err(err) = self.store.update(&task_id, patch) {
            error!(task = %task_id, error = %err, "recording terminal task state failed");
        }
        self.release(&task_id);
    }

    async fn run_plan(
        &self,
        task_id: &str,
        first_label: &'static str,
        first_handle: ProcessHandle,
        plan: RoutePlan,
        cancel: &mut watch::Receiver<bool>,
    ) -> RouteOutcome {
        let mut label = first_label;
        let mut handle = first_handle;
        let mut remaining = plan.steps.into_iter();

        loop {
            let end = self.pump_step(task_id, handle, cancel).await;
            if end.cancelled {
                return RouteOutcome::Cancelled {
                    exit_code: end.exit_code,
                };
            }
            if end.exit_code != 0 {
                return RouteOutcome::Failed {
                    message: format!("{label} exited with code {}", end.exit_code),
                    exit_code: Some(end.exit_code),
                };
            }

            let step = match remaining.next() {
                Some(step) => step,
                None => {
                    for path in &plan.cleanup {
                        if path.exists() {
                            let _ = std::fs::remove_file(path);
                        }
                    }
                    return RouteOutcome::Completed;
                }
            };

            if *cancel.borrow() {
                return RouteOutcome::Cancelled {
                    exit_code: end.exit_code,
                };
            }
            if let Some(required) = &step.requires {
                if !required.exists() {
                    return RouteOutcome::Failed {
                        message: format!("{label} did not produce {}", required.display()),
                        exit_code: None,
                    };
                }
            }

            self.log_command(task_id, &step.spec);
            handle = match self.runner.start(step.spec.clone()).await {
                Ok(handle) => handle,
                Err(err) => {
                    return RouteOutcome::Failed {
                        message: format!("{}: {err}", step.label),
                        exit_code: None,
                    };
                }
            };
            label = step.label;
        }
    }

    /// Stream one stage's output into the log until its pipes close, then
    /// collect the exit code. Cancellation kills the process but keeps
    /// draining so the log stays complete.
    async fn pump_step(
        &self,
        task_id: &str,
        mut handle: ProcessHandle,
        cancel: &mut watch::Receiver<bool>,
    ) -> StepEnd {
        let mut cancelled = *cancel.borrow_and_update();
        if cancelled {
            handle.kill();
        }
        let mut cancel_gone = false;

        loop {
            let mut buf = Vec::new();
            tokio::select! {
                n = handle.recv_lines(&mut buf, LOG_BATCH) => {
                    if n == 0 {
                        break;
                    }
                    if let Err(err) = self.store.append_log(task_id, &buf) {
                        warn!(task = %task_id, error = %err, "appending task log failed");
                    }
                    if let Some(progress) = progress_marker(&buf) {
                        if let Err(err) = self
                            .store
                            .update(task_id, TaskPatch::default().with_progress(progress))
                        {
                            warn!(task = %task_id, error = %err, "recording progress failed");
                        }
                    }
                }
                changed = cancel.changed(), if !cancelled && !cancel_gone => {
                    match changed {
                        Ok(()) => {
                            if *cancel.borrow_and_update() {
                                cancelled = true;
                                handle.kill();
                            }
                        }
                        Err(_) => cancel_gone = true,
                    }
                }
            }
        }

        let exit_code = handle.exit_code().await;
        StepEnd {
            exit_code,
            cancelled,
        }
    }

    fn log_command(&self, task_id: &str, spec: &CommandSpec) {
        if let Err(err) = self
            .store
            .append_log(task_id, &[format!("$ {}", spec.command_line())])
        {
            warn!(task = %task_id, error = %err, "appending task log failed");
        }
    }

    fn fail_pending(&self, task_id: &str, message: String) {
        if let Err(err) = self
            .store
            .update(task_id, TaskPatch::state(TaskState::Failed).with_message(message))
        {
            error!(task = %task_id, error = %err, "recording admission failure failed");
        }
        self.release(task_id);
    }

    fn release(&self, task_id: &str) {
        self.active.lock().unwrap().remove(task_id);
    }
}

/// Build the autoroute pipeline: DSN export, FreeRouting, SES import.
/// Returns the first stage separately; it is launched on the submit path.
fn autoroute_plan(
    exec: &ExecConfig,
    dir: &Path,
    pcb: &Path,
    max_passes: u32,
) -> (Step, RoutePlan) {
    let dsn = dir.join("output/temp_route.dsn");
    let ses = dir.join("output/temp_route.ses");

    let first = Step {
        label: "dsn export",
        spec: crate::pcbnew::export_dsn(exec, pcb, &dsn),
        requires: None,
    };
    let plan = RoutePlan {
        steps: vec![
            Step {
                label: "freerouting",
                spec: freerouting_command(exec, dir, &dsn, &ses, max_passes),
                requires: Some(dsn.clone()),
            },
            Step {
                label: "ses import",
                spec: crate::pcbnew::import_ses(exec, pcb, &ses),
                requires: Some(ses.clone()),
            },
        ],
        cleanup: vec![dsn, ses],
    };
    (first, plan)
}

fn freerouting_command(
    exec: &ExecConfig,
    dir: &Path,
    dsn: &Path,
    ses: &Path,
    max_passes: u32,
) -> CommandSpec {
    CommandSpec::new(&exec.java)
        .arg("-jar")
        .arg(exec.freerouting_jar.display().to_string())
        .arg("-de")
        .arg(dsn.display().to_string())
        .arg("-do")
        .arg(ses.display().to_string())
        .arg("-mp")
        .arg(max_passes.to_string())
        .current_dir(dir)
        .xvfb(exec.use_xvfb)
}

/// Pull a router pass marker out of a log batch, e.g. `pass 3/100`.
/// The pattern is compiled once and shared across batches.
fn progress_marker(lines: &[String]) -> Option<String> {
    static PASS: OnceLock<Option<regex_lite::Regex>> = OnceLock::new();
    let re = PASS
        .get_or_init(|| regex_lite::Regex::new(r"(?i)\bpass\s+(\d+)(?:\s*/\s*(\d+))?").ok())
        .as_ref()?;
    lines.iter().rev().find_map(|line| {
        let caps = re.captures(line)?;
        let current = caps.get(1)?.as_str();
        match caps.get(2) {
            Some(total) => Some(format!("pass {current}/{}", total.as_str())),
            None => Some(format!("pass {current}")),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecConfig;
    use std::path::PathBuf;

    fn strings(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn progress_marker_finds_the_latest_pass() {
        let lines = strings(&["starting", "Pass 1 of routing", "pass 2/10 running"]);
        assert_eq!(progress_marker(&lines).as_deref(), Some("pass 2/10"));

        let no_total = strings(&["Pass 7 finished"]);
        assert_eq!(progress_marker(&no_total).as_deref(), Some("pass 7"));

        assert_eq!(progress_marker(&strings(&["no markers here"])), None);
        assert_eq!(progress_marker(&strings(&["bypass 3"])), None);
    }

    #[test]
    fn autoroute_plan_runs_export_route_import() {
        let exec = ExecConfig::default();
        let dir = PathBuf::from("/p/demo");
        let pcb = dir.join("demo.kicad_pcb");
        let (first, plan) = autoroute_plan(&exec, &dir, &pcb, 40);

        assert_eq!(first.label, "dsn export");
        assert!(first.requires.is_none());

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].label, "freerouting");
        assert_eq!(
            plan.steps[0].requires,
            Some(PathBuf::from("/p/demo/output/temp_route.dsn"))
        );
        assert_eq!(plan.steps[1].label, "ses import");
        assert_eq!(plan.cleanup.len(), 2);

        let argv = plan.steps[0].spec.resolved_argv();
        assert_eq!(argv[0], "xvfb-run");
        assert!(argv.contains(&"-jar".to_string()));
        assert!(argv.contains(&"/opt/freerouting.jar".to_string()));
        assert!(argv.contains(&"-mp".to_string()));
        assert!(argv.contains(&"40".to_string()));
        assert_eq!(plan.steps[0].spec.cwd.as_deref(), Some(dir.as_path()));
    }

    #[test]
    fn freerouting_respects_xvfb_configuration() {
        let mut exec = ExecConfig::default();
        exec.use_xvfb = false;
        let spec = freerouting_command(
            &exec,
            &PathBuf::from("/p/demo"),
            &PathBuf::from("a.dsn"),
            &PathBuf::from("a.ses"),
            10,
        );
        assert_eq!(spec.resolved_argv()[0], "java");
    }
}
