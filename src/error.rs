//! Structured error types returned to MCP clients.

use serde::Serialize;
use std::fmt;

use crate::runner::LaunchError;
use crate::store::StoreError;
use crate::supervisor::{CancelError, SubmitError};

/// Stable machine-readable error codes surfaced in tool responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingRequiredField,
    InvalidFieldValue,
    ProjectNotFound,
    PcbNotFound,
    SchematicNotFound,
    TaskNotFound,
    FileNotFound,
    TaskConflict,
    BackupFailed,
    LaunchFailed,
    TaskNotRunning,
    ToolFailed,
    ToolTimeout,
    InvalidTransition,
    StoreError,
    InternalError,
    UnknownTool,
}

/// Error payload serialized into tool call results.
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            details: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("Missing required field: {field}"),
        )
        .with_field(field)
    }

    pub fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidFieldValue,
            format!("Invalid value for {field}: {}", reason.into()),
        )
        .with_field(field)
    }

    pub fn project_not_found(project: &str) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("Project not found: {project}"),
        )
    }

    pub fn pcb_not_found(project: &str) -> Self {
        Self::new(
            ErrorCode::PcbNotFound,
            format!("No .kicad_pcb file found in project: {project}"),
        )
    }

    pub fn schematic_not_found(project: &str) -> Self {
        Self::new(
            ErrorCode::SchematicNotFound,
            format!("No .kicad_sch file found in project: {project}"),
        )
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(ErrorCode::TaskNotFound, format!("Task not found: {task_id}"))
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::new(ErrorCode::FileNotFound, format!("File not found: {path}"))
    }

    pub fn tool_failed(what: &str, diagnostic: impl Into<String>) -> Self {
        Self::new(ErrorCode::ToolFailed, format!("{what} failed")).with_details(diagnostic)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new(ErrorCode::UnknownTool, format!("Unknown tool: {name}"))
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ToolError>() {
            Ok(tool_err) => tool_err,
            Err(other) => ToolError::internal(other.to_string()),
        }
    }
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Duplicate(_) => {
                ToolError::new(ErrorCode::StoreError, err.to_string())
            }
            StoreError::NotFound(id) => ToolError::task_not_found(id),
            StoreError::InvalidTransition { .. } => {
                ToolError::new(ErrorCode::InvalidTransition, err.to_string())
            }
            StoreError::Io(_) | StoreError::Serde(_) => {
                ToolError::new(ErrorCode::StoreError, err.to_string())
            }
        }
    }
}

impl From<SubmitError> for ToolError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Conflict { project, task_id } => ToolError::new(
                ErrorCode::TaskConflict,
                format!("A task is already running for project {project}: {task_id}"),
            ),
            SubmitError::ProjectNotFound(project) => ToolError::project_not_found(&project),
            SubmitError::PcbNotFound(project) => ToolError::pcb_not_found(&project),
            SubmitError::Backup(details) => {
                ToolError::new(ErrorCode::BackupFailed, "Board backup failed")
                    .with_details(details)
            }
            SubmitError::RouterMissing(path) => ToolError::new(
                ErrorCode::LaunchFailed,
                format!("FreeRouting is not installed: {}", path.display()),
            ),
            SubmitError::Launch(inner) => ToolError::from(inner),
            SubmitError::Store(inner) => ToolError::from(inner),
        }
    }
}

impl From<CancelError> for ToolError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::NotFound(id) => ToolError::task_not_found(&id),
            CancelError::NotRunning { task_id, state } => ToolError::new(
                ErrorCode::TaskNotRunning,
                format!("Task {task_id} is not running (state: {state})"),
            ),
            CancelError::Store(inner) => ToolError::from(inner),
        }
    }
}

impl From<LaunchError> for ToolError {
    fn from(err: LaunchError) -> Self {
        ToolError::new(ErrorCode::LaunchFailed, err.to_string())
    }
}
