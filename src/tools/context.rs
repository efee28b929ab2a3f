//! Per-request context passed to tool functions.

use crate::logging::Logger;

/// Per-request context passed to all tools.
///
/// Carries the unified logger, which forwards tool-level messages to both
/// tracing and the connected MCP client.
#[derive(Clone)]
pub struct ToolContext {
    /// Unified logger for this request.
    pub logger: Logger,
}

impl ToolContext {
    /// Create a new tool context with the given logger.
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}
