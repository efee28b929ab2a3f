//! Unified MCP-compatible logging.
//!
//! One logger, two backends: tracing (stderr or file) and the MCP client
//! via `notify_logging_message`. MCP LoggingLevel is the canonical level
//! type; `logging/setLevel` adjusts the filter at runtime.

use rmcp::{
    model::{LoggingLevel, LoggingMessageNotificationParam},
    service::Peer,
    RoleServer,
};
use serde_json::json;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use tracing::Level;

/// Atomic level filter adjustable via `logging/setLevel`.
///
/// Levels are stored as a u8 in MCP severity order:
/// 0=Debug, 1=Info, 2=Notice, 3=Warning, 4=Error, 5=Critical, 6=Alert, 7=Emergency
pub struct LogLevelFilter(AtomicU8);

impl LogLevelFilter {
    pub fn new(level: LoggingLevel) -> Self {
        Self(AtomicU8::new(level_to_u8(level)))
    }

    pub fn get(&self) -> LoggingLevel {
        u8_to_level(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: LoggingLevel) {
        self.0.store(level_to_u8(level), Ordering::Relaxed);
    }

    /// Check if a message at the given level should be logged.
    pub fn should_log(&self, level: LoggingLevel) -> bool {
        level_to_u8(level) >= self.0.load(Ordering::Relaxed)
    }
}

impl Default for LogLevelFilter {
    fn default() -> Self {
        Self::new(LoggingLevel::Debug)
    }
}

fn level_to_u8(level: LoggingLevel) -> u8 {
    match level {
        LoggingLevel::Debug => 0,
        LoggingLevel::Info => 1,
        LoggingLevel::Notice => 2,
        LoggingLevel::Warning => 3,
        LoggingLevel::Error => 4,
        LoggingLevel::Critical => 5,
        LoggingLevel::Alert => 6,
        LoggingLevel::Emergency => 7,
    }
}

fn u8_to_level(val: u8) -> LoggingLevel {
    match val {
        0 => LoggingLevel::Debug,
        1 => LoggingLevel::Info,
        2 => LoggingLevel::Notice,
        3 => LoggingLevel::Warning,
        4 => LoggingLevel::Error,
        5 => LoggingLevel::Critical,
        6 => LoggingLevel::Alert,
        7 => LoggingLevel::Emergency,
        _ => LoggingLevel::Debug,
    }
}

/// Map an MCP level onto the nearest tracing level.
pub fn logging_level_to_tracing(level: LoggingLevel) -> Level {
    match level {
        LoggingLevel::Debug => Level::DEBUG,
        LoggingLevel::Info | LoggingLevel::Notice => Level::INFO,
        LoggingLevel::Warning => Level::WARN,
        LoggingLevel::Error
        | LoggingLevel::Critical
        | LoggingLevel::Alert
        | LoggingLevel::Emergency => Level::ERROR,
    }
}

/// Logger that writes to tracing always and to the MCP client when a peer
/// is attached.
#[derive(Clone)]
pub struct Logger {
    peer: Option<Peer<RoleServer>>,
    level_filter: Arc<LogLevelFilter>,
    name: Option<String>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            peer: None,
            level_filter: Arc::new(LogLevelFilter::default()),
            name: None,
        }
    }

    /// Set the MCP peer for client notifications.
    pub fn with_peer(mut self, peer: Peer<RoleServer>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Set the level filter.
    pub fn with_level_filter(mut self, filter: Arc<LogLevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    /// Set the logger name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Log a message to all configured backends.
    pub fn log(&self, level: LoggingLevel, message: &str) {
        if !self.level_filter.should_log(level) {
            return;
        }

        match logging_level_to_tracing(level) {
            Level::ERROR => {
                if let Some(ref name) = self.name {
                    tracing::error!(logger = %name, "{}", message);
                } else {
                    tracing::error!("{}", message);
                }
            }
            Level::WARN => {
                if let Some(ref name) = self.name {
                    tracing::warn!(logger = %name, "{}", message);
                } else {
                    tracing::warn!("{}", message);
                }
            }
            Level::INFO => {
                if let Some(ref name) = self.name {
                    tracing::info!(logger = %name, "{}", message);
                } else {
                    tracing::info!("{}", message);
                }
            }
            _ => {
                if let Some(ref name) = self.name {
                    tracing::debug!(logger = %name, "{}", message);
                } else {
                    tracing::debug!("{}", message);
                }
            }
        }

        if let Some(ref peer) = self.peer {
            let param = LoggingMessageNotificationParam {
                level,
                logger: self.name.clone(),
                data: json!({ "message": message }),
            };
            let peer = peer.clone();
            tokio::spawn(async move {
                let _ = peer.notify_logging_message(param).await;
            });
        }
    }

    pub fn debug(&self, msg: &str) {
        self.log(LoggingLevel::Debug, msg);
    }

    pub fn info(&self, msg: &str) {
        self.log(LoggingLevel::Info, msg);
    }

    pub fn warning(&self, msg: &str) {
        self.log(LoggingLevel::Warning, msg);
    }

    pub fn error(&self, msg: &str) {
        self.log(LoggingLevel::Error, msg);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_passes_at_and_above_threshold() {
        let filter = LogLevelFilter::new(LoggingLevel::Warning);

        assert!(!filter.should_log(LoggingLevel::Debug));
        assert!(!filter.should_log(LoggingLevel::Info));
        assert!(!filter.should_log(LoggingLevel::Notice));

        assert!(filter.should_log(LoggingLevel::Warning));
        assert!(filter.should_log(LoggingLevel::Error));
        assert!(filter.should_log(LoggingLevel::Emergency));
    }

    #[test]
    fn set_level_takes_effect_immediately() {
        let filter = LogLevelFilter::new(LoggingLevel::Debug);
        assert!(filter.should_log(LoggingLevel::Debug));

        filter.set(LoggingLevel::Error);
        assert!(!filter.should_log(LoggingLevel::Warning));
        assert!(filter.should_log(LoggingLevel::Error));
    }

    #[test]
    fn levels_survive_the_atomic_round_trip() {
        for level in [
            LoggingLevel::Debug,
            LoggingLevel::Info,
            LoggingLevel::Notice,
            LoggingLevel::Warning,
            LoggingLevel::Error,
            LoggingLevel::Critical,
            LoggingLevel::Alert,
            LoggingLevel::Emergency,
        ] {
            let filter = LogLevelFilter::new(level);
            assert_eq!(filter.get(), level);
        }
    }

    #[test]
    fn mcp_levels_map_onto_tracing() {
        assert_eq!(logging_level_to_tracing(LoggingLevel::Debug), Level::DEBUG);
        assert_eq!(logging_level_to_tracing(LoggingLevel::Notice), Level::INFO);
        assert_eq!(logging_level_to_tracing(LoggingLevel::Warning), Level::WARN);
        assert_eq!(
            logging_level_to_tracing(LoggingLevel::Emergency),
            Level::ERROR
        );
    }
}
