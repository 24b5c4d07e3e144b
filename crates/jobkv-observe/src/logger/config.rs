use std::io::IsTerminal;

use crate::logger::{error::LoggerError, format::LoggerFormat, level::LoggerLevel};

/// Environment variable overriding the configured level filter.
pub const LOG_ENV: &str = "JOBKV_LOG";

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: LoggerLevel,
    pub with_targets: bool,
    pub use_color: bool,
}

impl LoggerConfig {
    /// Level filter in effect once the environment override is applied.
    pub fn effective_level(&self) -> Result<LoggerLevel, LoggerError> {
        match std::env::var(LOG_ENV) {
            Ok(raw) if !raw.trim().is_empty() => LoggerLevel::new(raw),
            _ => Ok(self.level.clone()),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: LoggerLevel::default(),
            with_targets: true,
            use_color: std::io::stderr().is_terminal(),
        }
    }
}
