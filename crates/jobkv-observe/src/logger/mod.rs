mod config;
mod error;
mod format;
mod level;
mod log;

pub use config::{LOG_ENV, LoggerConfig};
pub use error::LoggerError;
pub use format::LoggerFormat;
pub use level::LoggerLevel;

/// Install the process-wide `tracing` subscriber described by `cfg`.
///
/// When the `JOBKV_LOG` environment variable is set it replaces the configured level filter.
pub fn init_logger(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let level = cfg.effective_level()?;
    match cfg.format {
        LoggerFormat::Text => log::text(cfg, &level),
        LoggerFormat::Json => log::json(cfg, &level),
        LoggerFormat::Journald => log::journald(&level),
    }
}
