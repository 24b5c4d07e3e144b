use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    fmt, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::logger::{config::LoggerConfig, error::LoggerError, level::LoggerLevel};

pub(crate) fn text(cfg: &LoggerConfig, level: &LoggerLevel) -> Result<(), LoggerError> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg.use_color)
        .with_target(cfg.with_targets)
        .with_timer(mk_timer());

    let subscriber = tracing_subscriber::registry()
        .with(level.filter()?)
        .with(fmt_layer);
    init_with(subscriber)
}

pub(crate) fn json(cfg: &LoggerConfig, level: &LoggerLevel) -> Result<(), LoggerError> {
    let fmt_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_timer(mk_timer());

    let subscriber = tracing_subscriber::registry()
        .with(level.filter()?)
        .with(fmt_layer);
    init_with(subscriber)
}

#[cfg(all(target_os = "linux", feature = "journald"))]
pub(crate) fn journald(level: &LoggerLevel) -> Result<(), LoggerError> {
    let journald = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?;
    let subscriber = tracing_subscriber::registry()
        .with(level.filter()?)
        .with(journald);
    init_with(subscriber)
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
pub(crate) fn journald(_level: &LoggerLevel) -> Result<(), LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}

fn mk_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn as_error(e: impl std::fmt::Display) -> LoggerError {
    let s = e.to_string();
    if s.contains("SetGlobalDefaultError") || s.contains("global default") {
        LoggerError::AlreadyInitialized
    } else {
        LoggerError::InitializationFailed(s)
    }
}

fn init_with<S>(subscriber: S) -> Result<(), LoggerError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(as_error)
}
