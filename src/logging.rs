use std::fs;

use time::UtcOffset;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{reload::Handle, EnvFilter};

const LOGGING_ENV_FILE: &str = "logging.env";
/// Used when `logging.env` is missing or unreadable and `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,heat_pump_sim=debug";

pub fn init_logging() -> Result<LoggingHandle<EnvFilter, impl Subscriber>, String> {
    // Everything logs through the log macros.
    tracing_log::LogTracer::init().map_err(|err| format!("failed to route log records: {}", err))?;
    init_tracing_logger()
}

#[derive(Debug)]
pub enum ReloadLogLevelError {
    InvalidFilter(String),
    ReloadFailed(tracing_subscriber::reload::Error),
}

pub fn reload_log_level(logging_handle: &LoggingHandle<EnvFilter, impl Subscriber>) -> Result<String, ReloadLogLevelError> {
    let new_filter = read_env_filter().map_err(ReloadLogLevelError::InvalidFilter)?;

    let filter_string = format!("{}", new_filter);

    logging_handle
        .handle
        .reload(new_filter)
        .map_err(ReloadLogLevelError::ReloadFailed)?;

    Ok(filter_string)
}

fn init_tracing_logger() -> Result<LoggingHandle<EnvFilter, impl Subscriber>, String> {
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        UtcOffset::current_local_offset().unwrap_or_else(|err| {
            eprintln!("Failed to get timezone: {}", err);
            UtcOffset::UTC
        }),
        time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second] +[offset_hour]"),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let env_filter = read_env_filter().unwrap_or_else(|err| {
        eprintln!("Failed to read env filter, using RUST_LOG or {}: {}", DEFAULT_FILTER, err);
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter())
    });

    println!("Env Filter: {}", env_filter);

    let builder = tracing_subscriber::fmt()
        .with_timer(timer)
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_filter_reloading();

    let handle = builder.reload_handle();

    tracing::subscriber::set_global_default(builder.finish())
        .map_err(|err| format!("failed to initialize logger: {}", err))?;

    Ok(LoggingHandle {
        _non_blocking_guard: guard,
        handle,
    })
}

fn read_env_filter() -> Result<EnvFilter, String> {
    let s = fs::read_to_string(LOGGING_ENV_FILE).map_err(|err| format!("Failed to read file {}: {}", LOGGING_ENV_FILE, err))?;
    parse_env_filter(&s)
}

fn default_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

/// Only the first line counts.
fn parse_env_filter(contents: &str) -> Result<EnvFilter, String> {
    let first_line = contents
        .lines()
        .next()
        .ok_or_else(|| format!("{} is empty", LOGGING_ENV_FILE))?;
    EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .parse(first_line)
        .map_err(|err| format!("Failed to parse env filter: {}", err))
}

/// Keep this alive for as long as logs should be written.
pub struct LoggingHandle<L, S> {
    _non_blocking_guard: WorkerGuard,
    handle: Handle<L, S>,
}
