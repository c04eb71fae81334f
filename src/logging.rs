//! Process-wide tracing setup

use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Service-specific override, checked before `RUST_LOG`
pub const LOG_ENV: &str = "LOAN_LOG";

fn rotation(name: &str) -> Rotation {
    match name {
        "hourly" => Rotation::HOURLY,
        "daily" => Rotation::DAILY,
        _ => Rotation::NEVER,
    }
}

/// Configured level for our own events; sqlx logs every statement at info
pub fn default_directives(level: &str) -> String {
    format!("{},sqlx=warn,hyper=warn,reqwest=warn", level)
}

/// Install the global subscriber. Keep the guard alive for the whole process
/// or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let appender =
        RollingFileAppender::new(rotation(&config.rotation), &config.log_dir, &config.log_file);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    // JSON goes to the file only; text goes to the file and the terminal
    let (json_file, text_file, terminal) = if config.use_json {
        let layer = fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .with_writer(writer)
            .with_ansi(false);
        (Some(layer), None, None)
    } else {
        let file = fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_writer(writer)
            .with_ansi(false);
        let terminal = fmt::layer().with_target(false).with_ansi(true);
        (None, Some(file), Some(terminal))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_file)
        .with(text_file)
        .with(terminal)
        .init();

    guard
}
