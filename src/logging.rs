//! Structured logging configuration
//!
//! Diagnostics go to stderr (or a daily rolling file) so they never mix
//! with the report on stdout:
//! - JSON output for log collection
//! - Pretty formatting for interactive use
//! - `RUST_LOG` overrides the configured level

use crate::config::Config;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_NAME: &str = "sacct-eff.log";

/// Initialize the logging system based on configuration.
///
/// `debug` raises the level to `debug` unless `RUST_LOG` is set. The returned
/// guard flushes the log file on drop and must be held until exit.
pub fn init_logging(config: &Config, debug: bool) -> Option<WorkerGuard> {
    let level = if debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    let format = config.logging.format.as_str();
    match config.logging.output.as_str() {
        "file" => Some(init_file_logging(env_filter, format, &config.paths.log_directory)),
        "both" => Some(init_combined_logging(
            env_filter,
            format,
            &config.paths.log_directory,
        )),
        _ => {
            init_console_logging(env_filter, format);
            None
        }
    }
}

fn init_console_logging(filter: EnvFilter, format: &str) {
    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        "json" => {
            let _ = subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .try_init();
        }
        _ => {
            let _ = subscriber
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_ansi(true)
                        .pretty(),
                )
                .try_init();
        }
    }
}

fn init_file_logging(filter: EnvFilter, format: &str, log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        "json" => {
            let _ = subscriber
                .with(fmt::layer().json().with_writer(non_blocking))
                .try_init();
        }
        _ => {
            let _ = subscriber
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .try_init();
        }
    }
    guard
}

fn init_combined_logging(filter: EnvFilter, format: &str, log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        "json" => {
            let _ = subscriber
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(fmt::layer().json().with_writer(non_blocking))
                .try_init();
        }
        _ => {
            let _ = subscriber
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .try_init();
        }
    }
    guard
}
