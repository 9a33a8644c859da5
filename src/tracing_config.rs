//! Tracing setup for the daemon.

use std::env;
use std::io;

use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, GeneralConfig};
use crate::core::AuradError;

const LOG_FILE_PREFIX: &str = "aurad";
const LOG_FILES_KEPT: usize = 7;

/// Initializes tracing from the daemon configuration.
///
/// The configured log level applies unless RUST_LOG overrides it.
/// Console output is human-readable by default and switches to JSON when
/// `AURAD_LOG_FORMAT=json`. With `general.log_to_file` set, the same
/// events also land in daily-rotated files under the daemon log
/// directory, without ANSI escapes.
///
/// # Errors
/// Returns error if the log directory or file appender cannot be set up,
/// or if a global subscriber is already installed.
pub fn init(general: &GeneralConfig) -> Result<(), AuradError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&general.log_level));

    let file_writer = if general.log_to_file {
        Some(file_writer()?)
    } else {
        None
    };
    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .compact()
            .with_ansi(false)
            .with_writer(writer)
    });

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    let json = env::var("AURAD_LOG_FORMAT").is_ok_and(|format| format == "json");
    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(io::stdout))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_names(true)
                    .with_writer(io::stdout),
            )
            .try_init()
    };

    installed.map_err(|e| AuradError::Config {
        location: "tracing".to_string(),
        details: e.to_string(),
    })
}

fn file_writer() -> Result<NonBlocking, AuradError> {
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .max_log_files(LOG_FILES_KEPT)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(Config::log_dir()?)
        .map_err(|e| AuradError::Config {
            location: "log directory".to_string(),
            details: e.to_string(),
        })?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    // The guard owns the flush worker; it must live as long as the
    // process does.
    std::mem::forget(guard);
    Ok(writer)
}
