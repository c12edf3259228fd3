//! Structured logging bootstrap.
//!
//! Console output is human-readable text by default and JSON when `LOG_JSON` is
//! set; `LOG_FILE` adds a daily-rotated JSON log file next to it. Filtering
//! follows `RUST_LOG`, then an explicit level, then the crate default.
//!
//! ```no_run
//! use trixy_flow_indexer::observability::{self, LogSettings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Keep the guard alive for the whole process so file logs get flushed
//! let _guard = observability::init_tracing(&LogSettings::from_env())?;
//! # Ok(())
//! # }
//! ```
//!
//! ```bash
//! RUST_LOG=trixy_flow_indexer=debug,sqlx=warn trixy-indexer run
//! LOG_JSON=true LOG_FILE=./logs/indexer.log trixy-indexer run
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_FILTER: &str = "trixy_flow_indexer=info,warn";

/// Logging options, usually read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    /// Level or filter directive overriding the default
    pub level: Option<String>,
    /// Path of the rotating JSON log file
    pub file: Option<PathBuf>,
    /// JSON console output instead of pretty text
    pub json: bool,
}

impl LogSettings {
    /// Read `LOG_LEVEL`, `LOG_FILE` and `LOG_JSON`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            level: non_empty("LOG_LEVEL"),
            file: non_empty("LOG_FILE").map(PathBuf::from),
            json: non_empty("LOG_JSON")
                .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
        }
    }
}

/// Keeps the background log writer alive. Drop it last.
#[derive(Debug)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

fn build_filter(rust_log: Option<String>, level: Option<&str>) -> EnvFilter {
    match (rust_log, level) {
        (Some(directives), _) => EnvFilter::new(directives),
        (None, Some(level)) => EnvFilter::new(level),
        (None, None) => EnvFilter::new(DEFAULT_FILTER),
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created or a global
/// subscriber is already installed.
pub fn init_tracing(settings: &LogSettings) -> Result<LogGuard, Box<dyn std::error::Error>> {
    let env_filter = build_filter(std::env::var("RUST_LOG").ok(), settings.level.as_deref());

    let console_layer = if settings.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let mut file_guard = None;
    let file_layer = match settings.file {
        Some(ref path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let appender = tracing_appender::rolling::daily(
                dir,
                path.file_name().unwrap_or_else(|| OsStr::new("indexer.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);

            Some(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(
        json_output = settings.json,
        file_logging = settings.file.is_some(),
        "Tracing initialized"
    );

    Ok(LogGuard { _file: file_guard })
}

/// Subscriber for tests; output shows with `cargo test -- --nocapture`.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("trixy_flow_indexer=debug"))
        .try_init();
}
