//! Logging setup
//!
//! Structured `tracing` output with optional per-operation timing.

use serde::{Deserialize, Serialize};
use std::io;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Whether to include file and line information
    pub include_location: bool,
    /// Whether to include thread information
    pub include_thread: bool,
    /// Log file path; stdout when unset
    pub log_file_path: Option<String>,
    /// Emit span close events with timings
    pub enable_performance_monitoring: bool,
    /// Custom filter directives
    pub filter_directives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            include_thread: false,
            log_file_path: None,
            enable_performance_monitoring: false,
            filter_directives: vec![
                "sqlx=warn".to_string(),
                "sqlsess_core=info".to_string(),
                "sqlsess_store=info".to_string(),
            ],
        }
    }
}

impl LoggingConfig {
    /// Debug-level configuration used by `--verbose`
    pub fn verbose() -> Self {
        Self {
            level: "debug".to_string(),
            include_location: true,
            enable_performance_monitoring: true,
            filter_directives: vec![
                "sqlsess_core=debug".to_string(),
                "sqlsess_store=debug".to_string(),
            ],
            ..Self::default()
        }
    }
}

fn make_writer(config: &LoggingConfig) -> io::Result<BoxMakeWriter> {
    match &config.log_file_path {
        Some(log_path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?;
            Ok(BoxMakeWriter::new(std::sync::Mutex::new(file)))
        }
        None => Ok(BoxMakeWriter::new(io::stdout)),
    }
}

/// Initialize the global subscriber
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    for directive in &config.filter_directives {
        filter = filter.add_directive(directive.parse()?);
    }

    let span_events = if config.enable_performance_monitoring {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let writer = make_writer(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let base = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_thread_ids(config.include_thread)
        .with_thread_names(config.include_thread)
        .with_writer(writer);

    match config.format {
        LogFormat::Json => registry.with(base.json()).try_init()?,
        LogFormat::Pretty => registry.with(base.pretty()).try_init()?,
        LogFormat::Compact => registry.with(base.compact()).try_init()?,
    }

    Ok(())
}

/// Timing helpers that report to the `performance` target
pub mod performance {
    use std::future::Future;
    use std::time::Instant;
    use tracing::{debug_span, Instrument};

    fn report(operation: &str, started: Instant) {
        tracing::debug!(
            target: "performance",
            operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Timed operation finished"
        );
    }

    pub async fn measure_async<F: Future>(operation: &str, future: F) -> F::Output {
        let started = Instant::now();
        let output = future
            .instrument(debug_span!("timed", operation = operation))
            .await;
        report(operation, started);
        output
    }

    pub fn measure_sync<T>(operation: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let output = debug_span!("timed", operation = operation).in_scope(f);
        report(operation, started);
        output
    }
}

/// Log the start of a store maintenance operation, with optional extra fields
#[macro_export]
macro_rules! log_operation_start {
    ($operation:expr $(, $($field:tt)+)?) => {
        tracing::info!(operation = $operation, $($($field)+,)? "Operation started")
    };
}

#[macro_export]
macro_rules! log_operation_success {
    ($operation:expr $(, $($field:tt)+)?) => {
        tracing::info!(operation = $operation, $($($field)+,)? "Operation finished")
    };
}

#[macro_export]
macro_rules! log_operation_error {
    ($operation:expr, $error:expr $(, $($field:tt)+)?) => {
        tracing::error!(
            operation = $operation,
            error = %$error,
            $($($field)+,)?
            "Operation failed"
        )
    };
}
