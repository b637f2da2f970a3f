use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const LOG_ENV: &str = "TASKMOVER_LOG";
pub const DEFAULT_FILTER: &str = "taskmover=info,reqwest=warn";
pub const LOG_FILE_PREFIX: &str = "taskmover.log";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber: human readable lines on stderr and, when
/// `log_dir` is given, JSON lines in a daily rolling file there.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the whole run. Calling this twice is harmless; the second call keeps
/// the first subscriber.
pub fn init(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_timer(UtcTime::rfc_3339())
        .with_filter(filter());

    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .json()
        .with_writer(writer)
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_filter(filter());

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    Ok(Some(guard))
}
