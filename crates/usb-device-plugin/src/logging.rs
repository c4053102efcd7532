//! provides logging helpers

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// initiate the global tracing subscriber
///
/// Logs always go to stderr; with `log_file` set they are also written to a daily
/// rotated file next to it. The returned guard must be held until exit.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr_layer = utils::logging::get_fmt_layer().with_filter(utils::logging::env_filter());

    let Some(log_file) = log_file else {
        registry().with(stderr_layer).init();
        return Ok(None);
    };

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = log_file
        .file_name()
        .and_then(|f| f.to_str())
        .with_context(|| format!("invalid log file name: {log_file:?}"))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .max_log_files(3)
        .build(dir)
        .with_context(|| format!("create log appender in {dir:?}"))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(utils::logging::env_filter());

    registry().with(stderr_layer).with(file_layer).init();
    Ok(Some(guard))
}

/// Log panics through tracing as well as the default hook.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}
