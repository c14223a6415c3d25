// ~/src/logging.rs

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::paths::log_dir;

pub const LOG_FILE_NAME: &str = "alpenglow.log";

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub app_dir: PathBuf,
    /// 0 = warn, 1 = info, 2 = debug, anything higher = trace.
    pub verbosity: u8,
    pub console: bool,
}

/// Keeps the background file writer alive. Dropping it flushes pending lines.
#[must_use = "dropping the guard stops the file writer"]
pub struct LoggingGuard {
    _file: WorkerGuard,
    pub log_file: PathBuf,
}

pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Installs the process-wide subscriber: console plus a non-blocking file
/// layer under `<app>/log/`. `RUST_LOG` overrides the verbosity flag.
pub fn init(settings: LogSettings) -> anyhow::Result<LoggingGuard> {
    let dir = log_dir(&settings.app_dir);
    fs::create_dir_all(&dir)?;

    let (writer, guard) = tracing_appender::non_blocking(file_appender(&dir));

    let level = level_for_verbosity(settings.verbosity);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let console = settings.console.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()?;

    Ok(LoggingGuard {
        _file: guard,
        log_file: dir.join(LOG_FILE_NAME),
    })
}

fn file_appender(dir: &Path) -> tracing_appender::rolling::RollingFileAppender {
    tracing_appender::rolling::never(dir, LOG_FILE_NAME)
}
