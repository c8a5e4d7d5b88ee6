//! Diagnostic logging setup.
//!
//! Progress lines for the user travel as `LogEvent`s; this is only the `tracing`
//! side channel. The TUI owns the terminal, so in that mode diagnostics go to a file.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub enum LogSink {
    Stderr,
    File,
}

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

pub fn log_file_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(crate::config::APP_DIR).join("course-grab.log"))
}

pub fn init(sink: LogSink) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_target(false);
    match sink {
        LogSink::Stderr => builder
            .with_env_filter(filter("course_grab=warn"))
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("init logging: {e}")),
        LogSink::File => {
            let Some(path) = log_file_path() else {
                return Ok(());
            };
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("create log dir {}", dir.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))?;
            builder
                .with_env_filter(filter("course_grab=info"))
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("init logging: {e}"))
        }
    }
}
