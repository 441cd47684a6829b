//! Logging and tracing configuration
//!
//! The REPL logs to stderr. The DAP server owns stdout for the protocol in
//! stdio mode, so it logs to a file instead.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::paths;

/// Build the filter: `RUST_LOG` wins, otherwise `level` for this crate
fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jsonnet_debugger={level},warn")))
}

/// Validate a user-supplied log level
pub fn parse_level(level: &str) -> Option<&'static str> {
    match level {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

/// Initialize tracing for REPL mode (stderr logging)
pub fn init_repl(level: &str) {
    tracing_subscriber::registry()
        .with(filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for DAP mode (file logging)
///
/// Logs go to `file` if given, else `dap.log` in the data directory, falling
/// back to the working directory. The returned guard must be held until exit
/// so buffered lines are flushed.
pub fn init_dap(level: &str, file: Option<PathBuf>) -> (Option<PathBuf>, Option<WorkerGuard>) {
    let log_path = file.or_else(default_dap_log_path);

    if let Some(path) = &log_path {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
        {
            Ok(log_file) => {
                let (writer, guard) = tracing_appender::non_blocking(log_file);
                tracing_subscriber::registry()
                    .with(filter(level))
                    .with(
                        fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false)
                            .with_target(true)
                            .with_thread_names(true)
                            .with_file(true)
                            .with_line_number(true),
                    )
                    .init();
                return (log_path, Some(guard));
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
            }
        }
    }

    // Fallback: stderr only, never stdout
    tracing_subscriber::registry()
        .with(filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .init();

    (None, None)
}

/// Default location of the DAP log file
fn default_dap_log_path() -> Option<PathBuf> {
    match paths::log_dir() {
        Some(dir) => Some(dir.join("dap.log")),
        None => std::env::current_dir().ok().map(|d| d.join("dap.log")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some("debug"));
        assert_eq!(parse_level("error"), Some("error"));
        assert_eq!(parse_level("verbose"), None);
    }
}
