//! Logging initialisation for vmlog-shipper.
//!
//! Operational logs always go to stderr, filtered by `RUST_LOG` (default
//! `info`). When `VMLOG_LOG_FILE=1` is set, the same events are also written
//! without ANSI colours to `vmlog-shipper.log` in the state directory (or the
//! directory passed to [`init`]).
//!
//! Returns a guard that must be kept alive for the duration of the process
//! so that buffered log lines are flushed on exit.

use std::path::{Path, PathBuf};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_NAME: &str = "vmlog-shipper.log";

pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialise the global tracing subscriber.
///
/// Call once from `main`, store the returned `LogGuard` in a local variable
/// for the duration of the process.
pub fn init(log_dir_override: Option<&Path>) -> LogGuard {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_guard = if std::env::var("VMLOG_LOG_FILE").as_deref() == Ok("1") {
        let dir = log_dir_override
            .map(Path::to_path_buf)
            .or_else(log_dir)
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        let _ = std::fs::create_dir_all(&dir);
        let file_appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

        tracing_subscriber::registry()
            .with(filter())
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter())
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();

        None
    };

    LogGuard {
        _file_guard: file_guard,
    }
}

/// `$XDG_STATE_HOME/vmlog-shipper`, else `$HOME/.local/state/vmlog-shipper`.
fn log_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        let mut p = PathBuf::from(xdg);
        p.push("vmlog-shipper");
        return Some(p);
    }
    let home = std::env::var("HOME").ok()?;
    let mut p = PathBuf::from(home);
    p.push(".local");
    p.push("state");
    p.push("vmlog-shipper");
    Some(p)
}
