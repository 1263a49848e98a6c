//! Logging initialization and log file management.
//!
//! Human-readable tracing goes to stderr. Runs against a target also write
//! JSON logs to `.parsegen/logs/<target>/<timestamp>.log` so that a failed
//! generation can be inspected afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parsegen_core::{STATE_DIR, validate_target};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use walkdir::WalkDir;

/// Log files older than this many days are removed at startup.
const LOG_RETENTION_DAYS: u64 = 3;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// With a `target`, a JSON file layer is added next to stderr output. The
/// returned guard must be held until exit so buffered lines get flushed.
///
/// # Errors
///
/// Returns an error if the log directory or file cannot be created.
pub fn init_tracing(root: &Path, target: Option<&str>) -> Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());

    let Some(target) = target else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return Ok(None);
    };

    let (writer, guard) = open_log_writer(root, target, Utc::now())?;
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(env_filter()),
        )
        .init();

    Ok(Some(guard))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Create `.parsegen/logs/<target>/` and open a fresh log file in it.
/// `target` must be a plain name so the file stays under the logs directory.
fn open_log_writer(
    root: &Path,
    target: &str,
    now: DateTime<Utc>,
) -> Result<(NonBlocking, WorkerGuard)> {
    validate_target(target)?;
    let log_dir = logs_dir(root).join(target);
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let log_path = log_dir.join(log_file_name(now));
    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("failed to create log file: {}", log_path.display()))?;

    Ok(tracing_appender::non_blocking(log_file))
}

fn logs_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("logs")
}

/// `YYYYMMDD_HHMMSS.log` in UTC.
fn log_file_name(now: DateTime<Utc>) -> String {
    format!("{}.log", now.format("%Y%m%d_%H%M%S"))
}

/// Remove `.log` files older than the retention window, then any
/// directories left empty. Best effort: runs before tracing is set up, so
/// problems are reported with `eprintln!` and never abort startup.
pub fn cleanup_old_logs(root: &Path) {
    let logs_dir = logs_dir(root);
    if !logs_dir.is_dir() {
        return;
    }

    let cutoff = SystemTime::now() - Duration::from_secs(LOG_RETENTION_DAYS * 24 * 60 * 60);

    // contents_first: a directory is visited after everything inside it,
    // so it is already emptied by the time we try to remove it.
    for entry in WalkDir::new(&logs_dir).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                eprintln!("warning: failed to walk {}: {e}", logs_dir.display());
                continue;
            }
        };
        let path = entry.path();

        if entry.file_type().is_dir() {
            // fails while non-empty, which is what we want
            let _ = fs::remove_dir(path);
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(time)) => time,
            Ok(Err(e)) => {
                eprintln!("warning: failed to read mtime of {}: {e}", path.display());
                continue;
            }
            Err(e) => {
                eprintln!("warning: failed to read metadata of {}: {e}", path.display());
                continue;
            }
        };

        if modified < cutoff
            && let Err(e) = fs::remove_file(path)
        {
            eprintln!("warning: failed to remove old log {}: {e}", path.display());
        }
    }
}
