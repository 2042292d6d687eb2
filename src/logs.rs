use std::fs;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_PREFIX: &str = "cfddns_";
const LOG_SUFFIX: &str = ".log";

/// Initialize logging to stdout plus a per-day file under the configured
/// directory, pruning the oldest daily files beyond `max_files`.
///
/// An unusable log directory degrades to stdout-only logging rather than
/// blocking the reconciliation cycle.
pub fn init(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file = open_daily_file(config);

    match file {
        Some(file) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            tracing::warn!(
                directory = %config.directory.display(),
                "log directory unavailable, logging to stdout only"
            );
        }
    }

    prune_old_logs(&config.directory, config.max_files);
}

fn open_daily_file(config: &LoggingConfig) -> Option<fs::File> {
    if let Err(e) = fs::create_dir_all(&config.directory) {
        eprintln!(
            "cfddns: cannot create log directory {}: {}",
            config.directory.display(),
            e
        );
        return None;
    }

    let name = format!(
        "{}{}{}",
        LOG_PREFIX,
        Local::now().format("%Y-%m-%d"),
        LOG_SUFFIX
    );
    let path = config.directory.join(name);

    match fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("cfddns: cannot open log file {}: {}", path.display(), e);
            None
        }
    }
}

/// Delete the oldest daily log files so at most `max_files` remain.
///
/// File names embed the date, so lexicographic order is chronological.
fn prune_old_logs(directory: &Path, max_files: usize) {
    if max_files == 0 {
        return;
    }

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut logs: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            if name.starts_with(LOG_PREFIX) && name.ends_with(LOG_SUFFIX) {
                Some((name, entry.path()))
            } else {
                None
            }
        })
        .collect();

    if logs.len() <= max_files {
        return;
    }

    logs.sort_by(|a, b| a.0.cmp(&b.0));
    let excess = logs.len() - max_files;
    for (name, path) in logs.into_iter().take(excess) {
        match fs::remove_file(&path) {
            Ok(()) => tracing::info!(file = %name, "pruned old log file"),
            Err(e) => tracing::warn!(file = %name, "failed to prune old log file: {e}"),
        }
    }
}
