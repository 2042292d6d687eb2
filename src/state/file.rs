use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Durable run metrics, overwritten in place at the end of every cycle.
///
/// Missing fields default on read and unknown fields are ignored, so the
/// file stays readable across versions in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub last_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub successful_updates: u64,
    pub failed_attempts: u64,
    pub current_ip: Option<Ipv4Addr>,
    pub last_ip_change: Option<DateTime<Utc>>,
    pub avg_response_time_ms: f64,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            last_run: None,
            total_runs: 0,
            successful_updates: 0,
            failed_attempts: 0,
            current_ip: None,
            last_ip_change: None,
            avg_response_time_ms: 0.0,
        }
    }
}

impl RunState {
    /// Fold one resolver timing into the rolling average.
    ///
    /// Expects `total_runs` to already count the current run.
    pub fn record_response_time(&mut self, elapsed_ms: f64) {
        if self.total_runs <= 1 {
            self.avg_response_time_ms = elapsed_ms;
        } else {
            let prior = (self.total_runs - 1) as f64;
            self.avg_response_time_ms =
                (self.avg_response_time_ms * prior + elapsed_ms) / self.total_runs as f64;
        }
    }
}

/// Single-writer state file with crash-safe saves.
///
/// `save` writes a temp file in the same directory and renames it over the
/// target, so a crash mid-write never leaves a truncated file for the next
/// `load`.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read prior state. A missing file is not an error; an unreadable or
    /// corrupted one is logged and replaced with defaults rather than
    /// blocking the cycle.
    pub fn load(&self) -> RunState {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no prior state file, starting fresh");
            return RunState::default();
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %self.path.display(), "failed to read state file, using defaults: {e}");
                return RunState::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), "state file unparseable, using defaults: {e}");
                RunState::default()
            }
        }
    }

    pub fn save(&self, state: &RunState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::persistence(format!(
                        "failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::persistence(format!("failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).map_err(|e| {
                Error::persistence(format!(
                    "failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).map_err(|e| {
                Error::persistence(format!(
                    "failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.sync_all().map_err(|e| {
                Error::persistence(format!(
                    "failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            Error::persistence(format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        debug!(path = %self.path.display(), "run state saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("json.tmp");
        temp
    }
}
