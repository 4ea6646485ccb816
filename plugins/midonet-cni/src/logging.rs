//! Tracing setup
//!
//! Stdout carries the CNI result, so log lines go to `{log_path}/midonet-cni.log`, or
//! to stderr when that file cannot be opened. `RUST_LOG` overrides the configured
//! level.

use anyhow::{Context as _, anyhow};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "midonet-cni.log";

fn filter(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => level_filter(level),
    }
}

fn level_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let level = if level.trim().is_empty() { "info" } else { level.trim() };
    EnvFilter::try_new(level).with_context(|| format!("invalid log_level {:?}", level))
}

/// Install the global subscriber. Returns the log file path when file logging is on.
pub fn init(level: &str, log_path: &str) -> anyhow::Result<Option<PathBuf>> {
    let filter = filter(level)?;
    let path = Path::new(log_path).join(LOG_FILE);
    let file = std::fs::create_dir_all(log_path).and_then(|_| OpenOptions::new().create(true).append(true).open(&path));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false);

    match file {
        Ok(file) => {
            builder
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow!("failed to install subscriber: {}", e))?;
            Ok(Some(path))
        }
        Err(e) => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow!("failed to install subscriber: {}", e))?;
            tracing::warn!("Cannot open {}: {}; logging to stderr", path.display(), e);
            Ok(None)
        }
    }
}
