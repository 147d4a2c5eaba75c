//! # Local Logger
//!
//! Installs a `fern` dispatcher behind the `log` facade. Every line goes to
//! stdout and to a fresh timestamped file `<app_name>-<YYYY-MM-DD_HH-MM-SS>.log`
//! in the log directory. Older files of the same application are rotated out
//! at startup, keeping the newest `keep_previous`.

use anyhow::{Context, Result};
use chrono::Local;
use log::LevelFilter;
use std::fs;
use std::path::{Path, PathBuf};

/// Maps a configured level name to a filter. Unknown names fall back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" | "warning" => LevelFilter::Warn,
        "error" | "fatal" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// # Setup Logging
///
/// Creates `log_dir` when missing, rotates old files and installs the global
/// logger. Returns the path of the file this run writes to.
///
/// Fails if the directory or file cannot be created, or if a global logger
/// is already installed.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str, keep_previous: usize) -> Result<PathBuf> {
    let log_path = prepare_log_file(log_dir, app_name, keep_previous)?;

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S%.3f]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        // The drivers are chatty at debug level.
        .level_for("mongodb", LevelFilter::Warn)
        .level_for("hyper", LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path).with_context(|| format!("Failed to open log file {}", log_path.display()))?)
        .apply()
        .context("A global logger is already installed")?;

    Ok(log_path)
}

/// Ensures the directory exists, rotates old files and picks the new file name.
fn prepare_log_file(log_dir: &Path, app_name: &str, keep_previous: usize) -> Result<PathBuf> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir).with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    }
    cleanup_old_logs(log_dir, app_name, keep_previous)?;

    let file_name = format!("{}-{}.log", app_name, Local::now().format("%Y-%m-%d_%H-%M-%S"));
    Ok(log_dir.join(file_name))
}

/// Deletes all but the newest `keep` log files of `app_name`. Returns how many
/// files were removed. Names embed a sortable timestamp, so the name order is
/// the age order.
fn cleanup_old_logs(log_dir: &Path, app_name: &str, keep: usize) -> Result<usize> {
    let prefix = format!("{}-", app_name);
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory {}", log_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "log")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix))
        })
        .collect();

    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old in files.iter().skip(keep) {
        match fs::remove_file(old) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {}", old.display(), e),
        }
    }
    Ok(removed)
}
