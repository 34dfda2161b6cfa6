use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::job::validate_retention_days;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    pub failed: Vec<(PathBuf, String)>,
}

/// Delete backups in `dir` older than `retention_days`.
pub fn prune(dir: &Path, retention_days: Option<i64>) -> Result<PruneReport> {
    prune_at(dir, retention_days, SystemTime::now())
}

/// Like `prune`, measuring age against `now`.
///
/// Zero or unset retention keeps everything. Only regular files directly in
/// `dir` are considered; a file that cannot be inspected or removed is
/// recorded in the report and the sweep goes on.
pub fn prune_at(dir: &Path, retention_days: Option<i64>, now: SystemTime) -> Result<PruneReport> {
    validate_retention_days(retention_days)?;
    let mut report = PruneReport::default();
    let days = match retention_days {
        Some(d) if d > 0 => d as u64,
        _ => return Ok(report),
    };
    if !dir.exists() {
        return Ok(report);
    }
    if !dir.is_dir() {
        return Err(Error::fs(format!("[{}] is not a directory", dir.display())));
    }
    let cutoff = now
        .checked_sub(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                report.failed.push((path, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        let modified = match entry.metadata().map_err(|e| e.to_string()).and_then(|m| {
            m.modified().map_err(|e| e.to_string())
        }) {
            Ok(t) => t,
            Err(e) => {
                report.failed.push((path, e));
                continue;
            }
        };
        if modified >= cutoff {
            report.kept += 1;
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed expired backup");
                report.removed.push(path);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove expired backup");
                report.failed.push((path, e.to_string()));
            }
        }
    }
    Ok(report)
}
