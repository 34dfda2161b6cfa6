use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::session::RemoteShell;

const PARTIAL_SUFFIX: &str = ".part";

/// Create `dir` if needed; refuse if something else sits at that path.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        return Err(Error::fs(format!("[{}] is not a directory", dir.display())));
    }
    fs::create_dir_all(dir)
        .map_err(|e| Error::fs(format!("failed to create dir {}: {e}", dir.display())))
}

pub fn job_dir(backup_dir: &Path, job: &str) -> PathBuf {
    backup_dir.join(job)
}

pub fn ensure_job_dir(backup_dir: &Path, job: &str) -> Result<PathBuf> {
    ensure_dir(backup_dir)?;
    let dir = job_dir(backup_dir, job);
    ensure_dir(&dir)?;
    Ok(dir)
}

/// A downloaded file that has not been accepted yet.
///
/// It lives under a `.part` name until `commit`; dropping it uncommitted
/// deletes it, so an aborted run never leaves a half-written or unverified
/// backup in the job directory.
#[derive(Debug)]
pub struct StagedDownload {
    partial: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedDownload {
    pub fn partial_path(&self) -> &Path {
        &self.partial
    }

    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.partial, &self.dest).map_err(|e| {
            Error::fs(format!(
                "failed to move {} into place: {e}",
                self.partial.display()
            ))
        })?;
        self.committed = true;
        Ok(self.dest.clone())
    }
}

impl Drop for StagedDownload {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// Fetch `remote_path` into `<local_dir>/<file_name>` (staged).
pub fn download(
    shell: &mut dyn RemoteShell,
    remote_path: &str,
    local_dir: &Path,
    file_name: &str,
) -> Result<StagedDownload> {
    ensure_dir(local_dir)?;
    let dest = local_dir.join(file_name);
    if dest.exists() {
        return Err(Error::fs(format!(
            "refusing to overwrite existing backup {}",
            dest.display()
        )));
    }
    let staged = StagedDownload {
        partial: local_dir.join(format!("{file_name}{PARTIAL_SUFFIX}")),
        dest,
        committed: false,
    };
    shell.download(remote_path, &staged.partial)?;
    if !staged.partial.is_file() {
        return Err(Error::transfer(format!(
            "download of {remote_path} produced no local file"
        )));
    }
    Ok(staged)
}
