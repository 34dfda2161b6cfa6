use chrono::{DateTime, Local};

use crate::command::{ShellCommand, sh_quote, template};
use crate::error::Result;
use crate::job::{ArtifactKind, ExecCapture, FileCopy, JobSpec, SqlDump};
use crate::session::RemoteShell;

/// `YYYYMMDD_HHMMSS.mmm`; sorts lexically in time order.
pub fn timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S%.3f").to_string()
}

/// Names and remote locations used by one run of one job.
#[derive(Debug, Clone)]
pub struct RunLayout {
    pub job: String,
    pub stamp: String,
    // `<tmp_dir>/<job>`; no other job writes here.
    pub workdir: String,
}

impl RunLayout {
    pub fn new(job: &str, tmp_dir: &str, stamp: impl Into<String>) -> Self {
        Self {
            job: job.to_string(),
            stamp: stamp.into(),
            workdir: format!("{}/{job}", tmp_dir.trim_end_matches('/')),
        }
    }

    pub fn remote_path(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.workdir)
    }
}

/// The raw remote file a producer writes, and the name it is packaged under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub file_name: String,
    pub remote_path: String,
    pub packaged_name: String,
}

impl RawArtifact {
    /// Decide names before anything runs so a failed producer can still be
    /// cleaned up after.
    pub fn plan(kind: &ArtifactKind, layout: &RunLayout) -> Self {
        let file_name = match kind {
            ArtifactKind::Sql(_) => format!("{}_{}.sql", layout.job, layout.stamp),
            ArtifactKind::Exec(_) => format!("{}_{}.log", layout.job, layout.stamp),
            ArtifactKind::File(f) => remote_basename(&f.path).to_string(),
        };
        let packaged_name = match kind {
            // Keep `<job>_<timestamp>` so stored backups sort and prune alike.
            ArtifactKind::File(_) => format!("{}_{}.tar.gz", layout.job, layout.stamp),
            ArtifactKind::Sql(_) | ArtifactKind::Exec(_) => format!("{file_name}.tar.gz"),
        };
        Self {
            remote_path: layout.remote_path(&file_name),
            file_name,
            packaged_name,
        }
    }
}

fn remote_basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn sql_dump_command(dump: &SqlDump) -> ShellCommand {
    let mut text = format!(
        "mysqldump {} -u {} -p{}",
        dump.database,
        sh_quote(&dump.auth.username),
        sh_quote(dump.auth.password.expose())
    );
    if dump.skip_triggers {
        text.push_str(" --skip-triggers");
    }
    for table in &dump.ignore {
        text.push_str(" --ignore-table=");
        text.push_str(table);
    }
    ShellCommand::new(text).with_secret(&dump.auth.password)
}

/// The user's command as a single `sh -c` unit, so elevation and the output
/// redirect cover every part of a compound command.
pub fn exec_capture_command(exec: &ExecCapture) -> ShellCommand {
    ShellCommand::new(format!("sh -c {}", sh_quote(&exec.command)))
}

pub fn file_copy_command(file: &FileCopy, raw: &RawArtifact) -> ShellCommand {
    ShellCommand::new(format!(
        "cp {} {}",
        sh_quote(&file.path),
        sh_quote(&raw.remote_path)
    ))
}

/// Full remote command for a producer, elevation and redirection included.
pub fn produce_command(job: &JobSpec, raw: &RawArtifact) -> ShellCommand {
    let redirect = format!(" > {}", sh_quote(&raw.remote_path));
    let elevation = job.elevation.as_ref();
    match &job.kind {
        ArtifactKind::Sql(dump) => {
            let mut cmd = template(sql_dump_command(dump), elevation);
            cmd.push_str(&redirect);
            cmd
        }
        ArtifactKind::Exec(exec) => {
            let mut cmd = template(exec_capture_command(exec), elevation);
            cmd.push_str(&redirect);
            cmd
        }
        ArtifactKind::File(file) => template(file_copy_command(file, raw), elevation),
    }
}

/// Produce the job's raw artifact on the remote host.
pub fn produce(shell: &mut dyn RemoteShell, job: &JobSpec, raw: &RawArtifact) -> Result<()> {
    let cmd = produce_command(job, raw);
    shell
        .exec(&cmd)
        .map_err(|e| e.context(format!("{} producer", job.kind.type_name())))?;
    Ok(())
}
