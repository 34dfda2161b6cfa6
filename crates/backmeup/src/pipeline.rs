use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;

use crate::command::{ShellCommand, sh_quote};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::events::{EventSink, RunEvent};
use crate::integrity::{remote_checksum, verify_local};
use crate::job::JobSpec;
use crate::packager::{pack, prepare_workdir};
use crate::producer::{RawArtifact, RunLayout, produce, timestamp};
use crate::retention::{PruneReport, prune};
use crate::session::{Connector, RemoteShell};
use crate::transport::{download, ensure_job_dir};

/// Everything a run needs besides the job itself.
#[derive(Clone)]
pub struct RunCtx {
    pub settings: Arc<Settings>,
    pub connector: Arc<dyn Connector>,
    pub sink: Arc<dyn EventSink>,
}

impl RunCtx {
    pub fn new(
        settings: Arc<Settings>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            settings,
            connector,
            sink,
        }
    }

    pub fn log(&self, job: &str, msg: impl Into<String>) {
        self.sink.emit(RunEvent::RunLog {
            job: job.to_string(),
            line: msg.into(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: String,
    pub stored: PathBuf,
    pub digest: String,
    pub pruned: PruneReport,
}

/// Run one backup of `job` from start to finish.
///
/// The session is closed on every path. Remote leftovers of a failed run are
/// removed best-effort; local retention only runs after a stored, verified
/// backup.
pub fn run_job(job: &JobSpec, ctx: &RunCtx) -> Result<RunReport> {
    let settings = &ctx.settings;
    let local_dir = ensure_job_dir(&settings.backup_dir, &job.name)?;
    let layout = RunLayout::new(&job.name, &settings.tmp_dir, timestamp(&Local::now()));
    let raw = RawArtifact::plan(&job.kind, &layout);

    ctx.log(&job.name, format!("connecting to {}", job.host));
    let mut shell = ctx.connector.connect(&job.host)?;

    let res = transfer(shell.as_mut(), job, ctx, &layout, &raw, &local_dir);
    if res.is_err() {
        cleanup_remote(shell.as_mut(), ctx, job, &layout, &raw);
    }
    if let Err(e) = shell.close() {
        tracing::warn!(job = %job.name, error = %e, "closing session failed");
    }
    let (stored, digest) = res?;

    let pruned = match prune(&local_dir, job.retention_days) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(job = %job.name, error = %e, "retention sweep failed");
            PruneReport::default()
        }
    };
    if !pruned.removed.is_empty() {
        ctx.log(
            &job.name,
            format!("removed {} expired backup(s)", pruned.removed.len()),
        );
    }

    Ok(RunReport {
        job: job.name.clone(),
        stored,
        digest,
        pruned,
    })
}

fn transfer(
    shell: &mut dyn RemoteShell,
    job: &JobSpec,
    ctx: &RunCtx,
    layout: &RunLayout,
    raw: &RawArtifact,
    local_dir: &std::path::Path,
) -> Result<(PathBuf, String)> {
    let alg = ctx.settings.checksum;

    prepare_workdir(shell, layout)?;
    ctx.log(&job.name, format!("producing {}", raw.file_name));
    produce(shell, job, raw)?;
    let packaged = pack(shell, layout, raw, job.elevation.as_ref())?;
    let digest = remote_checksum(shell, alg, &packaged)?;
    ctx.log(&job.name, format!("remote {alg}: {digest}"));

    let staged = download(shell, &packaged, local_dir, &raw.packaged_name)?;
    if !verify_local(alg, staged.partial_path(), &digest)? {
        return Err(Error::integrity(format!(
            "{alg} of downloaded {} does not match the remote checksum",
            raw.packaged_name
        )));
    }
    let stored = staged.commit()?;
    ctx.log(&job.name, format!("stored {}", stored.display()));

    let rm = ShellCommand::new(format!("rm -f {}", sh_quote(&packaged)));
    if let Err(e) = shell.exec(&rm) {
        tracing::warn!(job = %job.name, error = %e, "failed to remove remote archive");
    }
    Ok((stored, digest))
}

fn cleanup_remote(
    shell: &mut dyn RemoteShell,
    ctx: &RunCtx,
    job: &JobSpec,
    layout: &RunLayout,
    raw: &RawArtifact,
) {
    let rm = ShellCommand::new(format!(
        "rm -f {} {}",
        sh_quote(&raw.remote_path),
        sh_quote(&layout.remote_path(&raw.packaged_name))
    ));
    match shell.run(&rm) {
        Ok(out) if out.success() => ctx.log(&job.name, "removed remote leftovers"),
        Ok(out) => tracing::warn!(job = %job.name, output = %out.summary(), "remote cleanup failed"),
        Err(e) => tracing::warn!(job = %job.name, error = %e, "remote cleanup failed"),
    }
}

/// `run_job` bracketed by start/finish events. Errors end up in the
/// `RunFinished` event as well as in the return value.
pub fn run_job_reported(job: &JobSpec, ctx: &RunCtx) -> Result<RunReport> {
    ctx.sink.emit(RunEvent::RunStarted {
        job: job.name.clone(),
    });
    let start = Instant::now();
    let res = run_job(job, ctx);
    let elapsed_ms = start.elapsed().as_millis();
    ctx.sink.emit(match &res {
        Ok(report) => RunEvent::RunFinished {
            job: job.name.clone(),
            ok: true,
            error: None,
            elapsed_ms,
            stored: Some(report.stored.clone()),
        },
        Err(e) => RunEvent::RunFinished {
            job: job.name.clone(),
            ok: false,
            error: Some(format!("{} error: {e}", e.kind())),
            elapsed_ms,
            stored: None,
        },
    });
    res
}
