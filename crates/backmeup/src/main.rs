use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;

use backmeup::config::LoadedConfig;
use backmeup::events::TracingSink;
use backmeup::pipeline::{RunCtx, run_job_reported};
use backmeup::scheduler::Scheduler;
use backmeup::session::SshConnector;
use backmeup::{Error, Result};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config, schedule every job and run until killed
    Run {
        /// Path to the backup definition TOML
        config: PathBuf,
    },
    /// Validate the config and print each job with its next run
    Check {
        /// Path to the backup definition TOML
        config: PathBuf,
    },
    /// Run a single job right now
    Once {
        /// Path to the backup definition TOML
        config: PathBuf,
        /// Job name as declared under [jobs]
        job: String,
    },
    /// Apply retention to stored backups without running any job
    Prune {
        /// Path to the backup definition TOML
        config: PathBuf,
        /// Only prune this job's directory
        #[arg(long)]
        job: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.cmd {
        Command::Run { config } => cmd_run(&config, args.json),
        Command::Check { config } => cmd_check(&config),
        Command::Once { config, job } => cmd_once(&config, &job, args.json),
        Command::Prune { config, job } => cmd_prune(&config, job.as_deref(), args.json),
    }
}

fn load(path: &Path, json: bool) -> Result<LoadedConfig> {
    let cfg = LoadedConfig::load(path)?;
    backmeup::logging::init(cfg.settings.verbose, json);
    backmeup::transport::ensure_dir(&cfg.settings.backup_dir)?;
    Ok(cfg)
}

fn run_ctx(cfg: &LoadedConfig) -> RunCtx {
    RunCtx::new(
        Arc::new(cfg.settings.clone()),
        Arc::new(SshConnector::new()),
        Arc::new(TracingSink),
    )
}

fn cmd_run(path: &Path, json: bool) -> Result<()> {
    let cfg = load(path, json)?;
    if cfg.jobs.is_empty() {
        return Err(Error::config(format!("no jobs defined in {}", path.display())));
    }
    let ctx = run_ctx(&cfg);
    let mut scheduler = Scheduler::new(ctx.sink.clone());
    for job in &cfg.jobs {
        scheduler.schedule_job(Arc::new(job.clone()), ctx.clone())?;
    }
    tracing::info!(jobs = scheduler.len(), "scheduler running");
    scheduler.wait();
    Ok(())
}

fn cmd_check(path: &Path) -> Result<()> {
    let cfg = LoadedConfig::load(path)?;
    let now = Local::now();
    println!("backup_dir: {}", cfg.settings.backup_dir.display());
    println!("tmp_dir:    {}", cfg.settings.tmp_dir);
    println!("checksum:   {}", cfg.settings.checksum);
    for job in &cfg.jobs {
        let next = job
            .schedule
            .next_after(&now)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into());
        let retention = match job.retention_days {
            Some(d) if d > 0 => format!("{d}d"),
            _ => "forever".into(),
        };
        println!(
            "{:<20} {:<5} {:<28} {:<16} keep {:<8} next {}",
            job.name,
            job.kind.type_name(),
            job.host.to_string(),
            job.schedule.source(),
            retention,
            next
        );
    }
    Ok(())
}

fn cmd_once(path: &Path, name: &str, json: bool) -> Result<()> {
    let cfg = load(path, json)?;
    let Some(job) = cfg.job(name) else {
        return Err(Error::config(format!("no job named '{name}'")));
    };
    let report = run_job_reported(job, &run_ctx(&cfg))?;
    println!("{}", report.stored.display());
    Ok(())
}

fn cmd_prune(path: &Path, only: Option<&str>, json: bool) -> Result<()> {
    let cfg = load(path, json)?;
    if let Some(name) = only {
        if cfg.job(name).is_none() {
            return Err(Error::config(format!("no job named '{name}'")));
        }
    }
    for job in cfg.jobs.iter().filter(|j| only.is_none_or(|n| n == j.name)) {
        let dir = backmeup::transport::job_dir(&cfg.settings.backup_dir, &job.name);
        let report = backmeup::retention::prune(&dir, job.retention_days)?;
        println!(
            "{}: removed {} kept {} failed {}",
            job.name,
            report.removed.len(),
            report.kept,
            report.failed.len()
        );
        for (p, reason) in &report.failed {
            eprintln!("  {}: {reason}", p.display());
        }
    }
    Ok(())
}
