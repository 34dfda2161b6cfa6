#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use backmeup::command::{Secret, ShellCommand};
use backmeup::config::Settings;
use backmeup::cron::CronSchedule;
use backmeup::error::{Error, Result};
use backmeup::events::{EventSink, RunEvent};
use backmeup::integrity::DigestAlgorithm;
use backmeup::job::{ArtifactKind, Credential, HostSpec, JobSpec};
use backmeup::session::{CommandOutput, Connector, RemoteShell};

/// Knobs for bending the local "remote" into failure modes.
#[derive(Debug, Clone, Default)]
pub struct LocalBehavior {
    // Replace the stdout of sha256sum/sha512sum with this text.
    pub checksum_stdout: Option<String>,
    // Flip the first byte of every downloaded file.
    pub corrupt_download: bool,
    // Write part of the file, then fail the transfer.
    pub fail_download: bool,
    pub refuse_connect: bool,
}

/// Runs "remote" commands with the local `sh`; downloads are file copies.
pub struct LocalShell {
    behavior: LocalBehavior,
    journal: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<usize>>,
    open: bool,
}

impl RemoteShell for LocalShell {
    fn run(&mut self, cmd: &ShellCommand) -> Result<CommandOutput> {
        if !self.open {
            return Err(Error::connection("session already closed"));
        }
        self.journal
            .lock()
            .expect("journal")
            .push(cmd.text().to_string());
        if let Some(fake) = &self.behavior.checksum_stdout {
            let t = cmd.text();
            if t.starts_with("sha256sum ") || t.starts_with("sha512sum ") {
                return Ok(CommandOutput {
                    stdout: fake.clone(),
                    stderr: String::new(),
                    exit_code: Some(0),
                });
            }
        }
        let out = Command::new("sh")
            .arg("-c")
            .arg(cmd.text())
            .output()
            .map_err(|e| Error::connection(format!("spawn sh: {e}")))?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            exit_code: out.status.code(),
        })
    }

    fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        if !self.open {
            return Err(Error::connection("session already closed"));
        }
        let mut data =
            fs::read(remote_path).map_err(|e| Error::transfer(format!("{remote_path}: {e}")))?;
        if self.behavior.fail_download {
            let half = &data[..data.len() / 2];
            fs::write(local_path, half).map_err(|e| Error::transfer(e.to_string()))?;
            return Err(Error::transfer(format!(
                "connection lost while copying {remote_path}"
            )));
        }
        if self.behavior.corrupt_download {
            if let Some(b) = data.first_mut() {
                *b ^= 0xff;
            }
        }
        fs::write(local_path, data).map_err(|e| Error::transfer(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            *self.closed.lock().expect("closed") += 1;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct LocalConnector {
    pub behavior: LocalBehavior,
    pub journal: Arc<Mutex<Vec<String>>>,
    pub connects: Arc<Mutex<usize>>,
    pub closes: Arc<Mutex<usize>>,
}

impl LocalConnector {
    pub fn with(behavior: LocalBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.journal.lock().expect("journal").clone()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().expect("closes")
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().expect("connects")
    }
}

impl Connector for LocalConnector {
    fn connect(&self, host: &HostSpec) -> Result<Box<dyn RemoteShell>> {
        if self.behavior.refuse_connect {
            return Err(Error::connection(format!("cannot connect to {host}")));
        }
        *self.connects.lock().expect("connects") += 1;
        Ok(Box::new(LocalShell {
            behavior: self.behavior.clone(),
            journal: self.journal.clone(),
            closed: self.closes.clone(),
            open: true,
        }))
    }
}

/// Collects every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<RunEvent>>,
}

impl RecordingSink {
    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.events.lock().expect("events").clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, ev: RunEvent) {
        self.events.lock().expect("events").push(ev);
    }
}

pub fn settings(backup_dir: &Path, tmp_dir: &Path, checksum: DigestAlgorithm) -> Settings {
    Settings {
        backup_dir: backup_dir.to_path_buf(),
        tmp_dir: tmp_dir.display().to_string(),
        verbose: false,
        checksum,
    }
}

pub fn local_host() -> HostSpec {
    HostSpec {
        address: "127.0.0.1".into(),
        port: None,
        username: "backup".into(),
        credential: Credential::Password(Secret::new("unused")),
        known_hosts_file: None,
        strict_host_key_checking: None,
    }
}

pub fn job(name: &str, kind: ArtifactKind) -> JobSpec {
    JobSpec {
        name: name.into(),
        host: local_host(),
        kind,
        elevation: None,
        schedule: CronSchedule::parse("*/3 * * * *").expect("cron"),
        retention_days: None,
    }
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok().map(|e| e.path())).collect(),
        Err(_) => Vec::new(),
    };
    out.sort();
    out
}

pub fn have_bin(name: &str) -> bool {
    Command::new(name)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
