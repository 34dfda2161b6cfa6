//! Sessions backed by the system OpenSSH client.
//!
//! `connect` authenticates once and leaves a ControlMaster running behind a
//! private socket; every command and copy of the run is multiplexed over it,
//! and `close` tells the master to exit.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

use crate::command::ShellCommand;
use crate::error::{Error, Result};
use crate::job::{Credential, HostSpec};
use crate::log_sanitize::sanitize_remote_text;

use super::{CommandOutput, Connector, RemoteShell};

const CONNECT_TIMEOUT_SECS: u32 = 15;

#[derive(Debug, Clone)]
pub struct SshConnector {
    ssh_bin: PathBuf,
    scp_bin: PathBuf,
    sshpass_bin: PathBuf,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            ssh_bin: PathBuf::from("ssh"),
            scp_bin: PathBuf::from("scp"),
            sshpass_bin: PathBuf::from("sshpass"),
        }
    }
}

impl SshConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for SshConnector {
    fn connect(&self, host: &HostSpec) -> Result<Box<dyn RemoteShell>> {
        let session = SshSession::open(self, host)?;
        Ok(Box::new(session))
    }
}

pub struct SshSession {
    host: HostSpec,
    ssh_bin: PathBuf,
    scp_bin: PathBuf,
    // Holds the control socket; removed when the session goes away.
    ctl_dir: TempDir,
    open: bool,
}

impl SshSession {
    fn open(conn: &SshConnector, host: &HostSpec) -> Result<Self> {
        let ctl_dir = tempfile::Builder::new()
            .prefix("backmeup-ssh-")
            .tempdir()
            .map_err(|e| Error::connection(format!("failed to create control dir: {e}")))?;
        let session = Self {
            host: host.clone(),
            ssh_bin: conn.ssh_bin.clone(),
            scp_bin: conn.scp_bin.clone(),
            ctl_dir,
            open: false,
        };

        let log = session.ctl_dir.path().join("master.log");
        let mut cmd = match &host.credential {
            Credential::Password(pw) => {
                let mut c = Command::new(&conn.sshpass_bin);
                c.arg("-e").arg(&session.ssh_bin).env("SSHPASS", pw.expose());
                c
            }
            Credential::PrivateKey(_) => Command::new(&session.ssh_bin),
        };
        cmd.arg("-M")
            .arg("-S")
            .arg(session.ctl_path())
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"))
            .arg("-E")
            .arg(&log)
            .arg("-f")
            .arg("-N");
        configure_ssh_cmd(&mut cmd, host, false);
        cmd.arg(host.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            // The forked master would hold a pipe open forever; it logs to -E.
            .stderr(Stdio::null());

        tracing::debug!(host = %host, "opening ssh master");
        let status = cmd
            .status()
            .map_err(|e| Error::connection(format!("failed to spawn ssh for {host}: {e}")))?;
        if !status.success() {
            let detail = fs::read_to_string(&log).unwrap_or_default();
            return Err(Error::connection(format!(
                "cannot connect to {host} ({status}): {}",
                sanitize_remote_text(&detail)
            )));
        }

        let mut session = session;
        session.open = true;
        Ok(session)
    }

    fn ctl_path(&self) -> PathBuf {
        self.ctl_dir.path().join("ctl")
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        Err(Error::connection(format!(
            "session to {} is already closed",
            self.host
        )))
    }

    fn ssh_cmd(&self) -> Command {
        let mut cmd = Command::new(&self.ssh_bin);
        cmd.arg("-S").arg(self.ctl_path()).arg("-o").arg("BatchMode=yes");
        configure_ssh_cmd(&mut cmd, &self.host, false);
        cmd
    }

    fn master_alive(&self) -> bool {
        Command::new(&self.ssh_bin)
            .arg("-S")
            .arg(self.ctl_path())
            .arg("-O")
            .arg("check")
            .arg(self.host.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn scp_target(&self, remote_path: &str) -> String {
        if self.host.address.contains(':') {
            format!(
                "{}@[{}]:{remote_path}",
                self.host.username, self.host.address
            )
        } else {
            format!("{}:{remote_path}", self.host.destination())
        }
    }
}

impl RemoteShell for SshSession {
    fn run(&mut self, cmd: &ShellCommand) -> Result<CommandOutput> {
        self.ensure_open()?;
        let mut ssh = self.ssh_cmd();
        ssh.arg(self.host.destination())
            .arg(cmd.text())
            .stdin(Stdio::null());
        tracing::debug!(host = %self.host, command = %cmd, "remote exec");
        let out = ssh.output().map_err(|e| {
            Error::connection(format!("failed to spawn ssh for {}: {e}", self.host))
        })?;
        // 255 is either ssh itself failing or the remote command's own status;
        // a live master means the latter.
        let master_alive = out.status.code() == Some(255) && self.master_alive();
        classify_output(&self.host, out, master_alive)
    }

    fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        self.ensure_open()?;
        let mut scp = Command::new(&self.scp_bin);
        scp.arg("-q")
            .arg("-o")
            .arg(format!("ControlPath={}", self.ctl_path().display()))
            .arg("-o")
            .arg("BatchMode=yes");
        configure_ssh_cmd(&mut scp, &self.host, true);
        scp.arg(self.scp_target(remote_path))
            .arg(local_path)
            .stdin(Stdio::null());
        tracing::debug!(host = %self.host, remote = remote_path, local = %local_path.display(), "scp");
        let out = scp
            .output()
            .map_err(|e| Error::transfer(format!("failed to spawn scp: {e}")))?;
        if !out.status.success() {
            return Err(Error::transfer(format!(
                "download of {remote_path} from {} failed: {}",
                self.host,
                command_summary(&out)
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        let out = Command::new(&self.ssh_bin)
            .arg("-S")
            .arg(self.ctl_path())
            .arg("-O")
            .arg("exit")
            .arg(self.host.destination())
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::connection(format!("failed to spawn ssh: {e}")))?;
        if !out.status.success() {
            return Err(Error::connection(format!(
                "failed to close session to {}: {}",
                self.host,
                command_summary(&out)
            )));
        }
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "ssh master did not exit cleanly");
        }
    }
}

fn classify_output(host: &HostSpec, out: Output, master_alive: bool) -> Result<CommandOutput> {
    if out.status.code() == Some(255) && !master_alive {
        return Err(Error::connection(format!(
            "ssh to {host} exited with 255 and the master is gone \
             (connection failure, or the command itself exited 255): {}",
            command_summary(&out)
        )));
    }
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        exit_code: out.status.code(),
    })
}

fn configure_ssh_cmd(cmd: &mut Command, host: &HostSpec, scp_style: bool) {
    if let Some(port) = host.port {
        cmd.arg(if scp_style { "-P" } else { "-p" })
            .arg(port.to_string());
    }
    if let Credential::PrivateKey(key) = &host.credential {
        cmd.arg("-i")
            .arg(key)
            .arg("-o")
            .arg("IdentitiesOnly=yes")
            .arg("-o")
            .arg("BatchMode=yes");
    } else {
        cmd.arg("-o")
            .arg("PreferredAuthentications=password,keyboard-interactive")
            .arg("-o")
            .arg("PubkeyAuthentication=no");
    }
    if let Some(kh) = host.known_hosts_file.as_deref() {
        cmd.arg("-o").arg(option_with_path("UserKnownHostsFile=", kh));
    }
    if matches!(host.strict_host_key_checking, Some(false)) {
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        if host.known_hosts_file.is_none() {
            cmd.arg("-o").arg("UserKnownHostsFile=/dev/null");
        }
    }
}

fn option_with_path(prefix: &str, path: &Path) -> OsString {
    let mut s = OsString::from(prefix);
    s.push(path.as_os_str());
    s
}

fn command_summary(out: &Output) -> String {
    let stderr = sanitize_remote_text(&String::from_utf8_lossy(&out.stderr));
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = sanitize_remote_text(&String::from_utf8_lossy(&out.stdout));
    if !stdout.is_empty() {
        return stdout;
    }
    format!("status {}", out.status)
}
