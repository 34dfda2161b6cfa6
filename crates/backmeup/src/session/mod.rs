use std::path::Path;

use crate::command::ShellCommand;
use crate::error::{Error, Result};
use crate::job::HostSpec;
use crate::log_sanitize::sanitize_remote_text;

pub mod ssh;

pub use ssh::SshConnector;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    // None when the remote process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Short, terminal-safe description of the output for diagnostics.
    pub fn summary(&self) -> String {
        let stderr = sanitize_remote_text(&self.stderr);
        if !stderr.is_empty() {
            return stderr;
        }
        sanitize_remote_text(&self.stdout)
    }
}

/// One authenticated connection to a remote host, owned by a single run.
pub trait RemoteShell: Send {
    /// Run a command and report whatever it exited with.
    fn run(&mut self, cmd: &ShellCommand) -> Result<CommandOutput>;

    /// Copy a remote file to a local path over the secure channel.
    fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<()>;

    /// Release the connection. Calling it more than once is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Run a command, failing with a RemoteCommand error on non-zero exit.
    fn exec(&mut self, cmd: &ShellCommand) -> Result<CommandOutput> {
        let out = self.run(cmd)?;
        if out.success() {
            return Ok(out);
        }
        Err(Error::remote_command(&cmd.to_string(), out))
    }
}

pub trait Connector: Send + Sync {
    fn connect(&self, host: &HostSpec) -> Result<Box<dyn RemoteShell>>;
}
