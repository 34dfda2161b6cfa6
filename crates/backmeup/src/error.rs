use std::fmt;

use crate::session::CommandOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    RemoteCommand,
    Integrity,
    Transfer,
    FileSystem,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Connection => "connection",
            ErrorKind::RemoteCommand => "remote_command",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Transfer => "transfer",
            ErrorKind::FileSystem => "filesystem",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
    // Only set for RemoteCommand errors.
    output: Option<Box<CommandOutput>>,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
            output: None,
        }
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn connection<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Connection, msg)
    }

    pub fn integrity<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Integrity, msg)
    }

    pub fn transfer<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Transfer, msg)
    }

    pub fn fs<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::FileSystem, msg)
    }

    pub fn remote_command(command: &str, output: CommandOutput) -> Self {
        let status = match output.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        let summary = output.summary();
        let msg = if summary.is_empty() {
            format!("remote command failed ({status}): {command}")
        } else {
            format!("remote command failed ({status}): {command}: {summary}")
        };
        Self {
            kind: ErrorKind::RemoteCommand,
            msg,
            output: Some(Box::new(output)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn remote_output(&self) -> Option<&CommandOutput> {
        self.output.as_deref()
    }

    /// Prefix the message, keeping kind and captured output.
    pub fn context<C: fmt::Display>(mut self, ctx: C) -> Self {
        self.msg = format!("{ctx}: {}", self.msg);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::fs(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
