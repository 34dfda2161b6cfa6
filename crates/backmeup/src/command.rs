use std::fmt;

use serde::Deserialize;

const MASK: &str = "***";

/// A credential that must never show up in logs or error messages.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({MASK})")
    }
}

/// A command line for the remote shell.
///
/// `Display` renders the command with every registered secret masked, so the
/// value is safe to log. Only `text()` yields what is actually sent.
#[derive(Clone)]
pub struct ShellCommand {
    text: String,
    secrets: Vec<Secret>,
}

impl ShellCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            secrets: Vec::new(),
        }
    }

    pub fn with_secret(mut self, secret: &Secret) -> Self {
        if !secret.expose().is_empty() {
            self.secrets.push(secret.clone());
        }
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Append raw shell text (redirections, extra flags).
    pub fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shown = self.text.clone();
        for s in &self.secrets {
            shown = shown.replace(&sh_quote(s.expose()), MASK);
            shown = shown.replace(s.expose(), MASK);
        }
        f.write_str(&shown)
    }
}

impl fmt::Debug for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShellCommand({self})")
    }
}

pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Wrap `raw` so it runs under `sudo`, feeding the elevation secret on stdin.
/// Without a secret the command is returned untouched.
pub fn template(raw: ShellCommand, elevation: Option<&Secret>) -> ShellCommand {
    let Some(secret) = elevation else {
        return raw;
    };
    let text = format!(
        "printf '%s\\n' {} | sudo -S -p '' {}",
        sh_quote(secret.expose()),
        raw.text
    );
    let mut out = ShellCommand::new(text).with_secret(secret);
    out.secrets.extend(raw.secrets);
    out
}
