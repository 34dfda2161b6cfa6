use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};

use crate::command::{ShellCommand, sh_quote};
use crate::error::{Error, Result};
use crate::session::RemoteShell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        Self::Sha512
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => f.write_str("sha256"),
            DigestAlgorithm::Sha512 => f.write_str("sha512"),
        }
    }
}

impl DigestAlgorithm {
    /// coreutils tool that prints this digest on the remote side.
    pub fn remote_tool(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256sum",
            DigestAlgorithm::Sha512 => "sha512sum",
        }
    }

    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    pub fn hash_file(&self, path: &Path) -> Result<String> {
        match self {
            DigestAlgorithm::Sha256 => hash_file_with::<Sha256>(path),
            DigestAlgorithm::Sha512 => hash_file_with::<Sha512>(path),
        }
    }
}

fn hash_file_with<D: Digest>(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| Error::fs(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = D::new();
    let mut buf = [0u8; 1024 * 256];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::fs(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Pull the digest out of `<tool>` output: first whitespace-delimited token,
/// which must be exactly the algorithm's hex length.
pub fn parse_checksum_output(alg: DigestAlgorithm, stdout: &str) -> Result<String> {
    let token = stdout.split_whitespace().next().unwrap_or_default();
    let shape = Regex::new(&format!("^[0-9a-fA-F]{{{}}}$", alg.hex_len()))
        .map_err(|e| Error::integrity(format!("digest pattern: {e}")))?;
    if !shape.is_match(token) {
        return Err(Error::integrity(format!(
            "malformed {alg} checksum from remote host: {:?}",
            token.chars().take(160).collect::<String>()
        )));
    }
    Ok(token.to_ascii_lowercase())
}

pub fn remote_checksum(
    shell: &mut dyn RemoteShell,
    alg: DigestAlgorithm,
    packaged_remote_path: &str,
) -> Result<String> {
    let cmd = ShellCommand::new(format!(
        "{} {}",
        alg.remote_tool(),
        sh_quote(packaged_remote_path)
    ));
    let out = shell.exec(&cmd)?;
    parse_checksum_output(alg, &out.stdout)
}

pub fn verify_local(alg: DigestAlgorithm, local_path: &Path, expected: &str) -> Result<bool> {
    let actual = alg.hash_file(local_path)?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}
