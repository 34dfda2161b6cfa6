use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::command::Secret;
use crate::config::ConfigDoc;
use crate::cron::CronSchedule;
use crate::error::{Error, Result};

static JOB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("job name pattern"));
// Database and table names go into the dump command unquoted; a leading `-`
// would turn them into mysqldump options.
static SQL_IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_$.\-]*$").expect("sql identifier pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(Secret),
    // Path to private key material on the local disk.
    PrivateKey(PathBuf),
}

#[derive(Debug, Clone)]
pub struct HostSpec {
    pub address: String,
    pub port: Option<u16>,
    pub username: String,
    pub credential: Credential,
    pub known_hosts_file: Option<PathBuf>,
    pub strict_host_key_checking: Option<bool>,
}

impl HostSpec {
    /// `user@address`, as handed to ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{port}", self.destination()),
            None => f.write_str(&self.destination()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbAuth {
    pub username: String,
    pub password: Secret,
}

#[derive(Debug, Clone)]
pub struct SqlDump {
    pub database: String,
    pub auth: DbAuth,
    pub ignore: Vec<String>,
    pub skip_triggers: bool,
}

#[derive(Debug, Clone)]
pub struct ExecCapture {
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct FileCopy {
    pub path: String,
}

/// What a job backs up. Each variant produces exactly one remote file.
#[derive(Debug, Clone)]
pub enum ArtifactKind {
    Sql(SqlDump),
    Exec(ExecCapture),
    File(FileCopy),
}

impl ArtifactKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ArtifactKind::Sql(_) => "sql",
            ArtifactKind::Exec(_) => "exec",
            ArtifactKind::File(_) => "file",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub host: HostSpec,
    pub kind: ArtifactKind,
    pub elevation: Option<Secret>,
    pub schedule: CronSchedule,
    // None means keep forever.
    pub retention_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostConfig {
    #[serde(alias = "host")]
    address: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<Secret>,
    #[serde(alias = "privateKey")]
    private_key: Option<String>,
    known_hosts_file: Option<String>,
    strict_host_key_checking: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct DbAuthConfig {
    username: Option<String>,
    password: Option<Secret>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobConfig {
    host: Option<HostConfig>,
    #[serde(rename = "type")]
    kind: Option<String>,
    cron: Option<String>,
    #[serde(alias = "retentionDays")]
    retention_days: Option<i64>,
    sudo: Option<Secret>,

    // sql
    database: Option<String>,
    auth: Option<DbAuthConfig>,
    ignore: Option<OneOrMany>,
    #[serde(alias = "skipTriggers")]
    skip_triggers: Option<bool>,

    // exec
    command: Option<String>,

    // file
    path: Option<String>,
}

pub fn validate_job_name(name: &str) -> Result<()> {
    if !JOB_NAME.is_match(name) {
        return Err(Error::config(format!(
            "job name '{name}' is invalid (allowed: letters, digits and underscore)"
        )));
    }
    Ok(())
}

pub fn validate_retention_days(days: Option<i64>) -> Result<()> {
    match days {
        Some(d) if d < 0 => Err(Error::config(format!(
            "retention_days must be a non-negative number of days, got {d}"
        ))),
        _ => Ok(()),
    }
}

fn required(job: &str, field: &str, v: Option<String>) -> Result<String> {
    v.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::config(format!("job '{job}': {field} is required")))
}

fn reject_foreign(job: &str, kind: &str, present: &[(&str, bool)]) -> Result<()> {
    for (field, set) in present {
        if *set {
            return Err(Error::config(format!(
                "job '{job}': {field} is not valid for type '{kind}'"
            )));
        }
    }
    Ok(())
}

fn host_spec(job: &str, cfg: Option<HostConfig>) -> Result<HostSpec> {
    let Some(cfg) = cfg else {
        return Err(Error::config(format!("job '{job}': host is required")));
    };
    let address = required(job, "host.address", cfg.address)?;
    let username = required(job, "host.username", cfg.username)?;

    let password = cfg.password.filter(|p| !p.is_empty());
    let private_key = cfg
        .private_key
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let credential = match (password, private_key) {
        (Some(p), None) => Credential::Password(p),
        (None, Some(k)) => Credential::PrivateKey(PathBuf::from(k)),
        (None, None) => {
            return Err(Error::config(format!(
                "job '{job}': host needs a password or a private_key"
            )));
        }
        (Some(_), Some(_)) => {
            return Err(Error::config(format!(
                "job '{job}': host must set only one of password and private_key"
            )));
        }
    };

    Ok(HostSpec {
        address,
        port: cfg.port,
        username,
        credential,
        known_hosts_file: cfg
            .known_hosts_file
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from),
        strict_host_key_checking: cfg.strict_host_key_checking,
    })
}

fn sql_ident(job: &str, field: &str, v: &str) -> Result<()> {
    if SQL_IDENT.is_match(v) {
        return Ok(());
    }
    Err(Error::config(format!(
        "job '{job}': {field} '{v}' contains characters that are not allowed"
    )))
}

fn artifact_kind(name: &str, cfg: &mut JobConfig) -> Result<ArtifactKind> {
    let kind = required(name, "type", cfg.kind.take())?;
    match kind.as_str() {
        "sql" => {
            reject_foreign(
                name,
                "sql",
                &[("command", cfg.command.is_some()), ("path", cfg.path.is_some())],
            )?;
            let database = required(name, "database", cfg.database.take())?;
            sql_ident(name, "database", &database)?;
            let Some(auth) = cfg.auth.take() else {
                return Err(Error::config(format!("job '{name}': auth is required")));
            };
            let username = required(name, "auth.username", auth.username)?;
            let Some(password) = auth.password else {
                return Err(Error::config(format!(
                    "job '{name}': auth.password is required"
                )));
            };
            let ignore: Vec<String> = cfg
                .ignore
                .take()
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            for table in &ignore {
                sql_ident(name, "ignore entry", table)?;
            }
            Ok(ArtifactKind::Sql(SqlDump {
                database,
                auth: DbAuth { username, password },
                ignore,
                skip_triggers: cfg.skip_triggers.unwrap_or(false),
            }))
        }
        "exec" => {
            reject_foreign(name, "exec", &sql_fields(cfg, true))?;
            let command = required(name, "command", cfg.command.take())?;
            Ok(ArtifactKind::Exec(ExecCapture { command }))
        }
        "file" => {
            reject_foreign(name, "file", &sql_fields(cfg, false))?;
            let path = required(name, "path", cfg.path.take())?;
            if !path.starts_with('/') {
                return Err(Error::config(format!(
                    "job '{name}': path must be absolute, got '{path}'"
                )));
            }
            if path.ends_with('/') {
                return Err(Error::config(format!(
                    "job '{name}': path must name a file, got '{path}'"
                )));
            }
            Ok(ArtifactKind::File(FileCopy { path }))
        }
        other => Err(Error::config(format!(
            "job '{name}': invalid type '{other}' (expected sql, file or exec)"
        ))),
    }
}

fn sql_fields(cfg: &JobConfig, exec: bool) -> Vec<(&'static str, bool)> {
    vec![
        ("database", cfg.database.is_some()),
        ("auth", cfg.auth.is_some()),
        ("ignore", cfg.ignore.is_some()),
        ("skip_triggers", cfg.skip_triggers.is_some()),
        if exec {
            ("path", cfg.path.is_some())
        } else {
            ("command", cfg.command.is_some())
        },
    ]
}

impl JobSpec {
    fn from_config(name: &str, mut cfg: JobConfig) -> Result<Self> {
        validate_job_name(name)?;
        let kind = artifact_kind(name, &mut cfg)?;

        let Some(cron) = cfg.cron.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(Error::config(format!("job '{name}': cron is required")));
        };
        let schedule = CronSchedule::parse(cron).map_err(|e| e.context(format!("job '{name}'")))?;

        validate_retention_days(cfg.retention_days)
            .map_err(|e| e.context(format!("job '{name}'")))?;

        Ok(Self {
            name: name.to_string(),
            host: host_spec(name, cfg.host)?,
            kind,
            elevation: cfg.sudo.filter(|s| !s.is_empty()),
            schedule,
            retention_days: cfg.retention_days,
        })
    }
}

/// Validate every `[jobs.<name>]` table. Any problem is a config error and
/// nothing gets scheduled.
pub fn load_jobs(doc: &ConfigDoc) -> Result<Vec<JobSpec>> {
    let raw: BTreeMap<String, JobConfig> = doc.deserialize_path("jobs")?.unwrap_or_default();
    let mut jobs = Vec::with_capacity(raw.len());
    for (name, cfg) in raw {
        jobs.push(JobSpec::from_config(&name, cfg)?);
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_word_characters_only() {
        for ok in ["sql_example", "A1", "_"] {
            validate_job_name(ok).expect(ok);
        }
        for bad in ["", "with space", "dash-name", "dot.name", "slash/x", "é"] {
            assert!(validate_job_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn negative_retention_is_rejected() {
        assert!(validate_retention_days(Some(-1)).is_err());
        assert!(validate_retention_days(Some(0)).is_ok());
        assert!(validate_retention_days(None).is_ok());
    }

    #[test]
    fn host_display_includes_port() {
        let host = HostSpec {
            address: "10.0.0.1".into(),
            port: Some(2222),
            username: "backup".into(),
            credential: Credential::PrivateKey("/k".into()),
            known_hosts_file: None,
            strict_host_key_checking: None,
        };
        assert_eq!(host.to_string(), "backup@10.0.0.1:2222");
    }
}
