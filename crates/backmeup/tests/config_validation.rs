use std::fs;
use std::path::PathBuf;

use backmeup::ErrorKind;
use backmeup::config::{ConfigDoc, LoadedConfig};
use backmeup::integrity::DigestAlgorithm;
use backmeup::job::{ArtifactKind, Credential};

fn load_str(raw: &str) -> backmeup::Result<LoadedConfig> {
    let doc = ConfigDoc {
        path: PathBuf::from("/srv/backmeup/backmeup.toml"),
        value: toml::from_str(raw).unwrap(),
    };
    LoadedConfig::from_doc(&doc)
}

fn config_err(raw: &str) -> String {
    let err = load_str(raw).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config, "unexpected kind: {err}");
    err.to_string()
}

const HOST: &str = r#"
[jobs.j.host]
address = "10.10.10.10"
username = "gramatik"
password = "pw"
"#;

#[test]
fn full_example_loads() {
    let cfg = load_str(
        r#"
[settings]
backup_dir = "/var/backups/backmeup"
checksum = "sha256"
verbose = true

[jobs.sql_example]
type = "sql"
cron = "*/3 * * * *"
database = "shop"
skip_triggers = true
ignore = ["shop.users", "shop.timesheet"]
retention_days = 90

[jobs.sql_example.host]
address = "10.10.10.10"
username = "gramatik"
private_key = "/home/gramatik/.ssh/id_ed25519"

[jobs.sql_example.auth]
username = "gramatik"
password = "dbpass"

[jobs.file_example]
type = "file"
cron = "40 * * * *"
path = "/var/log/apache2/access.log"
sudo = "sudopw"

[jobs.file_example.host]
host = "10.10.10.11"
port = 2222
username = "gramatik"
password = "pw"

[jobs.exec_example]
type = "exec"
cron = "0 3 * * *"
command = "tail /var/log/apache2/error.log"
retentionDays = 10

[jobs.exec_example.host]
address = "10.10.10.12"
username = "gramatik"
password = "pw"
"#,
    )
    .expect("load");

    assert_eq!(cfg.settings.checksum, DigestAlgorithm::Sha256);
    assert_eq!(cfg.settings.backup_dir, PathBuf::from("/var/backups/backmeup"));
    assert!(cfg.settings.verbose);
    assert_eq!(cfg.jobs.len(), 3);

    let sql = cfg.job("sql_example").expect("sql job");
    match &sql.kind {
        ArtifactKind::Sql(dump) => {
            assert_eq!(dump.database, "shop");
            assert_eq!(dump.ignore, vec!["shop.users", "shop.timesheet"]);
            assert!(dump.skip_triggers);
            assert_eq!(dump.auth.password.expose(), "dbpass");
        }
        other => panic!("wrong kind: {other:?}"),
    }
    assert!(matches!(sql.host.credential, Credential::PrivateKey(_)));
    assert_eq!(sql.retention_days, Some(90));

    let file = cfg.job("file_example").expect("file job");
    assert_eq!(file.host.address, "10.10.10.11");
    assert_eq!(file.host.port, Some(2222));
    assert!(file.elevation.is_some());
    assert_eq!(file.retention_days, None);

    let exec = cfg.job("exec_example").expect("exec job");
    assert_eq!(exec.retention_days, Some(10));
    assert_eq!(exec.schedule.source(), "0 3 * * *");
}

#[test]
fn single_ignore_entry_becomes_a_list() {
    let cfg = load_str(&format!(
        r#"
[jobs.j]
type = "sql"
cron = "* * * * *"
database = "shop"
ignore = "shop.users"

[jobs.j.auth]
username = "u"
password = "p"
{HOST}"#
    ))
    .expect("load");
    match &cfg.jobs[0].kind {
        ArtifactKind::Sql(dump) => assert_eq!(dump.ignore, vec!["shop.users"]),
        other => panic!("wrong kind: {other:?}"),
    }
}

#[test]
fn bad_job_names_are_rejected() {
    for name in ["\"has space\"", "\"dash-name\"", "\"dot.name\""] {
        let err = config_err(&format!(
            r#"
[jobs.{name}]
type = "exec"
cron = "* * * * *"
command = "uptime"

[jobs.{name}.host]
address = "h"
username = "u"
password = "p"
"#
        ));
        assert!(err.contains("job name"), "{err}");
    }
}

#[test]
fn credentials_must_be_exactly_one() {
    let both = config_err(
        r#"
[jobs.j]
type = "exec"
cron = "* * * * *"
command = "uptime"

[jobs.j.host]
address = "h"
username = "u"
password = "p"
private_key = "/k"
"#,
    );
    assert!(both.contains("only one"), "{both}");

    let neither = config_err(
        r#"
[jobs.j]
type = "exec"
cron = "* * * * *"
command = "uptime"

[jobs.j.host]
address = "h"
username = "u"
"#,
    );
    assert!(neither.contains("password or a private_key"), "{neither}");
}

#[test]
fn type_specific_fields_are_enforced() {
    let missing_cmd = config_err(&format!(
        "[jobs.j]\ntype = \"exec\"\ncron = \"* * * * *\"\n{HOST}"
    ));
    assert!(missing_cmd.contains("command is required"), "{missing_cmd}");

    let foreign = config_err(&format!(
        "[jobs.j]\ntype = \"exec\"\ncron = \"* * * * *\"\ncommand = \"uptime\"\ndatabase = \"shop\"\n{HOST}"
    ));
    assert!(foreign.contains("database is not valid for type 'exec'"), "{foreign}");

    let relative = config_err(&format!(
        "[jobs.j]\ntype = \"file\"\ncron = \"* * * * *\"\npath = \"var/log/x\"\n{HOST}"
    ));
    assert!(relative.contains("absolute"), "{relative}");

    let unknown = config_err(&format!(
        "[jobs.j]\ntype = \"rsync\"\ncron = \"* * * * *\"\n{HOST}"
    ));
    assert!(unknown.contains("invalid type"), "{unknown}");

    let injected = config_err(&format!(
        r#"
[jobs.j]
type = "sql"
cron = "* * * * *"
database = "shop; rm -rf /"

[jobs.j.auth]
username = "u"
password = "p"
{HOST}"#
    ));
    assert!(injected.contains("not allowed"), "{injected}");

    let option_like = config_err(&format!(
        r#"
[jobs.j]
type = "sql"
cron = "* * * * *"
database = "--all-databases"

[jobs.j.auth]
username = "u"
password = "p"
{HOST}"#
    ));
    assert!(option_like.contains("not allowed"), "{option_like}");

    let option_table = config_err(&format!(
        r#"
[jobs.j]
type = "sql"
cron = "* * * * *"
database = "shop"
ignore = ["-x"]

[jobs.j.auth]
username = "u"
password = "p"
{HOST}"#
    ));
    assert!(option_table.contains("not allowed"), "{option_table}");
}

#[test]
fn schedule_and_retention_are_checked() {
    let no_cron = config_err(&format!(
        "[jobs.j]\ntype = \"exec\"\ncommand = \"uptime\"\n{HOST}"
    ));
    assert!(no_cron.contains("cron is required"), "{no_cron}");

    let bad_cron = config_err(&format!(
        "[jobs.j]\ntype = \"exec\"\ncommand = \"uptime\"\ncron = \"61 * * * *\"\n{HOST}"
    ));
    assert!(bad_cron.contains("out of range"), "{bad_cron}");

    let negative = config_err(&format!(
        "[jobs.j]\ntype = \"exec\"\ncommand = \"uptime\"\ncron = \"* * * * *\"\nretention_days = -1\n{HOST}"
    ));
    assert!(negative.contains("retention_days"), "{negative}");
}

#[test]
fn unknown_keys_are_rejected() {
    let err = config_err(&format!(
        "[jobs.j]\ntype = \"exec\"\ncommand = \"uptime\"\ncron = \"* * * * *\"\nretention = 3\n{HOST}"
    ));
    assert!(err.contains("retention"), "{err}");

    let settings = config_err("[settings]\nchecksum = \"md5\"\n");
    assert!(settings.contains("settings"), "{settings}");
}

#[test]
fn secrets_can_live_in_an_imported_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("private.toml"),
        r#"
[jobs.db.host]
address = "10.0.0.5"
username = "backup"
password = "hunter2"

[jobs.db.auth]
username = "dump"
password = "dbpw"
"#,
    )
    .expect("write private");
    let main = tmp.path().join("backmeup.toml");
    fs::write(
        &main,
        r#"
imports = ["private.toml"]

[settings]
backup_dir = "stored"

[jobs.db]
type = "sql"
cron = "0 2 * * *"
database = "shop"
"#,
    )
    .expect("write main");

    let cfg = LoadedConfig::load(&main).expect("load");
    assert_eq!(cfg.settings.backup_dir, tmp.path().join("stored"));
    let job = cfg.job("db").expect("db job");
    assert_eq!(job.host.address, "10.0.0.5");
    assert!(!format!("{job:?}").contains("hunter2"));
    assert!(!format!("{job:?}").contains("dbpw"));
}
