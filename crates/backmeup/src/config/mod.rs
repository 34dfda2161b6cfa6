use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};
use crate::integrity::DigestAlgorithm;
use crate::job::{JobSpec, load_jobs};

/// A fully-resolved configuration document (imports and extends inlined).
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn from_toml_str(path: impl Into<PathBuf>, raw: &str) -> Result<Self> {
        let value: Value = toml::from_str(raw)?;
        Ok(Self {
            path: path.into(),
            value,
        })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("invalid config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }
}

fn default_backup_dir() -> String {
    "backup".into()
}

fn default_tmp_dir() -> String {
    "/tmp/backMeUp".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsConfig {
    backup_dir: String,
    tmp_dir: String,
    verbose: bool,
    checksum: DigestAlgorithm,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            tmp_dir: default_tmp_dir(),
            verbose: false,
            checksum: DigestAlgorithm::default(),
        }
    }
}

/// Process-wide settings, passed explicitly to everything that needs them.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backup_dir: PathBuf,
    // Remote working root; each job works in `<tmp_dir>/<job>`.
    pub tmp_dir: String,
    pub verbose: bool,
    pub checksum: DigestAlgorithm,
}

impl Settings {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        let cfg: SettingsConfig = doc.deserialize_path("settings")?.unwrap_or_default();

        let backup_dir = cfg.backup_dir.trim();
        if backup_dir.is_empty() {
            return Err(Error::config("settings.backup_dir is empty"));
        }
        let tmp_dir = cfg.tmp_dir.trim().trim_end_matches('/');
        if tmp_dir.is_empty() || !tmp_dir.starts_with('/') {
            return Err(Error::config(format!(
                "settings.tmp_dir must be an absolute remote path, got '{}'",
                cfg.tmp_dir
            )));
        }
        if tmp_dir.split('/').any(|seg| seg == "..") {
            return Err(Error::config("settings.tmp_dir must not contain '..'"));
        }

        Ok(Self {
            backup_dir: resolve_ref_path(&doc.path, backup_dir),
            tmp_dir: tmp_dir.to_string(),
            verbose: cfg.verbose,
            checksum: cfg.checksum,
        })
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn parse_imports(path: &Path, value: &Value) -> Result<Vec<String>> {
    let Some(raw) = value.get("imports") else {
        return Ok(Vec::new());
    };
    let Some(arr) = raw.as_array() else {
        return Err(Error::config(format!(
            "imports in {} must be an array of paths",
            path.display()
        )));
    };
    let mut out = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(Error::config(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "config import cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    // `extends` names one base document; `imports` layers any number of files
    // (typically the one holding credentials) underneath this one.
    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        let base_path = resolve_ref_path(path, ext);
        out = load_value_inner(&base_path, stack)?;
    }
    for imp in parse_imports(path, &value)? {
        let loaded = load_value_inner(&resolve_ref_path(path, &imp), stack)?;
        merge_values(&mut out, loaded);
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
        tbl.remove("imports");
    }

    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Settings plus every validated job of one configuration file.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub jobs: Vec<JobSpec>,
}

impl LoadedConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let doc = load(path)?;
        Self::from_doc(&doc)
    }

    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(Self {
            settings: Settings::from_doc(doc)?,
            jobs: load_jobs(doc)?,
        })
    }

    pub fn job(&self, name: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
