//! TOML project manifests
//!
//! A manifest declares a project without code:
//!
//! ```toml
//! name = "etl"
//! merge = ["shared.toml"]
//!
//! [properties]
//! user.to.proxy = "etl"
//!
//! [defaults.hadoop]
//! type = "hadoopJava"
//!
//! [jobs.load]
//! defaults = ["hadoop"]
//! files = [{ source = "scripts/load.sh" }]
//! options = { "job.class" = "com.example.Load", dependencies = "extract" }
//!
//! [jobs.load_again]
//! subflow = "load"
//! options = { retries = 1 }
//!
//! [[files]]
//! source = "data/lookup.csv"
//! dest = "lookup/lookup.csv"
//! ```
//!
//! Relative source paths and merged manifests are resolved against the
//! manifest's directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::{Project, ProjectError};
use crate::job::{AttachFiles, Job};
use crate::options::OptionsError;

/// Errors raised while loading a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("job '{job}' uses undefined defaults '{name}'")]
    UnknownDefaults { job: String, name: String },

    #[error("job '{job}': {source}")]
    Options {
        job: String,
        #[source]
        source: OptionsError,
    },

    #[error("manifest {0} is merged into itself")]
    MergeCycle(PathBuf),

    #[error(transparent)]
    Project(#[from] ProjectError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    name: String,

    #[serde(default)]
    merge: Vec<PathBuf>,

    list_separator: Option<String>,

    #[serde(default)]
    properties: toml::Table,

    #[serde(default)]
    defaults: BTreeMap<String, toml::Table>,

    #[serde(default)]
    jobs: BTreeMap<String, JobEntry>,

    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobEntry {
    /// Names of `[defaults.*]` tables applied before `options`, in order.
    #[serde(default)]
    defaults: Vec<String>,

    #[serde(default)]
    options: toml::Table,

    /// Files added to the project along with the job.
    #[serde(default)]
    files: Vec<FileEntry>,

    /// Makes the job embed the flow rooted at this job.
    subflow: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileEntry {
    source: PathBuf,
    dest: Option<String>,
}

/// Load a project from a manifest file.
pub fn load_manifest(path: &Path) -> Result<Project, ManifestError> {
    let mut visiting = BTreeSet::new();
    load(path, &mut visiting)
}

/// Parse a manifest from TOML text; relative paths resolve against `base`.
pub fn parse_manifest(content: &str, base: &Path) -> Result<Project, ManifestError> {
    let manifest: Manifest = toml::from_str(content).map_err(|source| ManifestError::Parse {
        path: base.to_path_buf(),
        source,
    })?;
    let mut visiting = BTreeSet::new();
    assemble(manifest, base, &mut visiting)
}

fn load(path: &Path, visiting: &mut BTreeSet<PathBuf>) -> Result<Project, ManifestError> {
    let canonical = path.canonicalize().map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !visiting.insert(canonical.clone()) {
        return Err(ManifestError::MergeCycle(canonical));
    }

    log::debug!("loading manifest {}", canonical.display());
    let content = std::fs::read_to_string(&canonical).map_err(|source| ManifestError::Io {
        path: canonical.clone(),
        source,
    })?;
    let manifest: Manifest = toml::from_str(&content).map_err(|source| ManifestError::Parse {
        path: canonical.clone(),
        source,
    })?;
    let base = canonical
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let project = assemble(manifest, &base, visiting)?;
    visiting.remove(&canonical);
    Ok(project)
}

fn assemble(
    manifest: Manifest,
    base: &Path,
    visiting: &mut BTreeSet<PathBuf>,
) -> Result<Project, ManifestError> {
    let mut project = Project::new(manifest.name);
    if let Some(separator) = manifest.list_separator {
        project = project.with_list_separator(separator);
    }
    if !manifest.properties.is_empty() {
        project.set_properties(table_to_json(manifest.properties))?;
    }

    for (name, entry) in manifest.jobs {
        let mut layers = Vec::with_capacity(entry.defaults.len() + 1);
        for set in &entry.defaults {
            let table = manifest
                .defaults
                .get(set)
                .ok_or_else(|| ManifestError::UnknownDefaults {
                    job: name.clone(),
                    name: set.clone(),
                })?;
            layers.push(table_to_json(table.clone()));
        }
        layers.push(table_to_json(entry.options));

        let job = match entry.subflow {
            Some(flow) => Job::subflow(flow, layers),
            None => Job::new(layers),
        };
        let mut job = job.map_err(|source| ManifestError::Options {
            job: name.clone(),
            source,
        })?;
        if !entry.files.is_empty() {
            let attach = entry.files.into_iter().fold(AttachFiles::new(), |hooks, file| {
                hooks.file(resolve(base, &file.source), file.dest)
            });
            job = job.with_hooks(Arc::new(attach));
        }
        project.add_job(name, job)?;
    }

    for file in manifest.files {
        project.add_file(resolve(base, &file.source), file.dest.as_deref())?;
    }

    for other in &manifest.merge {
        let other = load(&resolve(base, other), visiting)?;
        project.merge(other)?;
    }

    Ok(project)
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn table_to_json(table: toml::Table) -> Value {
    Value::Object(table.into_iter().map(|(k, v)| (k, to_json(v))).collect())
}

fn to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(d) => Value::String(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        toml::Value::Table(table) => table_to_json(table),
    }
}
