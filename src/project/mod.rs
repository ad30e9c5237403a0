//! Project model and compiler
//!
//! A project owns named jobs, extra files keyed by their path inside the
//! archive, and optional project-wide properties. `build()` runs the job
//! hooks, validates the dependency graph, and produces a [`CompiledProject`]
//! ready to be packaged by [`crate::archive`].

mod graph;
pub mod manifest;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::job::{self, Job, TYPE_KEY};
use crate::options::{self, OptionMerger, Options, OptionsError};

pub use manifest::{load_manifest, ManifestError};

/// Suffix of generated job entries.
pub const JOB_SUFFIX: &str = ".job";

/// Suffix of the generated properties entry.
pub const PROPERTIES_SUFFIX: &str = ".properties";

/// Errors raised while assembling or compiling a project
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("duplicate job name: '{0}'")]
    DuplicateJob(String),

    #[error("invalid job name '{name}': {reason}")]
    InvalidJobName { name: String, reason: String },

    #[error("archive path '{dest}' is already taken by {existing}")]
    DuplicateFile { dest: String, existing: String },

    #[error("invalid archive path '{dest}': {reason}")]
    InvalidDestination { dest: String, reason: String },

    #[error("job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("job '{job}' embeds flow '{flow}': {reason}")]
    InvalidSubflow {
        job: String,
        flow: String,
        reason: String,
    },

    #[error("flows embed each other: {}", .cycle.join(" -> "))]
    SubflowCycle { cycle: Vec<String> },

    #[error("job '{0}' has no type")]
    MissingType(String),

    #[error("project '{0}' has no jobs or files to build")]
    EmptyProject(String),

    #[error("invalid options for {context}: {source}")]
    Options {
        context: String,
        #[source]
        source: OptionsError,
    },

    #[error("hook for job '{job}' failed: {reason}")]
    Hook { job: String, reason: String },
}

impl ProjectError {
    fn options(context: impl Into<String>, source: OptionsError) -> Self {
        Self::Options {
            context: context.into(),
            source,
        }
    }
}

/// Role of a job in the compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Nothing depends on this job: it is the root of a workflow.
    Workflow,
    /// At least one other job depends on this one.
    Job,
}

impl JobKind {
    pub fn code(&self) -> char {
        match self {
            JobKind::Workflow => 'W',
            JobKind::Job => 'J',
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A named collection of jobs and files.
#[derive(Debug, Clone)]
pub struct Project {
    name: String,
    jobs: BTreeMap<String, Job>,
    files: BTreeMap<String, PathBuf>,
    properties: Options,
    merger: OptionMerger,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: BTreeMap::new(),
            files: BTreeMap::new(),
            properties: Options::new(),
            merger: OptionMerger::new(),
        }
    }

    /// Set the separator used when rendering list options.
    pub fn with_list_separator(mut self, separator: impl Into<String>) -> Self {
        self.merger = self.merger.with_separator(separator);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn jobs(&self) -> &BTreeMap<String, Job> {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    /// Archive path to source path.
    pub fn files(&self) -> &BTreeMap<String, PathBuf> {
        &self.files
    }

    pub fn properties(&self) -> &Options {
        &self.properties
    }

    /// Replace the project-wide properties. They apply to every job with a
    /// lower precedence than the job's own options.
    pub fn set_properties(&mut self, properties: Value) -> Result<(), ProjectError> {
        self.properties =
            options::flatten(&properties).map_err(|e| ProjectError::options("project properties", e))?;
        Ok(())
    }

    /// Add a job, then run its `on_add` hook. If the hook fails, the
    /// project is left as it was before the call.
    pub fn add_job(&mut self, name: impl Into<String>, job: Job) -> Result<(), ProjectError> {
        let name = name.into();
        job::validate_job_name(&name).map_err(|reason| ProjectError::InvalidJobName {
            name: name.clone(),
            reason,
        })?;
        if self.jobs.contains_key(&name) {
            return Err(ProjectError::DuplicateJob(name));
        }

        log::debug!("adding job '{}' to project '{}'", name, self.name);
        let Some(hooks) = job.hooks().cloned() else {
            self.jobs.insert(name, job);
            return Ok(());
        };

        let jobs = self.jobs.clone();
        let files = self.files.clone();
        self.jobs.insert(name.clone(), job);
        if let Err(e) = hooks.on_add(self, &name) {
            log::debug!("on_add hook of '{}' failed, rolling back", name);
            self.jobs = jobs;
            self.files = files;
            return Err(e);
        }
        Ok(())
    }

    /// Include a file in the archive at `dest` (defaults to the source's base
    /// name). Adding the same source at the same destination again does
    /// nothing.
    pub fn add_file(
        &mut self,
        source: impl Into<PathBuf>,
        dest: Option<&str>,
    ) -> Result<(), ProjectError> {
        let source = source.into();
        let dest = match dest {
            Some(dest) => dest.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ProjectError::InvalidDestination {
                    dest: source.display().to_string(),
                    reason: "source has no file name".to_string(),
                })?,
        };
        validate_destination(&dest)?;

        match self.files.get(&dest) {
            Some(existing) if *existing == source => {
                log::debug!("file {} already added as '{}'", source.display(), dest);
                Ok(())
            }
            Some(existing) => Err(ProjectError::DuplicateFile {
                dest,
                existing: existing.display().to_string(),
            }),
            None => {
                log::debug!("adding file {} as '{}'", source.display(), dest);
                self.files.insert(dest, source);
                Ok(())
            }
        }
    }

    /// Move `other`'s jobs and files into this project. The receiving
    /// project keeps its name and properties.
    pub fn merge(&mut self, other: Project) -> Result<(), ProjectError> {
        log::debug!("merging project '{}' into '{}'", other.name, self.name);
        for (name, job) in other.jobs {
            self.add_job(name, job)?;
        }
        for (dest, source) in other.files {
            self.add_file(source, Some(&dest))?;
        }
        Ok(())
    }

    /// Validate the project and compile it.
    pub fn build(&self) -> Result<CompiledProject, ProjectError> {
        if self.jobs.is_empty() && self.files.is_empty() {
            return Err(ProjectError::EmptyProject(self.name.clone()));
        }

        let mut built: BTreeMap<String, Options> = BTreeMap::new();
        for (name, job) in &self.jobs {
            let mut options = job.options().clone();
            if let Some(hooks) = job.hooks() {
                hooks.on_build(self, name, &mut options)?;
            }
            if !options.contains_key(TYPE_KEY) && !self.properties.contains_key(TYPE_KEY) {
                return Err(ProjectError::MissingType(name.clone()));
            }
            built.insert(name.clone(), options);
        }

        let deps: graph::DependencyMap = built
            .iter()
            .map(|(name, options)| (name.clone(), job::dependencies_of(options)))
            .collect();
        graph::check_known(&deps)?;
        if let Some(cycle) = graph::find_cycle(&deps) {
            return Err(ProjectError::CyclicDependency { cycle });
        }
        let kinds = graph::classify(&deps);
        graph::check_subflows(&built, &deps, &kinds)?;

        let properties_file = if self.properties.is_empty() {
            None
        } else {
            Some(
                self.merger
                    .to_text(&self.properties)
                    .map_err(|e| ProjectError::options("project properties", e))?,
            )
        };

        let mut generated: BTreeSet<String> =
            built.keys().map(|name| format!("{}{}", name, JOB_SUFFIX)).collect();
        if properties_file.is_some() {
            generated.insert(format!("{}{}", self.name, PROPERTIES_SUFFIX));
        }
        if let Some(dest) = self.files.keys().find(|dest| generated.contains(*dest)) {
            return Err(ProjectError::DuplicateFile {
                dest: dest.clone(),
                existing: "a generated entry".to_string(),
            });
        }

        let mut jobs = BTreeMap::new();
        for (name, options) in built {
            let job_file = job::render_job_file(&self.merger, &options)
                .map_err(|e| ProjectError::options(format!("job '{}'", name), e))?;
            let dependencies = deps.get(&name).cloned().unwrap_or_default();
            let kind = kinds.get(&name).copied().unwrap_or(JobKind::Workflow);
            jobs.insert(
                name,
                CompiledJob {
                    options,
                    dependencies,
                    kind,
                    job_file,
                },
            );
        }

        log::info!(
            "compiled project '{}': {} jobs, {} files",
            self.name,
            jobs.len(),
            self.files.len()
        );
        Ok(CompiledProject {
            name: self.name.clone(),
            properties: self.properties.clone(),
            properties_file,
            jobs,
            files: self.files.clone(),
        })
    }
}

fn validate_destination(dest: &str) -> Result<(), ProjectError> {
    let invalid = |reason: &str| ProjectError::InvalidDestination {
        dest: dest.to_string(),
        reason: reason.to_string(),
    };
    if dest.is_empty() {
        return Err(invalid("path is empty"));
    }
    if dest.starts_with('/') || dest.starts_with('\\') || Path::new(dest).is_absolute() {
        return Err(invalid("path must be relative"));
    }
    if dest.ends_with('/') {
        return Err(invalid("path must name a file"));
    }
    for segment in dest.split(|c| c == '/' || c == '\\') {
        match segment {
            ".." => return Err(invalid("path must not contain '..'")),
            "" | "." => return Err(invalid("path must be normalized")),
            _ => {}
        }
    }
    Ok(())
}

/// A validated job with its rendered job file.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub options: Options,
    pub dependencies: BTreeSet<String>,
    pub kind: JobKind,
    pub job_file: String,
}

/// Output of [`Project::build`].
#[derive(Debug, Clone)]
pub struct CompiledProject {
    pub name: String,
    pub properties: Options,
    /// Rendered properties entry, present when properties are non-empty.
    pub properties_file: Option<String>,
    pub jobs: BTreeMap<String, CompiledJob>,
    /// Archive path to source path.
    pub files: BTreeMap<String, PathBuf>,
}

impl CompiledProject {
    /// Names of the workflow roots.
    pub fn flows(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|(_, job)| job.kind == JobKind::Workflow)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Jobs of the workflow rooted at `root`, root included.
    pub fn flow_jobs(&self, root: &str) -> Option<BTreeSet<String>> {
        if !self.jobs.contains_key(root) {
            return None;
        }
        let deps: graph::DependencyMap = self
            .jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.dependencies.clone()))
            .collect();
        Some(graph::reachable(&deps, root))
    }

    /// Archive path of the properties entry.
    pub fn properties_entry(&self) -> String {
        format!("{}{}", self.name, PROPERTIES_SUFFIX)
    }
}
