//! Job model
//!
//! A job is one unit of work in a project. It is built from one or more
//! option layers (merged by [`crate::options`]) and serializes to the
//! `key=value` job-file format. Its upstream jobs are read from the
//! `dependencies` option.

mod flow;
mod hooks;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::options::{self, OptionMerger, Options, OptionsError};
use crate::project::{Project, ProjectError};

pub use flow::{FlowProperties, FlowProperty, Subflow, FLOW_NAME_KEY, FLOW_TYPE};
pub use hooks::{AttachFiles, HookSet};

/// Option carrying the job type.
pub const TYPE_KEY: &str = "type";

/// Option carrying the upstream job names.
pub const DEPENDENCIES_KEY: &str = "dependencies";

/// Lifecycle callbacks attached to a job.
///
/// Both methods default to doing nothing.
pub trait JobHooks: Send + Sync {
    /// Called right after the job is added to `project` under `name`.
    fn on_add(&self, project: &mut Project, name: &str) -> Result<(), ProjectError> {
        let _ = (project, name);
        Ok(())
    }

    /// Called before the job is serialized. `options` is the build-time copy
    /// of the job's options and may be amended.
    fn on_build(
        &self,
        project: &Project,
        name: &str,
        options: &mut Options,
    ) -> Result<(), ProjectError> {
        let _ = (project, name, options);
        Ok(())
    }
}

/// A job: merged options plus optional hooks.
#[derive(Clone)]
pub struct Job {
    layers: Vec<Options>,
    options: Options,
    hooks: Option<Arc<dyn JobHooks>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("options", &self.options)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

impl Job {
    /// Build a job from option layers, later layers taking precedence.
    pub fn new(layers: Vec<Value>) -> Result<Self, OptionsError> {
        let layers = layers
            .iter()
            .map(options::flatten)
            .collect::<Result<Vec<_>, _>>()?;
        let options = options::merge_flat(&layers);
        Ok(Self {
            layers,
            options,
            hooks: None,
        })
    }

    /// Build a job from a single option mapping.
    pub fn from_options(options: Value) -> Result<Self, OptionsError> {
        Self::new(vec![options])
    }

    /// Attach lifecycle hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn JobHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn hooks(&self) -> Option<&Arc<dyn JobHooks>> {
        self.hooks.as_ref()
    }

    /// Merged options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Latest definition of `key`.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    /// Every definition of `key`, earliest layer first.
    pub fn option_history(&self, key: &str) -> Vec<&Value> {
        self.layers.iter().filter_map(|layer| layer.get(key)).collect()
    }

    /// The job type, if any layer set one.
    pub fn job_type(&self) -> Option<String> {
        self.option(TYPE_KEY).and_then(scalar_text)
    }

    /// Names of the jobs this job depends on.
    pub fn dependencies(&self) -> BTreeSet<String> {
        dependencies_of(&self.options)
    }

    /// Serialize the job's own options to job-file text.
    pub fn to_job_file(&self) -> Result<String, OptionsError> {
        render_job_file(&OptionMerger::new(), &self.options)
    }
}

/// Parse the `dependencies` option of `options`.
///
/// Accepts a comma and/or whitespace separated string or a list of names.
pub fn dependencies_of(options: &Options) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    match options.get(DEPENDENCIES_KEY) {
        Some(Value::Array(items)) => {
            for item in items.iter().filter_map(scalar_text) {
                deps.extend(split_names(&item));
            }
        }
        Some(value) => {
            if let Some(text) = scalar_text(value) {
                deps.extend(split_names(&text));
            }
        }
        None => {}
    }
    deps
}

/// Render options as job-file text with normalized dependencies.
pub fn render_job_file(merger: &OptionMerger, options: &Options) -> Result<String, OptionsError> {
    let mut normalized = options.clone();
    let deps = dependencies_of(options);
    if deps.is_empty() {
        normalized.remove(DEPENDENCIES_KEY);
    } else {
        let joined: Vec<String> = deps.into_iter().collect();
        normalized.insert(DEPENDENCIES_KEY.to_string(), Value::String(joined.join(",")));
    }
    merger.to_text(&normalized)
}

/// Check that a job name can be used as an archive entry name.
pub fn validate_job_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name is empty".to_string());
    }
    if name.starts_with('.') {
        return Err("name must not start with '.'".to_string());
    }
    if let Some(c) = name
        .chars()
        .find(|c| *c == '/' || *c == '\\' || *c == ',' || c.is_control())
    {
        return Err(format!("name contains invalid character {:?}", c));
    }
    Ok(())
}

fn split_names(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
