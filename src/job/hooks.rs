//! Reusable job hooks.

use std::path::PathBuf;
use std::sync::Arc;

use super::JobHooks;
use crate::options::Options;
use crate::project::{Project, ProjectError};

/// Adds the files a job needs to the project when the job is added.
#[derive(Debug, Clone, Default)]
pub struct AttachFiles {
    files: Vec<(PathBuf, Option<String>)>,
}

impl AttachFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `source`, stored at `dest` (or its base name) in the archive.
    pub fn file(mut self, source: impl Into<PathBuf>, dest: Option<String>) -> Self {
        self.files.push((source.into(), dest));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl JobHooks for AttachFiles {
    fn on_add(&self, project: &mut Project, name: &str) -> Result<(), ProjectError> {
        for (source, dest) in &self.files {
            log::debug!("job '{}' attaches {}", name, source.display());
            project.add_file(source.clone(), dest.as_deref())?;
        }
        Ok(())
    }
}

/// Runs several hooks in order, stopping at the first error.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn JobHooks>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hooks: Arc<dyn JobHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }
}

impl JobHooks for HookSet {
    fn on_add(&self, project: &mut Project, name: &str) -> Result<(), ProjectError> {
        for hooks in &self.hooks {
            hooks.on_add(project, name)?;
        }
        Ok(())
    }

    fn on_build(
        &self,
        project: &Project,
        name: &str,
        options: &mut Options,
    ) -> Result<(), ProjectError> {
        for hooks in &self.hooks {
            hooks.on_build(project, name, options)?;
        }
        Ok(())
    }
}
