//! Project archives
//!
//! Packages a [`CompiledProject`] into the zip archive uploaded to the
//! server. Entries are written sorted by path with a fixed timestamp and
//! normalized permissions, so the same project always yields the same bytes.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::project::{CompiledProject, JOB_SUFFIX};

/// Errors for archive operations
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive already exists: {0} (use --overwrite to replace it)")]
    Exists(PathBuf),
}

impl ArchiveError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

enum EntrySource<'a> {
    Generated(&'a str),
    File(&'a Path),
}

/// Result of writing an archive to disk
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
    /// Entry paths in archive order.
    pub entries: Vec<String>,
}

/// Builds the archive of a compiled project
pub struct ArchiveBuilder<'a> {
    project: &'a CompiledProject,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(project: &'a CompiledProject) -> Self {
        Self { project }
    }

    fn entries(&self) -> BTreeMap<String, EntrySource<'a>> {
        let project = self.project;
        let mut entries = BTreeMap::new();
        for (name, job) in &project.jobs {
            entries.insert(
                format!("{}{}", name, JOB_SUFFIX),
                EntrySource::Generated(job.job_file.as_str()),
            );
        }
        if let Some(properties) = &project.properties_file {
            entries.insert(
                project.properties_entry(),
                EntrySource::Generated(properties.as_str()),
            );
        }
        for (dest, source) in &project.files {
            entries.insert(dest.clone(), EntrySource::File(source.as_path()));
        }
        entries
    }

    /// Entry paths in the order they are written.
    pub fn entry_names(&self) -> Vec<String> {
        self.entries().into_keys().collect()
    }

    fn entry_options(&self, mode: u32) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(mode)
    }

    /// Build the archive in memory.
    pub fn build_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for (name, source) in self.entries() {
            match source {
                EntrySource::Generated(text) => {
                    writer.start_file(name.clone(), self.entry_options(0o644))?;
                    writer
                        .write_all(text.as_bytes())
                        .map_err(|e| ArchiveError::io(Path::new(&name), e))?;
                }
                EntrySource::File(path) => {
                    let bytes = fs::read(path).map_err(|e| ArchiveError::io(path, e))?;
                    let mode = if is_executable(path) { 0o755 } else { 0o644 };
                    writer.start_file(name.clone(), self.entry_options(mode))?;
                    writer
                        .write_all(&bytes)
                        .map_err(|e| ArchiveError::io(path, e))?;
                }
            }
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Write the archive to `path`.
    ///
    /// The archive is staged in a temporary file next to `path` and only
    /// moved into place once complete.
    pub fn write_to(&self, path: &Path, overwrite: bool) -> Result<ArchiveSummary, ArchiveError> {
        if path.exists() && !overwrite {
            return Err(ArchiveError::Exists(path.to_path_buf()));
        }

        let bytes = self.build_bytes()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir).map_err(|e| ArchiveError::io(dir, e))?;
        if let Err(e) = staged.write_all(&bytes).and_then(|_| staged.flush()) {
            return Err(ArchiveError::io(staged.path(), e));
        }
        staged
            .persist(path)
            .map_err(|e| ArchiveError::io(path, e.error))?;

        let summary = ArchiveSummary {
            path: path.to_path_buf(),
            size: bytes.len() as u64,
            sha256: sha256_hex(&bytes),
            entries: self.entry_names(),
        };
        log::info!(
            "wrote {} ({} bytes, {} entries)",
            summary.path.display(),
            summary.size,
            summary.entries.len()
        );
        Ok(summary)
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path) {
            return metadata.permissions().mode() & 0o111 != 0;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::project::Project;
    use serde_json::json;
    use std::io::Read;
    use tempfile::TempDir;

    fn sample(dir: &Path) -> CompiledProject {
        let script = dir.join("run.sh");
        fs::write(&script, "echo hi\n").unwrap();

        let mut project = Project::new("sample");
        project.set_properties(json!({"user.to.proxy": "etl"})).unwrap();
        project
            .add_job("first", Job::from_options(json!({"type": "command", "command": "sh run.sh"})).unwrap())
            .unwrap();
        project
            .add_job(
                "second",
                Job::from_options(json!({"type": "noop", "dependencies": "first"})).unwrap(),
            )
            .unwrap();
        project.add_file(&script, Some("bin/run.sh")).unwrap();
        project.build().unwrap()
    }

    #[test]
    fn test_entries_sorted() {
        let dir = TempDir::new().unwrap();
        let compiled = sample(dir.path());
        assert_eq!(
            ArchiveBuilder::new(&compiled).entry_names(),
            vec!["bin/run.sh", "first.job", "sample.properties", "second.job"]
        );
    }

    #[test]
    fn test_archive_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let compiled = sample(dir.path());
        let first = ArchiveBuilder::new(&compiled).build_bytes().unwrap();
        let second = ArchiveBuilder::new(&compiled).build_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_archive_contents() {
        let dir = TempDir::new().unwrap();
        let compiled = sample(dir.path());
        let bytes = ArchiveBuilder::new(&compiled).build_bytes().unwrap();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut text = String::new();
        archive
            .by_name("second.job")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "dependencies=first\ntype=noop\n");

        let mut script = String::new();
        archive
            .by_name("bin/run.sh")
            .unwrap()
            .read_to_string(&mut script)
            .unwrap();
        assert_eq!(script, "echo hi\n");
    }

    #[test]
    fn test_missing_source_reported() {
        let mut project = Project::new("broken");
        project
            .add_job("a", Job::from_options(json!({"type": "noop"})).unwrap())
            .unwrap();
        project.add_file("/definitely/not/here.txt", None).unwrap();
        let compiled = project.build().unwrap();

        match ArchiveBuilder::new(&compiled).build_bytes().unwrap_err() {
            ArchiveError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/definitely/not/here.txt"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_write_to_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let compiled = sample(dir.path());
        let target = dir.path().join("sample.zip");
        fs::write(&target, "old").unwrap();

        let builder = ArchiveBuilder::new(&compiled);
        assert!(matches!(
            builder.write_to(&target, false),
            Err(ArchiveError::Exists(_))
        ));
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");

        let summary = builder.write_to(&target, true).unwrap();
        assert_eq!(summary.size, fs::metadata(&target).unwrap().len());
        assert_eq!(summary.sha256.len(), 64);
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let mut project = Project::new("broken");
        project
            .add_job("a", Job::from_options(json!({"type": "noop"})).unwrap())
            .unwrap();
        project.add_file(dir.path().join("missing.txt"), None).unwrap();
        let compiled = project.build().unwrap();

        let target = dir.path().join("broken.zip");
        assert!(ArchiveBuilder::new(&compiled).write_to(&target, false).is_err());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
