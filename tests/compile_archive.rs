//! Project Compilation and Archive Tests
//!
//! Builds projects from manifests and through the builder API, then checks
//! the graph classification and the archive contents.

use std::io::Read;
use std::path::Path;

use azkaban_cli::archive::{ArchiveBuilder, ArchiveError};
use azkaban_cli::job::Job;
use azkaban_cli::mock::read_archive;
use azkaban_cli::project::{load_manifest, JobKind, ManifestError, Project, ProjectError};
use serde_json::json;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn entry(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    content
}

const MANIFEST: &str = r#"
name = "etl"

[properties]
user.to.proxy = "etl"

[defaults.shell]
type = "command"
retries = 2

[jobs.extract]
defaults = ["shell"]
options = { command = "sh extract.sh" }
files = [{ source = "scripts/extract.sh", dest = "extract.sh" }]

[jobs.transform]
defaults = ["shell"]
options = { command = "sh transform.sh", dependencies = "extract", retries = 5 }

[jobs.load]
defaults = ["shell"]
options = { command = "sh load.sh", dependencies = ["transform"] }

[[files]]
source = "data/lookup.csv"
dest = "lookup/lookup.csv"
"#;

fn manifest_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "azkaban.toml", MANIFEST);
    write(dir.path(), "scripts/extract.sh", "#!/bin/sh\necho extract\n");
    write(dir.path(), "data/lookup.csv", "id,name\n1,a\n");
    dir
}

#[test]
fn test_manifest_compiles() {
    let dir = manifest_dir();
    let project = load_manifest(&dir.path().join("azkaban.toml")).unwrap();
    let compiled = project.build().unwrap();

    assert_eq!(compiled.name, "etl");
    assert_eq!(compiled.flows(), vec!["load"]);
    assert_eq!(compiled.jobs["extract"].kind, JobKind::Job);
    assert_eq!(compiled.jobs["load"].kind, JobKind::Workflow);
    assert_eq!(
        compiled.jobs["transform"].job_file,
        "command=sh transform.sh\ndependencies=extract\nretries=5\ntype=command\n"
    );
    assert!(compiled.files.contains_key("extract.sh"));
    assert!(compiled.files.contains_key("lookup/lookup.csv"));
}

#[test]
fn test_manifest_archive_contents() {
    let dir = manifest_dir();
    let compiled = load_manifest(&dir.path().join("azkaban.toml"))
        .unwrap()
        .build()
        .unwrap();
    let builder = ArchiveBuilder::new(&compiled);
    let bytes = builder.build_bytes().unwrap();

    assert_eq!(
        builder.entry_names(),
        vec![
            "etl.properties",
            "extract.job",
            "extract.sh",
            "load.job",
            "lookup/lookup.csv",
            "transform.job",
        ]
    );
    assert_eq!(entry(&bytes, "etl.properties"), "user.to.proxy=etl\n");
    assert_eq!(entry(&bytes, "extract.sh"), "#!/bin/sh\necho extract\n");
    assert_eq!(
        entry(&bytes, "load.job"),
        "command=sh load.sh\ndependencies=transform\nretries=2\ntype=command\n"
    );

    let (jobs, files) = read_archive(&bytes).unwrap();
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs["load"].dependencies, vec!["transform"]);
    assert!(files.contains(&"lookup/lookup.csv".to_string()));
}

#[test]
fn test_archive_is_reproducible() {
    let dir = manifest_dir();
    let path = dir.path().join("azkaban.toml");

    let first = load_manifest(&path).unwrap().build().unwrap();
    let second = load_manifest(&path).unwrap().build().unwrap();

    let a = ArchiveBuilder::new(&first).build_bytes().unwrap();
    let b = ArchiveBuilder::new(&second).build_bytes().unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_write_to_refuses_overwrite() {
    let dir = manifest_dir();
    let compiled = load_manifest(&dir.path().join("azkaban.toml"))
        .unwrap()
        .build()
        .unwrap();
    let target = dir.path().join("out").join("etl.zip");
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();

    let summary = ArchiveBuilder::new(&compiled).write_to(&target, false).unwrap();
    assert_eq!(summary.size, std::fs::metadata(&target).unwrap().len());
    assert_eq!(summary.sha256.len(), 64);

    let err = ArchiveBuilder::new(&compiled)
        .write_to(&target, false)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::Exists(_)));

    let again = ArchiveBuilder::new(&compiled).write_to(&target, true).unwrap();
    assert_eq!(again.sha256, summary.sha256);
}

#[test]
fn test_missing_source_file_fails_archive() {
    let dir = manifest_dir();
    std::fs::remove_file(dir.path().join("data/lookup.csv")).unwrap();
    let compiled = load_manifest(&dir.path().join("azkaban.toml"))
        .unwrap()
        .build()
        .unwrap();

    let err = ArchiveBuilder::new(&compiled).build_bytes().unwrap_err();
    match err {
        ArchiveError::Io { path, .. } => assert!(path.ends_with("data/lookup.csv")),
        other => panic!("expected Io, got {:?}", other),
    }
}

#[test]
fn test_merged_manifest() {
    let dir = manifest_dir();
    write(
        dir.path(),
        "reporting.toml",
        r#"
name = "reporting"

[jobs.report]
options = { type = "command", command = "sh report.sh", dependencies = "load" }
"#,
    );
    write(
        dir.path(),
        "all.toml",
        r#"
name = "all"
merge = ["azkaban.toml", "reporting.toml"]
"#,
    );

    let compiled = load_manifest(&dir.path().join("all.toml"))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(compiled.name, "all");
    assert_eq!(compiled.flows(), vec!["report"]);
    assert_eq!(compiled.jobs["load"].kind, JobKind::Job);
    assert_eq!(compiled.flow_jobs("report").unwrap().len(), 4);
}

#[test]
fn test_manifest_merge_cycle() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.toml", "name = \"a\"\nmerge = [\"b.toml\"]\n");
    write(dir.path(), "b.toml", "name = \"b\"\nmerge = [\"a.toml\"]\n");

    let err = load_manifest(&dir.path().join("a.toml")).unwrap_err();
    assert!(matches!(err, ManifestError::MergeCycle(_)));
}

#[test]
fn test_two_roots_over_shared_dependency() {
    let mut project = Project::new("shared");
    project
        .add_job("c", Job::from_options(json!({"type": "noop"})).unwrap())
        .unwrap();
    project
        .add_job(
            "a",
            Job::from_options(json!({"type": "noop", "dependencies": "c"})).unwrap(),
        )
        .unwrap();
    project
        .add_job(
            "b",
            Job::from_options(json!({"type": "noop", "dependencies": "c"})).unwrap(),
        )
        .unwrap();

    let compiled = project.build().unwrap();

    assert_eq!(compiled.jobs["a"].kind, JobKind::Workflow);
    assert_eq!(compiled.jobs["b"].kind, JobKind::Workflow);
    assert_eq!(compiled.jobs["c"].kind, JobKind::Job);
}

#[test]
fn test_cycle_is_rejected_before_archiving() {
    let mut project = Project::new("loop");
    project
        .add_job(
            "a",
            Job::from_options(json!({"type": "noop", "dependencies": "b"})).unwrap(),
        )
        .unwrap();
    project
        .add_job(
            "b",
            Job::from_options(json!({"type": "noop", "dependencies": "a"})).unwrap(),
        )
        .unwrap();

    match project.build().unwrap_err() {
        ProjectError::CyclicDependency { cycle } => {
            assert!(cycle.contains(&"a".to_string()));
            assert!(cycle.contains(&"b".to_string()));
        }
        other => panic!("expected CyclicDependency, got {:?}", other),
    }
}

#[test]
fn test_type_from_project_properties() {
    let mut project = Project::new("props");
    project.set_properties(json!({"type": "command"})).unwrap();
    project
        .add_job("a", Job::from_options(json!({"command": "true"})).unwrap())
        .unwrap();

    let compiled = project.build().unwrap();

    assert_eq!(compiled.jobs["a"].job_file, "command=true\n");
    assert_eq!(compiled.properties_file.as_deref(), Some("type=command\n"));
}
