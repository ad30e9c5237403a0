//! Mock server state: users, sessions, projects, executions.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{Cursor, Read};

/// A job as read back from an uploaded archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockJob {
    pub job_type: Option<String>,
    pub dependencies: Vec<String>,
}

/// A project on the mock server
#[derive(Debug, Clone)]
pub struct MockProject {
    pub id: u64,
    pub name: String,
    pub description: String,
    /// Number of archives uploaded so far
    pub version: u32,
    pub jobs: BTreeMap<String, MockJob>,
    /// Archive entries other than job files
    pub files: Vec<String>,
}

impl MockProject {
    /// Jobs nothing depends on.
    pub fn flows(&self) -> Vec<String> {
        let depended: BTreeSet<&String> =
            self.jobs.values().flat_map(|j| j.dependencies.iter()).collect();
        self.jobs
            .keys()
            .filter(|name| !depended.contains(name))
            .cloned()
            .collect()
    }

    /// Jobs of the flow rooted at `flow`.
    pub fn flow_jobs(&self, flow: &str) -> Option<BTreeMap<String, MockJob>> {
        if !self.flows().iter().any(|f| f == flow) {
            return None;
        }
        let mut found = BTreeMap::new();
        let mut pending = vec![flow.to_string()];
        while let Some(name) = pending.pop() {
            if found.contains_key(&name) {
                continue;
            }
            if let Some(job) = self.jobs.get(&name) {
                pending.extend(job.dependencies.iter().cloned());
                found.insert(name, job.clone());
            }
        }
        Some(found)
    }
}

/// An execution on the mock server
#[derive(Debug, Clone)]
pub struct MockExecution {
    pub id: u64,
    pub project: String,
    pub flow: String,
    pub status: String,
    /// Job name to status
    pub nodes: BTreeMap<String, String>,
    /// Status polls left before the execution finishes
    pub remaining_polls: u32,
    pub log: String,
    pub job_logs: BTreeMap<String, String>,
}

impl MockExecution {
    pub fn is_running(&self) -> bool {
        self.status == "RUNNING"
    }

    /// Move to `status`, settling every job that has not finished.
    pub fn finish(&mut self, status: &str) {
        self.status = status.to_string();
        for node in self.nodes.values_mut() {
            *node = match node.as_str() {
                "DISABLED" => "SKIPPED".to_string(),
                "RUNNING" => status.to_string(),
                other => other.to_string(),
            };
        }
        self.log.push_str(&format!("Flow {} finished: {}\n", self.flow, status));
    }
}

/// A schedule registered on the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSchedule {
    pub id: u64,
    pub project: String,
    pub flow: String,
    pub date: String,
    pub time: String,
    pub period: Option<String>,
}

/// Mutable state of the mock server
#[derive(Debug, Default)]
pub struct MockState {
    pub users: HashMap<String, String>,
    pub sessions: HashSet<String>,
    pub projects: BTreeMap<String, MockProject>,
    pub executions: BTreeMap<u64, MockExecution>,
    pub schedules: Vec<MockSchedule>,
    /// Successful logins
    pub login_count: u32,
    /// Operation names in arrival order
    pub requests: Vec<String>,
    /// Status polls before a new execution finishes
    pub polls_per_execution: u32,
    next_id: u64,
}

impl MockState {
    pub fn new() -> Self {
        Self {
            polls_per_execution: 1,
            ..Self::default()
        }
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Read the job definitions and other entries of an uploaded archive.
pub fn read_archive(bytes: &[u8]) -> Result<(BTreeMap<String, MockJob>, Vec<String>), String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut jobs = BTreeMap::new();
    let mut files = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| e.to_string())?;
        let name = entry.name().to_string();
        match name.strip_suffix(".job") {
            Some(job) if !job.contains('/') => {
                let mut text = String::new();
                entry.read_to_string(&mut text).map_err(|e| e.to_string())?;
                jobs.insert(job.to_string(), parse_job_file(&text));
            }
            _ => files.push(name),
        }
    }

    if jobs.is_empty() {
        return Err("No flows found in the archive".to_string());
    }
    for (name, job) in &jobs {
        if let Some(missing) = job.dependencies.iter().find(|d| !jobs.contains_key(*d)) {
            return Err(format!("Job {} depends on missing job {}", name, missing));
        }
    }
    Ok((jobs, files))
}

fn parse_job_file(text: &str) -> MockJob {
    let options: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();
    MockJob {
        job_type: options.get("type").map(|t| t.to_string()),
        dependencies: options
            .get("dependencies")
            .map(|deps| {
                deps.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(jobs: &[(&str, &[&str])]) -> MockProject {
        MockProject {
            id: 1,
            name: "p".to_string(),
            description: String::new(),
            version: 1,
            jobs: jobs
                .iter()
                .map(|(name, deps)| {
                    (
                        name.to_string(),
                        MockJob {
                            job_type: Some("noop".to_string()),
                            dependencies: deps.iter().map(|d| d.to_string()).collect(),
                        },
                    )
                })
                .collect(),
            files: Vec::new(),
        }
    }

    #[test]
    fn test_flows_and_flow_jobs() {
        let project = project(&[("a", &[]), ("b", &["a"]), ("c", &[])]);
        assert_eq!(project.flows(), vec!["b", "c"]);
        let jobs = project.flow_jobs("b").unwrap();
        assert_eq!(jobs.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(project.flow_jobs("a").is_none());
    }

    #[test]
    fn test_parse_job_file() {
        let job = parse_job_file("dependencies=a, b\ntype=command\n");
        assert_eq!(job.job_type.as_deref(), Some("command"));
        assert_eq!(job.dependencies, vec!["a", "b"]);
    }

    #[test]
    fn test_read_archive_rejects_garbage() {
        assert!(read_archive(b"not a zip").is_err());
    }

    #[test]
    fn test_finish_settles_nodes() {
        let mut execution = MockExecution {
            id: 1,
            project: "p".to_string(),
            flow: "b".to_string(),
            status: "RUNNING".to_string(),
            nodes: [("a", "DISABLED"), ("b", "RUNNING")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            remaining_polls: 0,
            log: String::new(),
            job_logs: BTreeMap::new(),
        };
        execution.finish("SUCCEEDED");
        assert_eq!(execution.nodes["a"], "SKIPPED");
        assert_eq!(execution.nodes["b"], "SUCCEEDED");
        assert!(!execution.is_running());
    }
}
