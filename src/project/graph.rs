//! Dependency graph checks and job classification.
//!
//! Edges point from a job to the jobs it depends on. A job nothing depends on
//! is the root of a workflow.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::{JobKind, ProjectError};
use crate::job::{FLOW_NAME_KEY, FLOW_TYPE, TYPE_KEY};
use crate::options::Options;

pub(crate) type DependencyMap = BTreeMap<String, BTreeSet<String>>;

/// Every dependency must name a job of the same project.
pub(crate) fn check_known(deps: &DependencyMap) -> Result<(), ProjectError> {
    for (job, upstream) in deps {
        if let Some(missing) = upstream.iter().find(|d| !deps.contains_key(*d)) {
            return Err(ProjectError::UnknownDependency {
                job: job.clone(),
                dependency: missing.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Find a dependency cycle. The returned path starts and ends on the same job.
///
/// Depth-first walk over an explicit stack, so chain length is bounded by
/// memory rather than by the thread's stack.
pub(crate) fn find_cycle(deps: &DependencyMap) -> Option<Vec<String>> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    for root in deps.keys() {
        if marks.contains_key(root.as_str()) {
            continue;
        }
        marks.insert(root, Mark::Visiting);
        let mut path = vec![(root.as_str(), upstream(deps, root))];
        while let Some(frame) = path.last_mut() {
            let job = frame.0;
            match frame.1.next() {
                Some(next) => match marks.get(next.as_str()) {
                    Some(Mark::Visiting) => {
                        let start = path
                            .iter()
                            .position(|(j, _)| *j == next.as_str())
                            .unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|(j, _)| j.to_string()).collect();
                        cycle.push(next.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Visiting);
                        path.push((next.as_str(), upstream(deps, next)));
                    }
                },
                None => {
                    marks.insert(job, Mark::Done);
                    path.pop();
                }
            }
        }
    }
    None
}

fn upstream<'a>(deps: &'a DependencyMap, job: &str) -> impl Iterator<Item = &'a String> {
    deps.get(job).into_iter().flatten()
}

/// Classify each job by counting how many jobs depend on it.
pub(crate) fn classify(deps: &DependencyMap) -> BTreeMap<String, JobKind> {
    let mut dependents: BTreeMap<&str, usize> = deps.keys().map(|j| (j.as_str(), 0)).collect();
    for upstream in deps.values() {
        for dep in upstream {
            if let Some(count) = dependents.get_mut(dep.as_str()) {
                *count += 1;
            }
        }
    }
    dependents
        .into_iter()
        .map(|(job, count)| {
            let kind = if count == 0 { JobKind::Workflow } else { JobKind::Job };
            (job.to_string(), kind)
        })
        .collect()
}

/// Every `flow` job must embed a workflow root, and flows must not embed
/// each other in a loop.
pub(crate) fn check_subflows(
    built: &BTreeMap<String, Options>,
    deps: &DependencyMap,
    kinds: &BTreeMap<String, JobKind>,
) -> Result<(), ProjectError> {
    let mut embeds: BTreeMap<&str, &str> = BTreeMap::new();
    for (job, options) in built {
        if options.get(TYPE_KEY).and_then(Value::as_str) != Some(FLOW_TYPE) {
            continue;
        }
        let invalid = |flow: &str, reason: &str| ProjectError::InvalidSubflow {
            job: job.clone(),
            flow: flow.to_string(),
            reason: reason.to_string(),
        };
        let flow = options
            .get(FLOW_NAME_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("", "missing flow.name"))?;
        match kinds.get(flow) {
            Some(JobKind::Workflow) => {}
            Some(JobKind::Job) => return Err(invalid(flow, "job is not the root of a flow")),
            None => return Err(invalid(flow, "no such flow in the project")),
        }
        embeds.insert(job, flow);
    }
    if embeds.is_empty() {
        return Ok(());
    }

    let nesting: DependencyMap = kinds
        .iter()
        .filter(|(_, kind)| **kind == JobKind::Workflow)
        .map(|(root, _)| {
            let inner = reachable(deps, root)
                .iter()
                .filter_map(|job| embeds.get(job.as_str()))
                .map(|flow| flow.to_string())
                .collect();
            (root.clone(), inner)
        })
        .collect();
    match find_cycle(&nesting) {
        Some(cycle) => Err(ProjectError::SubflowCycle { cycle }),
        None => Ok(()),
    }
}

/// `root` and every job it transitively depends on.
pub(crate) fn reachable(deps: &DependencyMap, root: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![root.to_string()];
    while let Some(job) = pending.pop() {
        if !seen.insert(job.clone()) {
            continue;
        }
        if let Some(upstream) = deps.get(&job) {
            pending.extend(upstream.iter().filter(|d| !seen.contains(*d)).cloned());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyMap {
        edges
            .iter()
            .map(|(job, deps)| {
                (
                    job.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_classify_fan_in() {
        let deps = graph(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
        let kinds = classify(&deps);
        assert_eq!(kinds["a"], JobKind::Job);
        assert_eq!(kinds["b"], JobKind::Job);
        assert_eq!(kinds["c"], JobKind::Workflow);
    }

    #[test]
    fn test_classify_disconnected_components() {
        let deps = graph(&[("a", &["b"]), ("b", &[]), ("lonely", &[])]);
        let kinds = classify(&deps);
        assert_eq!(kinds["a"], JobKind::Workflow);
        assert_eq!(kinds["b"], JobKind::Job);
        assert_eq!(kinds["lonely"], JobKind::Workflow);
    }

    #[test]
    fn test_unknown_dependency() {
        let deps = graph(&[("a", &["ghost"])]);
        match check_known(&deps).unwrap_err() {
            ProjectError::UnknownDependency { job, dependency } => {
                assert_eq!(job, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_mutual_dependency_is_a_cycle() {
        let deps = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert_eq!(find_cycle(&deps).unwrap(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let deps = graph(&[("a", &["a"])]);
        assert_eq!(find_cycle(&deps).unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_longer_cycle_behind_a_prefix() {
        let deps = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["d"]), ("d", &["b"])]);
        assert_eq!(find_cycle(&deps).unwrap(), vec!["b", "c", "d", "b"]);
    }

    #[test]
    fn test_deep_chain_does_not_exhaust_stack() {
        let depth = 200_000;
        let name = |i: usize| format!("job{:06}", i);
        let mut deps: DependencyMap = (0..depth)
            .map(|i| {
                let upstream = if i + 1 < depth {
                    BTreeSet::from([name(i + 1)])
                } else {
                    BTreeSet::new()
                };
                (name(i), upstream)
            })
            .collect();
        assert!(find_cycle(&deps).is_none());

        deps.insert(name(depth - 1), BTreeSet::from([name(0)]));
        let cycle = find_cycle(&deps).unwrap();
        assert_eq!(cycle.len(), depth + 1);
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn test_diamond_has_no_cycle() {
        let deps = graph(&[("a", &["b", "c"]), ("b", &["d"]), ("c", &["d"]), ("d", &[])]);
        assert!(find_cycle(&deps).is_none());
        let flow: Vec<_> = reachable(&deps, "a").into_iter().collect();
        assert_eq!(flow, vec!["a", "b", "c", "d"]);
    }
}
