//! Dependency graph construction from child task bodies.
//!
//! The map is advisory: it orders worker launches but never gates them.
//! Detection is best-effort text extraction, so any failure degrades to an
//! empty map (full parallelism) rather than aborting the run.

use crate::task::Task;
use anyhow::Result;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Mapping from task identity to the sibling identities it depends on.
///
/// `BTreeMap` keeps serialization order stable across runs, which matters
/// because the map is persisted into the parent workspace record.
pub type DependencyMap = BTreeMap<String, Vec<String>>;

/// An empty dependency set for every child (full parallelism).
pub fn empty_map(children: &[Task]) -> DependencyMap {
    children
        .iter()
        .map(|t| (t.id.clone(), Vec::new()))
        .collect()
}

/// Build the dependency map for a set of children.
///
/// Never fails: detection errors degrade to an empty map.
pub fn build_dependency_map(children: &[Task]) -> DependencyMap {
    dependency_map_or_empty(children, detect_references(children))
}

fn dependency_map_or_empty(children: &[Task], detected: Result<DependencyMap>) -> DependencyMap {
    match detected {
        Ok(map) => map,
        Err(e) => {
            warn!("dependency detection failed, falling back to full parallelism: {e:#}");
            empty_map(children)
        }
    }
}

/// Extract explicit cross-references between child task bodies.
///
/// Recognized forms, case-insensitive:
/// - "depends on \[task\] X" / "blocked by X" / "after X" / "requires X"
/// - bare "#X" mentions
///
/// Only references that resolve to a sibling id become edges; self-references
/// and unknown ids are dropped.
fn detect_references(children: &[Task]) -> Result<DependencyMap> {
    let phrase =
        Regex::new(r"(?i)\b(?:depends\s+on|blocked\s+by|after|requires)\s+(?:task\s+)?#?([A-Za-z0-9][A-Za-z0-9._/-]*)")?;
    let mention = Regex::new(r"#([A-Za-z0-9][A-Za-z0-9._/-]*)")?;

    // Sibling ids, matched case-insensitively.
    let ids: BTreeMap<String, String> = children
        .iter()
        .map(|t| (t.id.to_lowercase(), t.id.clone()))
        .collect();

    let mut map = empty_map(children);
    for task in children {
        let mut deps: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let captures = phrase
            .captures_iter(&task.body)
            .chain(mention.captures_iter(&task.body));

        for cap in captures {
            let token = cap[1].trim_end_matches(['.', ',', ';', ':']).to_lowercase();
            let Some(sibling) = ids.get(&token) else {
                continue;
            };
            if *sibling == task.id || !seen.insert(sibling.clone()) {
                continue;
            }
            deps.push(sibling.clone());
        }

        map.insert(task.id.clone(), deps);
    }

    Ok(map)
}

/// Compute a best-effort launch order for the given children.
///
/// Kahn's algorithm over the advisory map. Dependencies pointing outside the
/// given set (already done, or unknown) are treated as satisfied. If a cycle
/// remains, the leftover tasks are appended in input order instead of
/// blocking the run.
pub fn launch_order(children: &[Task], map: &DependencyMap) -> Vec<Task> {
    let present: HashSet<&str> = children.iter().map(|t| t.id.as_str()).collect();

    // Effective in-set dependency counts.
    let deps_of = |id: &str| -> Vec<&str> {
        map.get(id)
            .map(|deps| {
                deps.iter()
                    .map(String::as_str)
                    .filter(|d| present.contains(d) && *d != id)
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut in_degree: BTreeMap<&str, usize> = children
        .iter()
        .map(|t| (t.id.as_str(), deps_of(&t.id).len()))
        .collect();

    let mut ordered: Vec<Task> = Vec::with_capacity(children.len());
    let mut placed: HashSet<String> = HashSet::new();

    loop {
        let ready: Vec<&Task> = children
            .iter()
            .filter(|t| !placed.contains(&t.id) && in_degree.get(t.id.as_str()) == Some(&0))
            .collect();
        if ready.is_empty() {
            break;
        }
        for task in ready {
            placed.insert(task.id.clone());
            ordered.push(task.clone());
            for other in children {
                if placed.contains(&other.id) {
                    continue;
                }
                if deps_of(&other.id).contains(&task.id.as_str())
                    && let Some(deg) = in_degree.get_mut(other.id.as_str())
                {
                    *deg = deg.saturating_sub(1);
                }
            }
        }
    }

    // Cycle remainder: fall back to input order.
    if ordered.len() != children.len() {
        warn!("dependency cycle detected; launching remaining tasks in input order");
        for task in children {
            if !placed.contains(&task.id) {
                ordered.push(task.clone());
            }
        }
    }

    ordered
}
