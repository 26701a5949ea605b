use std::collections::HashMap;

use crate::model::{AnalysisResult, ChangeSet, DepKey, Dependency};

/// Diffs the current dependency set against the last stored result.
///
/// Pure function of its inputs: no side effects, no clock, no I/O.
/// Workspace-internal packages are excluded from comparison on both sides.
/// With no previous result, every external dependency counts as changed and
/// the set is marked as a full scan.
pub fn detect_changes(current: &[Dependency], previous: Option<&AnalysisResult>) -> ChangeSet {
    let external: Vec<&Dependency> = current.iter().filter(|d| !d.is_internal).collect();

    let Some(previous) = previous else {
        return ChangeSet {
            changed: external.into_iter().cloned().collect(),
            removed: Vec::new(),
            is_full_scan: true,
        };
    };

    let previous_versions: HashMap<DepKey, &str> = previous
        .dependencies
        .iter()
        .filter(|e| !e.dependency.is_internal)
        .map(|e| (e.key(), e.dependency.version.as_str()))
        .collect();
    let current_keys: HashMap<DepKey, ()> =
        external.iter().map(|d| (d.key(), ())).collect();

    let changed: Vec<Dependency> = external
        .iter()
        .filter(|dep| {
            previous_versions
                .get(&dep.key())
                .map_or(true, |version| *version != dep.version)
        })
        .map(|dep| (*dep).clone())
        .collect();

    let mut removed: Vec<DepKey> = previous_versions
        .keys()
        .filter(|key| !current_keys.contains_key(*key))
        .cloned()
        .collect();
    // HashMap iteration order is arbitrary; keep removal lists stable.
    removed.sort();

    ChangeSet {
        changed,
        removed,
        is_full_scan: false,
    }
}
