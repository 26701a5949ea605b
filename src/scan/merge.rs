use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::model::{AnalysisResult, ChangeSet, DepKey, DependencyAnalysis, FailedPackage};

/// Folds an incremental analysis (covering only the changed dependencies)
/// into the previous full result.
///
/// The merged dependency set equals
/// `(previous − removed − changed-by-identity) ∪ incremental`. Summary and
/// aggregate score are recomputed from the complete merged set with the same
/// precedence rules a full scan uses, never blended from old and new
/// scores. Merging the same incremental result in twice is idempotent.
pub fn merge_results(
    previous: &AnalysisResult,
    incremental: &AnalysisResult,
    changes: &ChangeSet,
) -> AnalysisResult {
    let removed: HashSet<&DepKey> = changes.removed.iter().collect();
    let incoming: HashSet<DepKey> = incremental.dependencies.iter().map(|e| e.key()).collect();

    // A mismatch between what the incremental run covered and what the
    // change set asked for indicates a bug downstream, but must not abort
    // the merge.
    let expected: BTreeSet<DepKey> = changes.changed.iter().map(|d| d.key()).collect();
    let covered: BTreeSet<DepKey> = incoming.iter().cloned().collect();
    if expected != covered {
        let missing: Vec<String> = expected
            .difference(&covered)
            .map(|k| k.to_string())
            .collect();
        let unexpected: Vec<String> = covered
            .difference(&expected)
            .map(|k| k.to_string())
            .collect();
        warn!(
            missing = ?missing,
            unexpected = ?unexpected,
            "incremental analysis coverage does not match the change set"
        );
    }

    let mut merged: Vec<DependencyAnalysis> =
        Vec::with_capacity(previous.dependencies.len() + incremental.dependencies.len());
    for entry in &previous.dependencies {
        let key = entry.key();
        if removed.contains(&key) || incoming.contains(&key) {
            continue;
        }
        merged.push(entry.clone());
    }
    merged.extend(incremental.dependencies.iter().cloned());

    // Failed-package lists merge replace-by-name; failures for removed
    // dependencies drop out with them.
    let removed_names: HashSet<&str> = changes.removed.iter().map(|k| k.name.as_str()).collect();
    let mut failed: Vec<FailedPackage> = previous
        .failed_packages
        .iter()
        .filter(|f| {
            !removed_names.contains(f.name.as_str())
                && !incremental
                    .failed_packages
                    .iter()
                    .any(|fresh| fresh.name == f.name)
        })
        .cloned()
        .collect();
    failed.extend(incremental.failed_packages.iter().cloned());

    debug!(
        kept = merged.len() - incremental.dependencies.len(),
        fresh = incremental.dependencies.len(),
        removed = changes.removed.len(),
        "merged incremental result into previous"
    );

    let mut result = AnalysisResult::new(incremental.timestamp, merged, failed);
    result.cache_stats = incremental.cache_stats;
    result.network_status = incremental.network_status;
    result.metrics = incremental.metrics.clone();
    result
}
