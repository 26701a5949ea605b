use chrono::{DateTime, Duration, Utc};

use crate::model::{AnalysisResult, ChangeSet};

/// How the coordinator should use the previous result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// The change set is non-empty (or nothing is stored); dispatch analysis.
    /// Full vs incremental is the coordinator's call.
    Dispatch,

    /// Previous result is still valid; reuse it verbatim and mark the
    /// outcome cached with the given age.
    Reuse { age: Duration },

    /// No changes, but the snapshot outlived the staleness threshold. Run a
    /// full fresh analysis; the outcome is live for observers even though it
    /// is written back into the cache.
    RefreshStale,

    /// No changes reported, but the dependency counts disagree with the
    /// snapshot: the change signal is stale or corrupted. Run a full fresh
    /// analysis.
    RefreshCountMismatch,
}

/// Decides whether a stored result is still trustworthy.
#[derive(Debug, Clone)]
pub struct CacheExpiryPolicy {
    staleness_threshold: Duration,
}

impl CacheExpiryPolicy {
    pub const DEFAULT_STALENESS_HOURS: i64 = 24;

    pub fn new() -> Self {
        Self {
            staleness_threshold: Duration::hours(Self::DEFAULT_STALENESS_HOURS),
        }
    }

    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Applies the decision table. `current_count` counts external (non
    /// internal) dependencies, matching what analysis results store.
    pub fn evaluate(
        &self,
        previous: Option<&AnalysisResult>,
        changes: &ChangeSet,
        current_count: usize,
        now: DateTime<Utc>,
    ) -> CacheDecision {
        let Some(previous) = previous else {
            return CacheDecision::Dispatch;
        };
        if !changes.is_empty() {
            return CacheDecision::Dispatch;
        }
        if previous.dependency_count() != current_count {
            return CacheDecision::RefreshCountMismatch;
        }
        let age = previous.age(now);
        if age <= self.staleness_threshold {
            CacheDecision::Reuse { age }
        } else {
            CacheDecision::RefreshStale
        }
    }
}

impl Default for CacheExpiryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
