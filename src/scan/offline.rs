use tracing::{debug, info, warn};

use crate::model::{AnalysisResult, CacheCoverageVerdict, ChangeSet, DepKey, Dependency};
use crate::traits::{CacheAccessor, ConnectivityProbe, DataChannel, ScanObserver};

/// How many missing dependencies an abort message names before truncating.
const MISSING_PREVIEW_LIMIT: usize = 5;

/// Decides, when connectivity is absent, whether enough cached data exists
/// to proceed.
///
/// All abort paths mark the degraded data channels and notify the observer,
/// so no stale "in progress" indicator is left behind.
pub struct OfflinePreflight<'a> {
    pub probe: &'a dyn ConnectivityProbe,
    pub cache: Option<&'a dyn CacheAccessor>,
    pub observer: &'a dyn ScanObserver,
}

impl OfflinePreflight<'_> {
    pub async fn check(
        &self,
        bypass_cache: bool,
        previous: Option<&AnalysisResult>,
        changes: &ChangeSet,
        current: &[Dependency],
    ) -> CacheCoverageVerdict {
        if bypass_cache {
            // The caller already decided it needs live data.
            return CacheCoverageVerdict::ProceedLive;
        }

        self.probe.reset();
        if self.probe.check_connectivity().await {
            self.probe.mark_healthy(DataChannel::Registry);
            self.probe.mark_healthy(DataChannel::Vulnerabilities);
            return CacheCoverageVerdict::ProceedLive;
        }

        let Some(cache) = self.cache else {
            let reason = "offline and no analysis cache is available";
            self.probe.mark_degraded(DataChannel::Registry, reason);
            self.probe.mark_degraded(DataChannel::Vulnerabilities, reason);
            warn!("offline with no cache accessor; aborting scan");
            self.observer.on_aborted(
                "Offline and no cached data is available. Enable caching or retry once online.",
            );
            return CacheCoverageVerdict::AbortNoCache;
        };

        let external_count = current.iter().filter(|d| !d.is_internal).count();
        let previous_trusted = previous
            .map(|p| changes.is_empty() && p.dependency_count() == external_count)
            .unwrap_or(false);
        if previous_trusted {
            debug!("previous result trusted as-is; verifying per-dependency coverage");
        }

        let mut missing: Vec<DepKey> = Vec::new();
        for dep in current.iter().filter(|d| d.is_direct() && !d.is_internal) {
            let has_metadata = cache.registry_metadata(dep).await.is_some();
            let has_vulnerabilities = cache.vulnerability_data(dep).await.is_some();
            if !has_metadata || !has_vulnerabilities {
                missing.push(dep.key());
            }
        }

        if missing.is_empty() {
            info!(
                previous_trusted,
                direct_count = current.iter().filter(|d| d.is_direct()).count(),
                "offline: full cache coverage, proceeding from cache"
            );
            return CacheCoverageVerdict::ProceedFullCache;
        }

        let preview: Vec<String> = missing
            .iter()
            .take(MISSING_PREVIEW_LIMIT)
            .map(|key| key.to_string())
            .collect();
        let suffix = if missing.len() > MISSING_PREVIEW_LIMIT {
            ", ..."
        } else {
            ""
        };
        let reason = format!(
            "offline with incomplete cache coverage for {} dependencies",
            missing.len()
        );
        self.probe.mark_degraded(DataChannel::Registry, &reason);
        self.probe
            .mark_degraded(DataChannel::Vulnerabilities, &reason);
        warn!(missing = missing.len(), "offline with cache gaps; aborting scan");
        self.observer.on_aborted(&format!(
            "Offline: cached data is missing for {} dependencies ({}{}). Reconnect to refresh.",
            missing.len(),
            preview.join(", "),
            suffix
        ));
        CacheCoverageVerdict::AbortPartialCache { missing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct StubProbe {
        online: bool,
        degraded: Mutex<Vec<(DataChannel, String)>>,
        healthy: Mutex<Vec<DataChannel>>,
    }

    impl StubProbe {
        fn new(online: bool) -> Self {
            Self {
                online,
                degraded: Mutex::new(Vec::new()),
                healthy: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ConnectivityProbe for StubProbe {
        fn reset(&self) {}

        async fn check_connectivity(&self) -> bool {
            self.online
        }

        fn mark_healthy(&self, channel: DataChannel) {
            self.healthy.lock().unwrap().push(channel);
        }

        fn mark_degraded(&self, channel: DataChannel, message: &str) {
            self.degraded
                .lock()
                .unwrap()
                .push((channel, message.to_string()));
        }
    }

    /// Cache that has both payloads for every name except the listed gaps.
    struct StubCache {
        metadata_gaps: HashSet<String>,
        vulnerability_gaps: HashSet<String>,
    }

    impl StubCache {
        fn complete() -> Self {
            Self {
                metadata_gaps: HashSet::new(),
                vulnerability_gaps: HashSet::new(),
            }
        }
    }

    #[async_trait]
    impl CacheAccessor for StubCache {
        async fn registry_metadata(&self, dependency: &Dependency) -> Option<serde_json::Value> {
            (!self.metadata_gaps.contains(&dependency.name))
                .then(|| serde_json::json!({"name": dependency.name}))
        }

        async fn vulnerability_data(&self, dependency: &Dependency) -> Option<serde_json::Value> {
            (!self.vulnerability_gaps.contains(&dependency.name))
                .then(|| serde_json::json!([]))
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        aborts: Mutex<Vec<String>>,
    }

    impl ScanObserver for RecordingObserver {
        fn on_progress(&self, _percent: f64, _label: Option<&str>) {}
        fn on_empty_workspace(&self) {}
        fn on_aborted(&self, reason: &str) {
            self.aborts.lock().unwrap().push(reason.to_string());
        }
        fn on_complete(&self, _outcome: &crate::model::ScanOutcome) {}
    }

    fn deps(names: &[&str]) -> Vec<Dependency> {
        names.iter().map(|n| Dependency::new(*n, "1.0.0")).collect()
    }

    #[tokio::test]
    async fn test_bypass_skips_all_checks() {
        let probe = StubProbe::new(false);
        let observer = RecordingObserver::default();
        let preflight = OfflinePreflight {
            probe: &probe,
            cache: None,
            observer: &observer,
        };

        let verdict = preflight
            .check(true, None, &ChangeSet::default(), &deps(&["a"]))
            .await;
        assert_eq!(verdict, CacheCoverageVerdict::ProceedLive);
        assert!(observer.aborts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_online_marks_channels_healthy() {
        let probe = StubProbe::new(true);
        let observer = RecordingObserver::default();
        let preflight = OfflinePreflight {
            probe: &probe,
            cache: None,
            observer: &observer,
        };

        let verdict = preflight
            .check(false, None, &ChangeSet::default(), &deps(&["a"]))
            .await;
        assert_eq!(verdict, CacheCoverageVerdict::ProceedLive);
        assert_eq!(probe.healthy.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_offline_without_cache_aborts() {
        let probe = StubProbe::new(false);
        let observer = RecordingObserver::default();
        let preflight = OfflinePreflight {
            probe: &probe,
            cache: None,
            observer: &observer,
        };

        let verdict = preflight
            .check(false, None, &ChangeSet::default(), &deps(&["a"]))
            .await;
        assert_eq!(verdict, CacheCoverageVerdict::AbortNoCache);
        assert_eq!(probe.degraded.lock().unwrap().len(), 2);
        assert_eq!(observer.aborts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_with_full_coverage_proceeds() {
        let probe = StubProbe::new(false);
        let cache = StubCache::complete();
        let observer = RecordingObserver::default();
        let preflight = OfflinePreflight {
            probe: &probe,
            cache: Some(&cache),
            observer: &observer,
        };

        let verdict = preflight
            .check(false, None, &ChangeSet::default(), &deps(&["a", "b"]))
            .await;
        assert_eq!(verdict, CacheCoverageVerdict::ProceedFullCache);
        // No abort message shown.
        assert!(observer.aborts.lock().unwrap().is_empty());
        assert!(probe.degraded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_with_one_gap_aborts_with_that_identifier() {
        let probe = StubProbe::new(false);
        let mut cache = StubCache::complete();
        cache.vulnerability_gaps.insert("b".to_string());
        let observer = RecordingObserver::default();
        let preflight = OfflinePreflight {
            probe: &probe,
            cache: Some(&cache),
            observer: &observer,
        };

        let verdict = preflight
            .check(false, None, &ChangeSet::default(), &deps(&["a", "b"]))
            .await;
        match verdict {
            CacheCoverageVerdict::AbortPartialCache { missing } => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].name, "b");
            }
            other => panic!("expected AbortPartialCache, got {other:?}"),
        }
        let aborts = observer.aborts.lock().unwrap();
        assert_eq!(aborts.len(), 1);
        assert!(aborts[0].contains('b'));
    }

    #[tokio::test]
    async fn test_transitive_dependencies_not_coverage_checked() {
        let probe = StubProbe::new(false);
        let mut cache = StubCache::complete();
        cache.metadata_gaps.insert("deep".to_string());
        let observer = RecordingObserver::default();
        let preflight = OfflinePreflight {
            probe: &probe,
            cache: Some(&cache),
            observer: &observer,
        };

        let mut transitive = Dependency::new("deep", "1.0.0");
        transitive.is_transitive = true;
        let current = vec![Dependency::new("a", "1.0.0"), transitive];

        let verdict = preflight
            .check(false, None, &ChangeSet::default(), &current)
            .await;
        assert_eq!(verdict, CacheCoverageVerdict::ProceedFullCache);
    }
}
