//! Top-level scan orchestration.
//!
//! Every trigger funnels into [`ScanCoordinator::run`], which:
//! 1. Takes the single-flight lock (or returns immediately if held)
//! 2. Scans the workspace for the raw dependency tree
//! 3. Loads the previous snapshot and diffs against it
//! 4. Runs the offline preflight and honors a clean abort
//! 5. Picks a strategy: cache reuse, incremental, or full analysis
//! 6. Executes under the progress ticker, merges incremental results
//! 7. Reconciles cached/age flags, persists, notifies observers
//!
//! The lock is released on every exit path via the guard's `Drop`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::model::{
    AnalysisResult, CacheCoverageVerdict, NetworkStatus, ScanMetrics, ScanOutcome,
};
use crate::scan::change_detector::detect_changes;
use crate::scan::expiry::{CacheDecision, CacheExpiryPolicy};
use crate::scan::lock::ScanLock;
use crate::scan::merge::merge_results;
use crate::scan::offline::OfflinePreflight;
use crate::scan::progress::{drive_progress, ProgressConfig};
use crate::traits::{
    AnalysisEngine, AnalyzeOptions, CacheAccessor, ConnectivityProbe, ScanError, ScanObserver,
    SnapshotStore, WorkspaceScanner,
};

// ============================================================================
// Configuration
// ============================================================================

/// Coordinator tunables.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum snapshot age before a no-change scan refetches anyway.
    pub staleness_threshold: chrono::Duration,

    /// Cache-hit ratio above which a freshly dispatched result is reported
    /// as cached (age 0) to observers.
    pub cache_hit_ratio_threshold: f64,

    pub progress: ProgressConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: chrono::Duration::hours(
                CacheExpiryPolicy::DEFAULT_STALENESS_HOURS,
            ),
            cache_hit_ratio_threshold: 0.8,
            progress: ProgressConfig::default(),
        }
    }
}

impl ScanConfig {
    pub fn with_staleness_threshold(mut self, threshold: chrono::Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    pub fn with_cache_hit_ratio_threshold(mut self, threshold: f64) -> Self {
        self.cache_hit_ratio_threshold = threshold;
        self
    }

    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// Where a scan request came from. Logged so ignored triggers are
/// attributable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Command,
    FileChange,
    ConfigChange,
    Startup,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::FileChange => write!(f, "file-change"),
            Self::ConfigChange => write!(f, "config-change"),
            Self::Startup => write!(f, "startup"),
        }
    }
}

/// One scan request.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest {
    pub trigger: TriggerKind,

    /// Skip every cache layer; requires connectivity.
    pub bypass_cache: bool,

    pub include_transitive: bool,
}

impl ScanRequest {
    pub fn new(trigger: TriggerKind) -> Self {
        Self {
            trigger,
            bypass_cache: false,
            include_transitive: true,
        }
    }

    pub fn with_bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}

/// How a [`ScanCoordinator::run`] call ended.
#[derive(Debug)]
pub enum ScanRunOutcome {
    /// A result was produced (fresh, merged, or reused) and observers were
    /// notified.
    Completed(ScanOutcome),

    /// Another scan holds the lock; nothing was touched.
    AlreadyRunning,

    /// The workspace has no dependencies; nothing was dispatched.
    EmptyWorkspace,

    /// The offline preflight said stop. Observers were already notified.
    Aborted(CacheCoverageVerdict),
}

// ============================================================================
// Coordinator
// ============================================================================

/// Orchestrates scans over the external collaborators. See the module docs
/// for the sequence.
pub struct ScanCoordinator {
    scanner: Arc<dyn WorkspaceScanner>,
    engine: Arc<dyn AnalysisEngine>,
    cache: Option<Arc<dyn CacheAccessor>>,
    probe: Arc<dyn ConnectivityProbe>,
    store: Arc<dyn SnapshotStore>,
    observer: Arc<dyn ScanObserver>,
    config: ScanConfig,
    expiry: CacheExpiryPolicy,
    lock: ScanLock,
}

impl ScanCoordinator {
    pub fn new(
        scanner: Arc<dyn WorkspaceScanner>,
        engine: Arc<dyn AnalysisEngine>,
        probe: Arc<dyn ConnectivityProbe>,
        store: Arc<dyn SnapshotStore>,
        observer: Arc<dyn ScanObserver>,
    ) -> Self {
        let config = ScanConfig::default();
        let expiry =
            CacheExpiryPolicy::new().with_staleness_threshold(config.staleness_threshold);
        Self {
            scanner,
            engine,
            cache: None,
            probe,
            store,
            observer,
            config,
            expiry,
            lock: ScanLock::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheAccessor>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.expiry =
            CacheExpiryPolicy::new().with_staleness_threshold(config.staleness_threshold);
        self.config = config;
        self
    }

    /// The single-flight lock, exposed so callers can await idleness.
    pub fn lock(&self) -> &ScanLock {
        &self.lock
    }

    /// Runs one scan for the given trigger. A trigger arriving while a scan
    /// is in flight is observed, logged, and performs no work.
    #[instrument(skip_all, fields(trigger = %request.trigger, bypass = request.bypass_cache))]
    pub async fn run(&self, request: ScanRequest) -> Result<ScanRunOutcome, ScanError> {
        let Some(_guard) = self.lock.try_acquire() else {
            info!("scan already in flight; trigger observed and ignored");
            return Ok(ScanRunOutcome::AlreadyRunning);
        };

        let outcome = self.run_locked(&request).await;
        if let Err(err) = &outcome {
            // Clear the in-progress indicator before any message is shown.
            self.observer.on_aborted(&format!("Scan failed: {err}"));
        }
        outcome
        // _guard drops here: the lock is released on every exit path.
    }

    async fn run_locked(&self, request: &ScanRequest) -> Result<ScanRunOutcome, ScanError> {
        let scan_started = Instant::now();
        let memory_start = resident_memory_bytes();

        // A forced refresh is pointless without connectivity.
        if request.bypass_cache {
            self.probe.reset();
            if !self.probe.check_connectivity().await {
                return Err(ScanError::Connectivity(
                    "refresh requires connectivity; enable cached results or retry once online"
                        .to_string(),
                ));
            }
        }

        let dependencies = self.scanner.scan().await?;
        if dependencies.is_empty() {
            info!("workspace contains no dependencies");
            self.observer.on_empty_workspace();
            return Ok(ScanRunOutcome::EmptyWorkspace);
        }

        let previous = match self.store.load().await {
            Ok(previous) => previous,
            Err(ScanError::SnapshotCorrupt(reason)) => {
                warn!(%reason, "stored snapshot rejected; treating project as unscanned");
                None
            }
            Err(err) => return Err(err),
        };

        let changes = detect_changes(&dependencies, previous.as_ref());
        info!(
            changed = changes.changed.len(),
            removed = changes.removed.len(),
            full_scan = changes.is_full_scan,
            "change detection complete"
        );

        let preflight = OfflinePreflight {
            probe: self.probe.as_ref(),
            cache: self.cache.as_deref(),
            observer: self.observer.as_ref(),
        };
        let verdict = preflight
            .check(request.bypass_cache, previous.as_ref(), &changes, &dependencies)
            .await;
        if !verdict.should_proceed() {
            return Ok(ScanRunOutcome::Aborted(verdict));
        }

        let external_count = dependencies.iter().filter(|d| !d.is_internal).count();
        let options = AnalyzeOptions {
            bypass_cache: request.bypass_cache,
            include_transitive: request.include_transitive,
        };

        // Incremental only for a strict nonempty subset, never when
        // bypassing cache, never for a first scan.
        let incremental_eligible = !request.bypass_cache
            && !changes.is_full_scan
            && !changes.changed.is_empty()
            && changes.changed.len() < external_count;

        let decision = if incremental_eligible {
            CacheDecision::Dispatch
        } else {
            self.expiry
                .evaluate(previous.as_ref(), &changes, external_count, Utc::now())
        };

        if let CacheDecision::Reuse { age } = &decision {
            if let Some(prev) = previous.clone() {
                info!(
                    age_minutes = age.num_minutes(),
                    "previous result still fresh; reusing without dispatch"
                );
                let metrics = self.capture_metrics(scan_started, memory_start, &prev);
                let mut result = prev;
                result.metrics = Some(metrics.clone());
                let outcome = ScanOutcome {
                    result,
                    cached: true,
                    cache_age_minutes: age.num_minutes(),
                    metrics,
                };
                self.observer.on_complete(&outcome);
                return Ok(ScanRunOutcome::Completed(outcome));
            }
        }

        let (mut result, ttl_refresh) = if incremental_eligible {
            let Some(prev) = previous.as_ref() else {
                return Err(ScanError::AnalysisFailure(
                    "incremental strategy chosen without a previous result".to_string(),
                ));
            };
            info!(
                changed = changes.changed.len(),
                total = external_count,
                "dispatching incremental analysis"
            );
            let fresh = self
                .with_progress(
                    external_count,
                    self.engine.analyze_incremental(&changes.changed, &options),
                )
                .await?;
            (merge_results(prev, &fresh, &changes), false)
        } else {
            let ttl_refresh = decision == CacheDecision::RefreshStale;
            match &decision {
                CacheDecision::RefreshStale => {
                    info!("previous result stale; forcing full fresh analysis")
                }
                CacheDecision::RefreshCountMismatch => warn!(
                    "dependency counts disagree with stored result; forcing full fresh analysis"
                ),
                _ => info!(full_scan = changes.is_full_scan, "dispatching full analysis"),
            }
            let fresh = self
                .with_progress(external_count, self.engine.analyze(&dependencies, &options))
                .await?;
            (fresh, ttl_refresh)
        };

        if result.network_status.is_none() {
            result.network_status = Some(NetworkStatus {
                online: verdict == CacheCoverageVerdict::ProceedLive,
                checked_at: Utc::now(),
            });
        }

        let metrics = self.capture_metrics(scan_started, memory_start, &result);
        result.metrics = Some(metrics.clone());

        self.store.store(&result).await?;

        let (cached, cache_age_minutes) =
            self.derive_cache_flags(request.bypass_cache, ttl_refresh, &result);
        let outcome = ScanOutcome {
            result,
            cached,
            cache_age_minutes,
            metrics,
        };
        info!(
            cached,
            cache_age_minutes,
            duration_ms = outcome.metrics.duration_ms,
            dependencies = outcome.metrics.dependency_count,
            "scan complete"
        );
        self.observer.on_complete(&outcome);
        Ok(ScanRunOutcome::Completed(outcome))
    }

    /// Runs `work` with the progress ticker polling the engine alongside it.
    async fn with_progress<T>(
        &self,
        dependency_count: usize,
        work: impl std::future::Future<Output = Result<T, ScanError>>,
    ) -> Result<T, ScanError> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let ticker = tokio::spawn(drive_progress(
            Arc::clone(&self.engine),
            Arc::clone(&self.observer),
            self.config.progress.clone(),
            dependency_count,
            stop_rx,
        ));
        let outcome = work.await;
        let _ = stop_tx.send(true);
        let _ = ticker.await;
        outcome
    }

    /// Final cached/age reconciliation for freshly dispatched results:
    /// explicit bypass and TTL refetches are live; a high cache-hit ratio on
    /// the requested subset reports as cached with age 0.
    fn derive_cache_flags(
        &self,
        bypass_cache: bool,
        ttl_refresh: bool,
        result: &AnalysisResult,
    ) -> (bool, i64) {
        if bypass_cache || ttl_refresh {
            return (false, 0);
        }
        if let Some(stats) = result.cache_stats {
            if stats.requests > 0 && stats.hit_ratio() >= self.config.cache_hit_ratio_threshold {
                return (true, 0);
            }
        }
        (false, 0)
    }

    fn capture_metrics(
        &self,
        started: Instant,
        memory_start: Option<u64>,
        result: &AnalysisResult,
    ) -> ScanMetrics {
        ScanMetrics {
            duration_ms: started.elapsed().as_millis() as u64,
            resident_memory_start_bytes: memory_start,
            resident_memory_end_bytes: resident_memory_bytes(),
            dependency_count: result.dependency_count(),
            failed_count: result.failed_packages.len(),
        }
    }
}

/// Best-effort resident-set size. `/proc` probe on Linux, `None` elsewhere.
fn resident_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        // Page size is 4 KiB on every platform we probe this way.
        Some(resident_pages * 4096)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}
