//! Collaborator seams consumed by the scan coordinator.
//!
//! The orchestration core never talks to the network, the filesystem or the
//! UI directly. Everything it needs arrives through the traits below:
//! - [`WorkspaceScanner`] produces the raw dependency tree
//! - [`AnalysisEngine`] performs the actual per-package analysis
//! - [`CacheAccessor`] exposes per-dependency cached payloads
//! - [`ConnectivityProbe`] answers "are we online" and tracks channel health
//! - [`SnapshotStore`] persists the single current [`AnalysisResult`]
//! - [`ScanObserver`] receives progress and terminal events

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AnalysisResult, Dependency, ScanOutcome};

// ============================================================================
// Error Taxonomy
// ============================================================================

/// Failure modes of a scan run.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Network unreachable when live data was required.
    #[error("Network unreachable: {0}")]
    Connectivity(String),

    /// A vulnerability source rejected credentials. Never retried
    /// automatically; requires explicit reconfiguration.
    #[error("Vulnerability source rejected credentials: {0}")]
    Auth(String),

    /// No cache accessor is configured.
    #[error("No analysis cache is configured")]
    CacheUnavailable,

    /// The stored result failed structural validation on load.
    #[error("Stored snapshot failed validation: {0}")]
    SnapshotCorrupt(String),

    /// The underlying analysis engine failed.
    #[error("Analysis failed: {0}")]
    AnalysisFailure(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Consumed Collaborators
// ============================================================================

/// Produces the raw dependency tree for the workspace.
///
/// Lockfile and manifest parsing live behind this seam; the coordinator only
/// sees the resulting [`Dependency`] list.
#[async_trait]
pub trait WorkspaceScanner: Send + Sync {
    /// Scans the workspace and returns every discovered dependency.
    ///
    /// An empty list is a valid answer (a workspace with no dependencies),
    /// not an error.
    async fn scan(&self) -> Result<Vec<Dependency>, ScanError>;
}

/// Options passed through to the analysis engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyzeOptions {
    /// Skip every cache layer and fetch live data.
    pub bypass_cache: bool,

    /// Analyze transitive dependencies too, not just direct ones.
    pub include_transitive: bool,
}

/// Live status of the analysis engine, polled by the progress estimator.
#[derive(Debug, Clone, Default)]
pub struct EngineStatus {
    pub is_running: bool,

    /// Work-reported progress, 0–100.
    pub progress: f64,

    /// Label of the item currently being analyzed.
    pub current_item: Option<String>,
}

/// The external analysis engine.
///
/// Performs the expensive per-package work (registry lookups, vulnerability
/// queries, scoring). The coordinator dispatches to it and polls
/// [`status`](AnalysisEngine::status) while waiting.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Analyzes the full dependency set.
    async fn analyze(
        &self,
        dependencies: &[Dependency],
        options: &AnalyzeOptions,
    ) -> Result<AnalysisResult, ScanError>;

    /// Analyzes only the given changed dependencies. The returned result
    /// covers exactly those packages; the caller merges it into the
    /// previous full result.
    async fn analyze_incremental(
        &self,
        changed: &[Dependency],
        options: &AnalyzeOptions,
    ) -> Result<AnalysisResult, ScanError>;

    /// Cheap, synchronous status snapshot. Polled frequently.
    fn status(&self) -> EngineStatus;
}

/// Per-dependency lookups into the persisted data cache.
///
/// `None` means "no cached payload"; the distinction between a cache miss
/// and an absent cache layer is carried by `Option<&dyn CacheAccessor>` at
/// the call site.
#[async_trait]
pub trait CacheAccessor: Send + Sync {
    /// Cached registry metadata for one dependency, if present.
    async fn registry_metadata(&self, dependency: &Dependency) -> Option<serde_json::Value>;

    /// Cached data from the currently configured vulnerability source for
    /// one dependency, if present.
    async fn vulnerability_data(&self, dependency: &Dependency) -> Option<serde_json::Value>;
}

/// Data channels whose health the probe tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataChannel {
    Registry,
    Vulnerabilities,
}

impl std::fmt::Display for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry => write!(f, "registry"),
            Self::Vulnerabilities => write!(f, "vulnerabilities"),
        }
    }
}

/// Connectivity checks and per-channel health bookkeeping.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Clears any cached probe state before a fresh check.
    fn reset(&self);

    /// Probes whether the network is reachable.
    async fn check_connectivity(&self) -> bool;

    fn mark_healthy(&self, channel: DataChannel);

    fn mark_degraded(&self, channel: DataChannel, message: &str);
}

/// Durable store for the single per-project [`AnalysisResult`].
///
/// Implementations serialize all date-valued fields as portable timestamp
/// strings and must fall back to "no previous result" when the stored
/// snapshot fails structural validation. A corrupt snapshot must never fail
/// a scan.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<AnalysisResult>, ScanError>;

    async fn store(&self, result: &AnalysisResult) -> Result<(), ScanError>;
}

// ============================================================================
// Exposed Observer
// ============================================================================

/// UI-facing event sink.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// progress ticker's hot loop.
pub trait ScanObserver: Send + Sync {
    /// Displayed progress changed, the current-item label changed, or the
    /// heartbeat interval elapsed. `percent` is monotonic within one scan.
    fn on_progress(&self, percent: f64, label: Option<&str>);

    /// The workspace contains no dependencies; no scan was dispatched.
    fn on_empty_workspace(&self);

    /// The scan did not run to completion. Always emitted before any error
    /// surfaces, so no stale "in progress" indicator is left behind.
    fn on_aborted(&self, reason: &str);

    /// Terminal event: the scan finished and its result was reconciled.
    fn on_complete(&self, outcome: &ScanOutcome);
}
