use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in the project's dependency tree, as reported by the
/// workspace scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,

    /// Resolved version from the lockfile.
    pub version: String,

    /// Declared constraint from the manifest (e.g. `"^2.31"`, `">=3.24"`).
    pub version_constraint: Option<String>,

    #[serde(default)]
    pub is_dev: bool,

    #[serde(default)]
    pub is_transitive: bool,

    /// Workspace-internal packages are excluded from diffing and analysis.
    #[serde(default)]
    pub is_internal: bool,

    /// Manifest directory this dependency was declared in, when the
    /// workspace has more than one package root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_root: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_folder: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Dependency>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            version_constraint: None,
            is_dev: false,
            is_transitive: false,
            is_internal: false,
            package_root: None,
            workspace_folder: None,
            children: Vec::new(),
        }
    }

    /// Identity used for diffing and merging. Keyed by `(name, package_root)`
    /// so same-named packages under different roots stay distinct.
    pub fn key(&self) -> DepKey {
        DepKey {
            name: self.name.clone(),
            package_root: self.package_root.clone(),
        }
    }

    /// Declared directly in a project manifest (not pulled in transitively).
    pub fn is_direct(&self) -> bool {
        !self.is_transitive
    }
}

/// Diff/merge identity of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepKey {
    pub name: String,
    pub package_root: Option<String>,
}

impl fmt::Display for DepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.package_root {
            Some(root) => write!(f, "{} ({})", self.name, root),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Vulnerability severity, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

/// Primary issue category for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    Security,
    Outdated,
    License,
    Unmaintained,
}

/// Primary issue classification attached to an analyzed dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueClassification {
    pub kind: IssueKind,
    pub severity: Severity,
}

/// A known vulnerability affecting a dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String, // CVE-2023-XXXX, GHSA-xxxx, ...
    pub severity: Severity,
    pub description: String,
    pub affected_versions: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityReport {
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

impl SecurityReport {
    pub fn max_severity(&self) -> Option<Severity> {
        self.vulnerabilities.iter().map(|v| v.severity).max()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreshnessReport {
    pub latest_version: Option<String>,
    #[serde(default)]
    pub is_outdated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseReport {
    pub license: Option<String>,
    #[serde(default)]
    pub is_incompatible: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub last_release: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_unmaintained: bool,
}

/// A dependency plus everything the analysis engine found out about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub dependency: Dependency,
    #[serde(default)]
    pub security: SecurityReport,
    #[serde(default)]
    pub freshness: FreshnessReport,
    #[serde(default)]
    pub license: LicenseReport,
    #[serde(default)]
    pub maintenance: MaintenanceReport,
    pub classification: Option<IssueClassification>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DependencyAnalysis>,
}

impl DependencyAnalysis {
    /// An entry with no findings. Mostly useful as a fixture base.
    pub fn clean(dependency: Dependency) -> Self {
        Self {
            dependency,
            security: SecurityReport::default(),
            freshness: FreshnessReport::default(),
            license: LicenseReport::default(),
            maintenance: MaintenanceReport::default(),
            classification: None,
            children: Vec::new(),
        }
    }

    pub fn key(&self) -> DepKey {
        self.dependency.key()
    }
}

/// Health bucket a dependency lands in after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthClass {
    Critical,
    High,
    Warning,
    Healthy,
}

/// Classification precedence: critical security > high security > any other
/// security/outdated/license/unmaintained finding (warning) > healthy.
pub fn classify(analysis: &DependencyAnalysis) -> HealthClass {
    match analysis.security.max_severity() {
        Some(Severity::Critical) => return HealthClass::Critical,
        Some(Severity::High) => return HealthClass::High,
        Some(_) => return HealthClass::Warning,
        None => {}
    }
    if analysis.freshness.is_outdated
        || analysis.license.is_incompatible
        || analysis.maintenance.is_unmaintained
    {
        HealthClass::Warning
    } else {
        HealthClass::Healthy
    }
}

/// Primary issue for display, following the same precedence as [`classify`].
pub fn primary_issue(analysis: &DependencyAnalysis) -> Option<IssueClassification> {
    if let Some(severity) = analysis.security.max_severity() {
        return Some(IssueClassification {
            kind: IssueKind::Security,
            severity,
        });
    }
    if analysis.freshness.is_outdated {
        return Some(IssueClassification {
            kind: IssueKind::Outdated,
            severity: Severity::Moderate,
        });
    }
    if analysis.license.is_incompatible {
        return Some(IssueClassification {
            kind: IssueKind::License,
            severity: Severity::Moderate,
        });
    }
    if analysis.maintenance.is_unmaintained {
        return Some(IssueClassification {
            kind: IssueKind::Unmaintained,
            severity: Severity::Low,
        });
    }
    None
}

/// Counts by health category for one analysis result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub critical: usize,
    pub high: usize,
    pub warning: usize,
    pub healthy: usize,
    pub analyzed: usize,
    pub failed: usize,
}

/// A dependency the engine could not analyze.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPackage {
    pub name: String,
    pub reason: String,
}

/// Summarizes entries by classification. Failed entries are excluded from
/// classification but still counted.
pub fn summarize(entries: &[DependencyAnalysis], failed: &[FailedPackage]) -> ResultSummary {
    let mut summary = ResultSummary {
        failed: failed.len(),
        ..ResultSummary::default()
    };
    for entry in entries {
        if failed.iter().any(|f| f.name == entry.dependency.name) {
            continue;
        }
        summary.analyzed += 1;
        match classify(entry) {
            HealthClass::Critical => summary.critical += 1,
            HealthClass::High => summary.high += 1,
            HealthClass::Warning => summary.warning += 1,
            HealthClass::Healthy => summary.healthy += 1,
        }
    }
    summary
}

/// Aggregate score over the classified entries, 0–100. An empty (or fully
/// failed) result scores 100: nothing analyzable means nothing unhealthy.
///
/// A pure function of the summary, so a merged result and a full rescan of
/// the same tree can never disagree.
pub fn aggregate_health_score(summary: &ResultSummary) -> f64 {
    let classified = summary.critical + summary.high + summary.warning + summary.healthy;
    if classified == 0 {
        return 100.0;
    }
    // critical entries contribute zero weight
    let weighted =
        summary.healthy as f64 + summary.warning as f64 * 0.7 + summary.high as f64 * 0.3;
    (weighted / classified as f64 * 100.0).round()
}

/// Cache hit/request counters reported by the analysis engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub cache_hits: u64,
    pub requests: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.requests as f64
        }
    }
}

/// Connectivity snapshot taken during a scan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub online: bool,
    pub checked_at: DateTime<Utc>,
}

/// Performance figures for one scan run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub duration_ms: u64,
    pub resident_memory_start_bytes: Option<u64>,
    pub resident_memory_end_bytes: Option<u64>,
    pub dependency_count: usize,
    pub failed_count: usize,
}

/// The single persisted "current state" artifact. At most one exists per
/// project, superseded wholesale on each successful scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub timestamp: DateTime<Utc>,
    pub dependencies: Vec<DependencyAnalysis>,
    pub health_score: f64,
    pub summary: ResultSummary,
    #[serde(default)]
    pub failed_packages: Vec<FailedPackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScanMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_stats: Option<CacheStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_status: Option<NetworkStatus>,
}

impl AnalysisResult {
    /// Builds a result from analyzed entries, computing classifications,
    /// summary and aggregate score.
    pub fn new(
        timestamp: DateTime<Utc>,
        dependencies: Vec<DependencyAnalysis>,
        failed_packages: Vec<FailedPackage>,
    ) -> Self {
        let mut result = Self {
            timestamp,
            dependencies,
            health_score: 0.0,
            summary: ResultSummary::default(),
            failed_packages,
            metrics: None,
            cache_stats: None,
            network_status: None,
        };
        result.recompute();
        result
    }

    /// Refreshes per-entry classification, the summary and the aggregate
    /// score from the current entry set. Both full scans and merges go
    /// through here, so the two can never drift apart.
    pub fn recompute(&mut self) {
        for entry in &mut self.dependencies {
            entry.classification = primary_issue(entry);
        }
        self.summary = summarize(&self.dependencies, &self.failed_packages);
        self.health_score = aggregate_health_score(&self.summary);
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }
}

/// Output of change detection.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Dependencies that are new or whose version differs from the stored
    /// result.
    pub changed: Vec<Dependency>,

    /// Identities present previously but absent now.
    pub removed: Vec<DepKey>,

    /// True when no previous result exists.
    pub is_full_scan: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Outcome of the offline preflight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCoverageVerdict {
    /// Online (or bypassing); dispatch against live data sources.
    ProceedLive,

    /// Offline, but every direct dependency is fully covered by cache.
    ProceedFullCache,

    /// Offline with no cache accessor configured.
    AbortNoCache,

    /// Offline and at least one direct dependency has a cache gap.
    AbortPartialCache { missing: Vec<DepKey> },
}

impl CacheCoverageVerdict {
    pub fn should_proceed(&self) -> bool {
        matches!(self, Self::ProceedLive | Self::ProceedFullCache)
    }
}

/// Terminal event payload for one scan, handed to observers.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub result: AnalysisResult,
    pub cached: bool,
    pub cache_age_minutes: i64,
    pub metrics: ScanMetrics,
}
