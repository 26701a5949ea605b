//! Scan orchestration - deciding, for every trigger, between full analysis,
//! incremental analysis, and cache reuse.
//!
//! This module provides the core abstractions for the scan system:
//! - **Coordinator**: single-flight orchestration via [`ScanCoordinator`]
//! - **Change detection**: pure diffing via [`change_detector::detect_changes`]
//! - **Cache policy**: staleness decisions via [`CacheExpiryPolicy`]
//! - **Offline preflight**: cache-coverage gating via [`OfflinePreflight`]
//! - **Progress**: smooth monotonic estimation via [`ProgressEstimator`]
//! - **Merging**: incremental fold-back via [`merge::merge_results`]

pub mod change_detector;
pub mod coordinator;
pub mod expiry;
pub mod lock;
pub mod merge;
pub mod offline;
pub mod progress;

// Re-export commonly used types
pub use change_detector::detect_changes;
pub use coordinator::{ScanConfig, ScanCoordinator, ScanRequest, ScanRunOutcome, TriggerKind};
pub use expiry::{CacheDecision, CacheExpiryPolicy};
pub use lock::{ScanGuard, ScanLock};
pub use merge::merge_results;
pub use offline::OfflinePreflight;
pub use progress::{drive_progress, PollMode, ProgressConfig, ProgressEstimator, ProgressFrame};
