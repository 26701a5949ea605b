//! Smooth, monotonic progress reporting for an in-flight analysis.
//!
//! The estimator blends two signals: progress the engine actually reports,
//! and a projection from elapsed time against an inferred total duration.
//! Displayed progress never regresses and never races more than a small
//! cushion ahead of real work. A single ticking loop polls the engine at a
//! cadence driven by an explicit [`PollMode`]; mode transitions poll once
//! immediately before rearming, so there is never a visible gap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::traits::{AnalysisEngine, EngineStatus, ScanObserver};

/// Tunables for estimation and polling cadence.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Heuristic per-dependency duration used before any work signal.
    pub per_dependency_estimate: Duration,

    /// Floor for the heuristic total estimate.
    pub min_total_estimate: Duration,

    /// How far displayed progress may lead work-reported progress, in
    /// percentage points.
    pub lead_cushion: f64,

    /// An update is emitted at least this often even with no change, so the
    /// indicator never appears frozen.
    pub heartbeat: Duration,

    /// With no work advance for this long and the engine idle, polling
    /// slows down.
    pub idle_after: Duration,

    pub active_interval: Duration,
    pub idle_interval: Duration,

    /// Hard ceiling on total polling duration; stops the ticker even if the
    /// underlying analysis never completes.
    pub max_polling: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            per_dependency_estimate: Duration::from_millis(400),
            min_total_estimate: Duration::from_secs(5),
            lead_cushion: 5.0,
            heartbeat: Duration::from_secs(2),
            idle_after: Duration::from_secs(10),
            active_interval: Duration::from_millis(500),
            idle_interval: Duration::from_secs(2),
            max_polling: Duration::from_secs(600),
        }
    }
}

/// Polling cadence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    Active,
    Idle,
}

/// Pure transition function for the polling mode.
pub fn next_mode(since_last_advance: Duration, engine_running: bool, idle_after: Duration) -> PollMode {
    if since_last_advance >= idle_after && !engine_running {
        PollMode::Idle
    } else {
        PollMode::Active
    }
}

/// An update to hand to the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressFrame {
    pub percent: f64,
    pub label: Option<String>,
}

/// Result of one estimator tick.
#[derive(Debug)]
pub struct TickOutcome {
    /// `Some` when an update should be emitted.
    pub frame: Option<ProgressFrame>,

    /// The poll mode flipped on this tick; the caller should poll again
    /// immediately before rearming at the new cadence.
    pub mode_changed: bool,
}

/// Per-scan progress state. Pure with respect to time: every method takes
/// `now` explicitly, so tests never sleep.
#[derive(Debug)]
pub struct ProgressEstimator {
    config: ProgressConfig,
    started: Instant,
    last_advance: Instant,
    last_emit: Instant,
    estimated_total: Duration,
    work_progress: f64,
    displayed: f64,
    current_label: Option<String>,
    mode: PollMode,
    emitted_once: bool,
}

impl ProgressEstimator {
    pub fn new(config: ProgressConfig, dependency_count: usize, now: Instant) -> Self {
        // Before any work signal the expected total duration is a pure
        // heuristic; once work progress exists it is inferred from elapsed
        // time instead (never dividing by a zero work signal).
        let heuristic = config
            .per_dependency_estimate
            .saturating_mul(dependency_count.max(1) as u32)
            .max(config.min_total_estimate);
        Self {
            config,
            started: now,
            last_advance: now,
            last_emit: now,
            estimated_total: heuristic,
            work_progress: 0.0,
            displayed: 0.0,
            current_label: None,
            mode: PollMode::Active,
            emitted_once: false,
        }
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    pub fn displayed(&self) -> f64 {
        self.displayed
    }

    pub fn interval(&self) -> Duration {
        match self.mode {
            PollMode::Active => self.config.active_interval,
            PollMode::Idle => self.config.idle_interval,
        }
    }

    /// Whether the hard polling ceiling has been reached.
    pub fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.config.max_polling
    }

    /// Folds one engine status sample into the estimate.
    pub fn observe(&mut self, status: &EngineStatus, now: Instant) -> TickOutcome {
        let work = status.progress.clamp(0.0, 100.0);
        if work > self.work_progress {
            self.work_progress = work;
            self.last_advance = now;
            // work > 0 here, so the division is well defined.
            let elapsed = now.duration_since(self.started);
            self.estimated_total = elapsed.div_f64(work / 100.0);
        }

        let elapsed = now.duration_since(self.started).as_secs_f64();
        let total = self.estimated_total.as_secs_f64();
        let projected = if total > 0.0 {
            elapsed / total * 100.0
        } else {
            100.0
        };

        let candidate = projected
            .min(self.work_progress + self.config.lead_cushion)
            .min(100.0);
        let advanced = candidate > self.displayed;
        if advanced {
            self.displayed = candidate;
        }

        let label_changed = status.current_item != self.current_label;
        if label_changed {
            self.current_label = status.current_item.clone();
        }

        let heartbeat_due = now.duration_since(self.last_emit) >= self.config.heartbeat;
        let emit = !self.emitted_once || advanced || label_changed || heartbeat_due;
        if emit {
            self.emitted_once = true;
            self.last_emit = now;
        }

        let previous_mode = self.mode;
        self.mode = next_mode(
            now.duration_since(self.last_advance),
            status.is_running,
            self.config.idle_after,
        );
        let mode_changed = self.mode != previous_mode;
        if mode_changed {
            debug!(mode = ?self.mode, "progress poll cadence changed");
        }

        TickOutcome {
            frame: emit.then(|| ProgressFrame {
                percent: self.displayed,
                label: self.current_label.clone(),
            }),
            mode_changed,
        }
    }
}

/// Polls the engine and forwards frames to the observer until told to stop
/// or the hard ceiling is reached.
///
/// One loop, no timer teardown: cadence changes take effect by polling once
/// immediately and then sleeping the new interval.
pub async fn drive_progress(
    engine: Arc<dyn AnalysisEngine>,
    observer: Arc<dyn ScanObserver>,
    config: ProgressConfig,
    dependency_count: usize,
    mut stop: watch::Receiver<bool>,
) {
    let mut estimator = ProgressEstimator::new(config, dependency_count, Instant::now());
    loop {
        let status = engine.status();
        let outcome = estimator.observe(&status, Instant::now());
        if let Some(frame) = outcome.frame {
            observer.on_progress(frame.percent, frame.label.as_deref());
        }

        if estimator.expired(Instant::now()) {
            warn!("progress poller reached its hard ceiling; stopping");
            break;
        }
        if outcome.mode_changed {
            continue;
        }

        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(estimator.interval()) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn status(progress: f64, running: bool) -> EngineStatus {
        EngineStatus {
            is_running: running,
            progress,
            current_item: None,
        }
    }

    fn config() -> ProgressConfig {
        ProgressConfig::default()
    }

    #[test]
    fn test_next_mode_boundaries() {
        let idle_after = Duration::from_secs(10);
        assert_eq!(
            next_mode(Duration::from_secs(9), false, idle_after),
            PollMode::Active
        );
        assert_eq!(
            next_mode(Duration::from_secs(10), false, idle_after),
            PollMode::Idle
        );
        // A running engine never idles the poller.
        assert_eq!(
            next_mode(Duration::from_secs(60), true, idle_after),
            PollMode::Active
        );
    }

    #[test]
    fn test_heuristic_total_before_any_work_signal() {
        let t0 = Instant::now();
        // 5 deps * 400ms = 2s, floored to the 5s minimum.
        let mut est = ProgressEstimator::new(config(), 5, t0);

        let outcome = est.observe(&status(0.0, true), t0 + Duration::from_secs(1));
        // 1s into an estimated 5s total = 20%, capped by work (0) + cushion.
        let frame = outcome.frame.expect("first tick emits");
        assert!((frame.percent - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_total_inferred_from_work_progress() {
        let t0 = Instant::now();
        let mut est = ProgressEstimator::new(config(), 100, t0);

        // 50% of the work done after 10s implies a 20s total.
        est.observe(&status(50.0, true), t0 + Duration::from_secs(10));
        assert_eq!(est.estimated_total, Duration::from_secs(20));

        // 12s elapsed projects 60%, capped to work + cushion = 55.
        est.observe(&status(50.0, true), t0 + Duration::from_secs(12));
        assert!((est.displayed() - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_displayed_progress_is_monotonic_and_bounded() {
        let t0 = Instant::now();
        let mut est = ProgressEstimator::new(config(), 10, t0);

        let samples = [
            (1, 10.0),
            (2, 40.0),
            (3, 20.0), // engine regresses; display must not
            (4, 40.0),
            (5, 500.0), // absurd over-report, must clamp
            (600, 100.0),
        ];
        let mut previous = 0.0;
        for (secs, work) in samples {
            est.observe(&status(work, true), t0 + Duration::from_secs(secs));
            let displayed = est.displayed();
            assert!(displayed >= previous, "regressed: {displayed} < {previous}");
            assert!((0.0..=100.0).contains(&displayed));
            previous = displayed;
        }
    }

    #[test]
    fn test_lead_cushion_caps_projection() {
        let t0 = Instant::now();
        let mut est = ProgressEstimator::new(config(), 1, t0);

        // Way past the heuristic total with zero reported work: display may
        // not race ahead of work + cushion.
        est.observe(&status(0.0, true), t0 + Duration::from_secs(60));
        assert!((est.displayed() - config().lead_cushion).abs() < 1e-9);
    }

    #[test]
    fn test_emits_on_label_change_and_heartbeat() {
        let t0 = Instant::now();
        let mut est = ProgressEstimator::new(config(), 1, t0);
        est.observe(&status(0.0, true), t0); // initial emission

        // Far past the heuristic total the projection pins at the cushion;
        // display stops moving.
        let pinned_at = t0 + Duration::from_secs(30);
        est.observe(&status(0.0, true), pinned_at);
        assert!((est.displayed() - config().lead_cushion).abs() < 1e-9);

        // Nothing changed and the heartbeat is not yet due: silent tick.
        let outcome = est.observe(&status(0.0, true), pinned_at + Duration::from_millis(100));
        assert!(outcome.frame.is_none());

        // Label change emits even without numeric movement.
        let outcome = est.observe(
            &EngineStatus {
                is_running: true,
                progress: 0.0,
                current_item: Some("left-pad".to_string()),
            },
            pinned_at + Duration::from_millis(200),
        );
        let frame = outcome.frame.expect("label change emits");
        assert_eq!(frame.label.as_deref(), Some("left-pad"));

        // Still nothing moving, but the heartbeat interval elapsed.
        let outcome = est.observe(
            &EngineStatus {
                is_running: true,
                progress: 0.0,
                current_item: Some("left-pad".to_string()),
            },
            pinned_at + Duration::from_millis(200) + config().heartbeat,
        );
        assert!(outcome.frame.is_some(), "heartbeat emission expected");
    }

    #[test]
    fn test_idle_transition_reported_once() {
        let t0 = Instant::now();
        let mut est = ProgressEstimator::new(config(), 1, t0);
        est.observe(&status(0.0, true), t0);
        assert_eq!(est.mode(), PollMode::Active);

        // Stalled long enough and the engine is no longer running.
        let outcome = est.observe(&status(0.0, false), t0 + Duration::from_secs(11));
        assert!(outcome.mode_changed);
        assert_eq!(est.mode(), PollMode::Idle);
        assert_eq!(est.interval(), config().idle_interval);

        // Work resumes: back to the active cadence.
        let outcome = est.observe(&status(1.0, true), t0 + Duration::from_secs(12));
        assert!(outcome.mode_changed);
        assert_eq!(est.mode(), PollMode::Active);
    }

    #[test]
    fn test_hard_ceiling() {
        let t0 = Instant::now();
        let est = ProgressEstimator::new(config(), 1, t0);
        assert!(!est.expired(t0 + Duration::from_secs(599)));
        assert!(est.expired(t0 + config().max_polling));
    }

    struct StaticEngine;

    #[async_trait]
    impl AnalysisEngine for StaticEngine {
        async fn analyze(
            &self,
            _dependencies: &[crate::model::Dependency],
            _options: &crate::traits::AnalyzeOptions,
        ) -> Result<crate::model::AnalysisResult, crate::traits::ScanError> {
            unreachable!("not dispatched in ticker tests")
        }

        async fn analyze_incremental(
            &self,
            _changed: &[crate::model::Dependency],
            _options: &crate::traits::AnalyzeOptions,
        ) -> Result<crate::model::AnalysisResult, crate::traits::ScanError> {
            unreachable!("not dispatched in ticker tests")
        }

        fn status(&self) -> EngineStatus {
            status(25.0, true)
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        frames: Mutex<Vec<f64>>,
    }

    impl ScanObserver for CountingObserver {
        fn on_progress(&self, percent: f64, _label: Option<&str>) {
            self.frames.lock().unwrap().push(percent);
        }
        fn on_empty_workspace(&self) {}
        fn on_aborted(&self, _reason: &str) {}
        fn on_complete(&self, _outcome: &crate::model::ScanOutcome) {}
    }

    #[tokio::test]
    async fn test_ticker_stops_on_signal() {
        let observer = Arc::new(CountingObserver::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut cfg = config();
        cfg.active_interval = Duration::from_millis(5);

        let ticker = tokio::spawn(drive_progress(
            Arc::new(StaticEngine),
            observer.clone(),
            cfg,
            3,
            stop_rx,
        ));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).expect("ticker alive");
        ticker.await.expect("ticker joined");

        let frames = observer.frames.lock().unwrap();
        assert!(!frames.is_empty());
        assert!(frames.windows(2).all(|w| w[1] >= w[0]), "non-monotonic frames");
    }

    #[tokio::test]
    async fn test_ticker_stops_at_hard_ceiling() {
        let observer = Arc::new(CountingObserver::default());
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut cfg = config();
        cfg.active_interval = Duration::from_millis(1);
        cfg.max_polling = Duration::from_millis(10);

        let ticker = tokio::spawn(drive_progress(
            Arc::new(StaticEngine),
            observer,
            cfg,
            1,
            stop_rx,
        ));
        // Completes on its own despite nobody sending the stop signal.
        tokio::time::timeout(Duration::from_secs(2), ticker)
            .await
            .expect("ceiling respected")
            .expect("ticker joined");
    }
}
