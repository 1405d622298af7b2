// src/pipeline.rs
// The orchestrator. Owns every stage, runs one frame through the
// gate/extract/smooth/validate sequence, and supervises its own
// reliability. All state is instance state; two pipelines can coexist.

use crate::cache::{CacheStats, RecognitionCache};
use crate::change::{ChangeDetector, ChangeStats};
use crate::config::PipelineConfig;
use crate::consensus::{fuse_sources, ConsensusTracker, SourceReading};
use crate::ensemble::{EnsembleRecognizer, RecognitionStrategy};
use crate::health::{
    composite_score, AutoRecalibrator, DegradationAlert, ErrorPatternDetector, HealthMonitor,
    QualityMetrics, Trend,
};
use crate::persist::SnapshotStore;
use crate::recovery::{FallbackChain, RecoveryAction, RecoveryManager};
use crate::resource::{MemoryReport, ResourceMonitor};
use crate::roi::{RoiName, RoiRegistry};
use crate::types::{
    ErrorKind, ExtractionKind, FieldId, FieldValue, Frame, PartialState, RecognitionResult,
};
use crate::validate::{layout_consistent, Correction, StateValidator};
use crate::watchdog;
use anyhow::Result;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// A pot collapsing below this fraction of its previous value, with an
/// empty board, marks a hand boundary.
const HAND_RESET_RATIO: f64 = 0.5;

/// Outcome of one extraction task.
struct Extraction {
    field: FieldId,
    roi: RoiName,
    result: Result<(RecognitionResult, bool)>,
}

/// Aggregate snapshot of the pipeline's own condition.
#[derive(Debug)]
pub struct HealthReport {
    pub score: f64,
    pub degraded_fields: Vec<DegradationAlert>,
    pub error_patterns: Vec<(ErrorKind, usize, String)>,
    pub cache: CacheStats,
    pub change: ChangeStats,
    pub mean_confidence: Option<f32>,
    pub confidence_trend: Trend,
    pub memory: Option<MemoryReport>,
    pub recovery_actions: u64,
    pub recalibrations: u64,
    pub current_interval: Duration,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    registry: RoiRegistry,
    detector: ChangeDetector,
    cache: Arc<Mutex<RecognitionCache>>,
    recognizer: Arc<EnsembleRecognizer>,
    consensus: ConsensusTracker,
    validator: StateValidator,
    recovery: RecoveryManager,
    health: HealthMonitor,
    errors: ErrorPatternDetector,
    quality: QualityMetrics,
    recalibrator: AutoRecalibrator,
    resources: ResourceMonitor,
    store: Option<Arc<SnapshotStore>>,
    semaphore: Arc<Semaphore>,
    required: Vec<FieldId>,
    interval: Duration,
    last_state: Arc<Mutex<Option<PartialState>>>,
    state_fallbacks: FallbackChain<PartialState>,
    layout_drift: Vec<RoiName>,
    corrections: Vec<Correction>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        registry: RoiRegistry,
        strategies: Vec<Arc<dyn RecognitionStrategy>>,
        store: Option<SnapshotStore>,
    ) -> Self {
        let store = store.map(Arc::new);
        // A snapshot fresh enough to survive the staleness check seeds
        // the restored context; anything else is a cold start.
        let last_state = Arc::new(Mutex::new(
            store.as_ref().and_then(|s| s.load().unwrap_or_default()),
        ));

        // Known-good sources served when a whole extraction fails, most
        // trusted first: what this session last held, then the on-disk
        // snapshot.
        let mut state_fallbacks = FallbackChain::new().with_method("memory", {
            let last_state = Arc::clone(&last_state);
            move || last_state.lock().expect("state lock").clone()
        });
        if let Some(store) = &store {
            let store = Arc::clone(store);
            state_fallbacks =
                state_fallbacks.with_method("snapshot", move || store.load().ok().flatten());
        }

        let mut pipeline = Self {
            detector: ChangeDetector::new(cfg.change.clone()),
            cache: Arc::new(Mutex::new(RecognitionCache::new(cfg.cache.clone()))),
            recognizer: Arc::new(EnsembleRecognizer::new(cfg.ensemble.clone(), strategies)),
            consensus: ConsensusTracker::new(cfg.consensus.clone()),
            validator: StateValidator::new(cfg.validation.clone()),
            recovery: RecoveryManager::new(cfg.recovery.clone()),
            health: HealthMonitor::new(cfg.health.clone()),
            errors: ErrorPatternDetector::new(cfg.health.pattern_threshold),
            quality: QualityMetrics::new(cfg.health.quality_window),
            recalibrator: AutoRecalibrator::new(cfg.health.clone()),
            resources: ResourceMonitor::new(cfg.resource.clone()),
            semaphore: Arc::new(Semaphore::new(cfg.scheduler.workers)),
            required: vec![FieldId::Pot],
            interval: cfg.scheduler.min_interval,
            registry,
            store,
            last_state,
            state_fallbacks,
            layout_drift: Vec::new(),
            corrections: Vec::new(),
            cfg,
        };
        pipeline.audit_layout();
        pipeline
    }

    /// Fields that must resolve before a cycle's state counts as usable.
    pub fn set_required_fields(&mut self, fields: Vec<FieldId>) {
        self.required = fields;
    }

    /// Run one frame through the full pipeline. `None` means the frame
    /// was skipped as unchanged; `Some` carries the cycle's state, which
    /// may itself be unusable if a required field is missing.
    pub async fn process_frame(&mut self, frame: Frame) -> Result<Option<PartialState>> {
        let decision = self.detector.should_process_frame(&frame);
        self.adapt_interval(decision.process);
        if !decision.process {
            return Ok(None);
        }

        let changed = self.detector.detect_changed_regions(&frame, &self.registry);
        debug!(regions = changed.len(), similarity = decision.similarity, "processing frame");

        let extractions = self.extract_regions(&frame, &changed).await;
        self.corrections.clear();

        let mut confidences = Vec::new();
        for Extraction { field, roi, result } in extractions {
            match result {
                Ok((result, was_cached)) => {
                    let success = result.value.is_some();
                    self.recovery.record(success);
                    self.health.record(field, success);
                    match result.value {
                        Some(value) => {
                            confidences.push(result.confidence);
                            self.quality.record(result.confidence);
                            self.consensus.observe(field, value, result.confidence);
                            if was_cached {
                                debug!(field = %field, "served from cache");
                            }
                        }
                        None => {
                            self.errors
                                .record(ErrorKind::Degraded, &format!("{} unresolved", field));
                        }
                    }
                }
                Err(err) => {
                    self.recovery.record(false);
                    self.health.record(field, false);
                    self.errors
                        .record(ErrorKind::Transient, &format!("{:?}: {}", roi, err));
                }
            }
        }

        self.note_hand_boundary();
        let state = self.build_state();

        if state.is_usable() {
            self.commit_state(&state);
        }

        if let Some(mean) = mean_of(&confidences) {
            if self.recalibrator.observe(mean) {
                self.force_recalibrate(frame.width(), frame.height());
            }
        }
        if let Some(action) = self.recovery.check() {
            self.apply_recovery(action, frame.width(), frame.height());
        }
        if let Some(report) = self.resources.sample() {
            if report.suspected_leak {
                self.errors.record(ErrorKind::Resource, "memory growth");
            }
        }

        Ok(Some(state))
    }

    /// Run a whole-cycle extraction under the watchdog deadline. Success
    /// feeds the recovery and health windows and persists a usable state;
    /// a failure or timeout is logged, counted against recovery, and
    /// answered with the most trusted known-good state instead.
    pub async fn safe_extract<F>(&mut self, name: &'static str, op: F) -> Option<PartialState>
    where
        F: Future<Output = Result<PartialState>>,
    {
        match watchdog::with_deadline(name, self.cfg.scheduler.watchdog_timeout, op).await {
            Ok(state) => {
                self.recovery.record(true);
                for field in state.fields.keys() {
                    self.health.record(*field, true);
                }
                if state.is_usable() {
                    self.commit_state(&state);
                }
                Some(state)
            }
            Err(err) => {
                self.recovery.record(false);
                for field in self.required.clone() {
                    self.health.record(field, false);
                }
                self.errors
                    .record(ErrorKind::Transient, &format!("{}: {}", name, err));
                let (width, height) = (self.registry.frame_width, self.registry.frame_height);
                if let Some(action) = self.recovery.check() {
                    self.apply_recovery(action, width, height);
                }
                self.state_fallbacks.run().map(|(state, source)| {
                    warn!(source, "serving known-good state after failed extraction");
                    state
                })
            }
        }
    }

    /// Save a usable state and remember it as the session's last good
    /// answer.
    fn commit_state(&mut self, state: &PartialState) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save(state) {
                warn!(error = %err, "snapshot save failed");
                self.errors.record(ErrorKind::Transient, "snapshot save");
            }
        }
        *self.last_state.lock().expect("state lock") = Some(state.clone());
    }

    /// Run the changed regions through cache and ensemble on the bounded
    /// blocking pool, each attempt under the watchdog deadline.
    async fn extract_regions(
        &self,
        frame: &Frame,
        changed: &HashSet<RoiName>,
    ) -> Vec<Extraction> {
        let mut handles = Vec::new();
        for entry in self.registry.entries() {
            if !changed.contains(&entry.name) {
                continue;
            }
            let Some(region) = self.registry.crop(&frame.image, entry.name) else {
                continue;
            };
            let cache = Arc::clone(&self.cache);
            let recognizer = Arc::clone(&self.recognizer);
            let semaphore = Arc::clone(&self.semaphore);
            let deadline = self.cfg.scheduler.watchdog_timeout;
            let kind = entry.kind;
            let field = entry.field;
            let roi = entry.name;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = watchdog::with_deadline("region extraction", deadline, async {
                    let joined = tokio::task::spawn_blocking(move || {
                        let mut cache = cache.lock().expect("cache lock");
                        cache.get(&region, kind, || recognizer.recognize(&region, kind))
                    })
                    .await?;
                    Ok(joined)
                })
                .await;
                Extraction { field, roi, result }
            }));
        }

        let mut extractions = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(extraction) => extractions.push(extraction),
                Err(err) => warn!(error = %err, "extraction task panicked"),
            }
        }
        extractions
    }

    /// Assemble the cycle's state from the smoothed per-field consensus,
    /// applying the cross-field validators along the way.
    fn build_state(&mut self) -> PartialState {
        let mut state = PartialState {
            frame_no: self.detector.frame_no(),
            ..PartialState::default()
        };

        let fields: Vec<FieldId> = self.registry.entries().iter().map(|e| e.field).collect();
        for field in fields {
            let Some((smoothed, smoothed_confidence)) = self.consensus.consensus(&field) else {
                continue;
            };
            // The smoothed window and the newest raw sample vote as two
            // pathways, the window with more trust. A fresh reading only
            // wins when the window's own confidence has decayed.
            let mut readings = vec![SourceReading {
                source: "temporal",
                value: smoothed,
                confidence: smoothed_confidence,
                weight: 1.25,
            }];
            if let Some(sample) = self.consensus.buffer(&field).and_then(|b| b.latest()) {
                readings.push(SourceReading {
                    source: "instant",
                    value: sample.value.clone(),
                    confidence: sample.confidence,
                    weight: 1.0,
                });
            }
            let Some((value, confidence)) = fuse_sources(&readings) else {
                continue;
            };
            let (value, correction) = self.validate_field(field, value);
            if let Some(correction) = correction {
                self.errors
                    .record(correction.kind, &format!("{}", correction.rule));
                self.corrections.push(correction);
            }
            if let Some(value) = value {
                state.insert(field, value, confidence);
            }
        }

        for field in &self.required {
            state.mark_missing_required(*field);
        }
        state
    }

    fn validate_field(
        &mut self,
        field: FieldId,
        value: FieldValue,
    ) -> (Option<FieldValue>, Option<Correction>) {
        match (field, &value) {
            (FieldId::Pot, FieldValue::Number(pot)) => {
                let (kept, correction) = self.validator.check_pot(*pot);
                (Some(FieldValue::Number(kept)), correction)
            }
            (FieldId::SeatStack(seat), FieldValue::Number(stack)) => {
                let (kept, correction) = self.validator.check_stack(seat, *stack);
                (Some(FieldValue::Number(kept)), correction)
            }
            (FieldId::SeatAction(seat), FieldValue::Category(label)) => {
                let (_, correction) = self.validator.check_action(seat, label);
                match correction {
                    // An illegal transition invalidates the reading
                    // itself, not just the transition.
                    Some(correction) => (None, Some(correction)),
                    None => (Some(value), None),
                }
            }
            _ => (Some(value), None),
        }
    }

    /// A collapsed pot with no visible board card means the previous
    /// hand ended; per-hand state restarts rather than smoothing across
    /// the boundary.
    fn note_hand_boundary(&mut self) {
        let Some(previous_pot) = self.validator.last_pot() else {
            return;
        };
        let Some((FieldValue::Number(pot), _)) = self.consensus.consensus(&FieldId::Pot)
        else {
            return;
        };
        if pot >= previous_pot * HAND_RESET_RATIO {
            return;
        }
        let board_visible = (0..5u8).any(|slot| {
            self.consensus
                .buffer(&FieldId::BoardSlot(slot))
                .and_then(|b| b.latest())
                .map(|s| s.value.as_card().is_some())
                .unwrap_or(false)
        });
        if !board_visible {
            info!(pot, previous_pot, "hand boundary detected");
            self.consensus.reset();
            self.validator.new_hand();
        }
    }

    fn apply_recovery(&mut self, action: RecoveryAction, width: u32, height: u32) {
        match action {
            RecoveryAction::ClearCaches => self.clear_caches(),
            RecoveryAction::ForceRecalibration => self.force_recalibrate(width, height),
            RecoveryAction::ReduceSamplingRate => {
                self.interval = scale_interval(
                    self.interval,
                    self.cfg.scheduler.backoff_factor,
                    self.cfg.scheduler.max_interval,
                );
            }
            RecoveryAction::RestartCapture => {
                // The capture source lives outside this crate; drop all
                // comparison state so the fresh source starts clean, and
                // surface the event.
                error!("extraction collapsed, capture restart requested");
                self.detector.reset();
                self.clear_caches();
                self.errors.record(ErrorKind::Critical, "capture restart requested");
            }
        }
    }

    pub fn clear_caches(&mut self) {
        self.cache.lock().expect("cache lock").invalidate(None);
    }

    /// Rebuild the ROI layout for the given capture size and drop state
    /// derived from the old layout.
    pub fn force_recalibrate(&mut self, width: u32, height: u32) {
        info!(width, height, "recalibrating roi layout");
        self.registry = self.registry.rescaled(width.max(1), height.max(1));
        self.audit_layout();
        self.detector.reset();
        self.clear_caches();
    }

    /// Compare each entry against where its role sits on a standard
    /// table of the same shape. A drifted entry keeps extracting, but it
    /// is flagged: misplaced regions are the usual cause of persistent
    /// misreads after a client update.
    fn audit_layout(&mut self) {
        let seats = self
            .registry
            .entries()
            .iter()
            .filter(|e| matches!(e.name, RoiName::Seat(_)))
            .count() as u8;
        let reference = RoiRegistry::standard(
            self.registry.frame_width,
            self.registry.frame_height,
            seats,
        );
        let band = self.cfg.validation.layout_band;
        self.layout_drift = self
            .registry
            .entries()
            .iter()
            .filter_map(|entry| {
                let expected = reference.get(entry.name)?;
                if layout_consistent(&expected.rect, &entry.rect, band) {
                    None
                } else {
                    Some(entry.name)
                }
            })
            .collect();
        for name in &self.layout_drift {
            warn!(roi = ?name, "roi outside its layout band");
            self.errors
                .record(ErrorKind::Validation, &format!("{:?} outside layout band", name));
        }
    }

    /// ROIs whose position failed the layout band check at the last
    /// calibration.
    pub fn layout_drift(&self) -> &[RoiName] {
        &self.layout_drift
    }

    /// Per-method attempt/success counts of the known-good fallback
    /// chain.
    pub fn fallback_stats(&self) -> Vec<(&'static str, u64, u64)> {
        self.state_fallbacks.stats()
    }

    /// Suggested delay before the next capture. Widens while frames keep
    /// coming back unchanged, narrows as soon as activity returns.
    pub fn recommended_interval(&self) -> Duration {
        self.interval
    }

    fn adapt_interval(&mut self, processed: bool) {
        if processed {
            self.interval = self.cfg.scheduler.min_interval;
        } else {
            self.interval = scale_interval(
                self.interval,
                self.cfg.scheduler.backoff_factor,
                self.cfg.scheduler.max_interval,
            );
        }
    }

    /// Most recent usable state, current or restored from disk.
    pub fn last_usable_state(&self) -> Option<PartialState> {
        self.last_state.lock().expect("state lock").clone()
    }

    /// Validator interventions from the most recent cycle.
    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    pub fn health_report(&mut self) -> HealthReport {
        let memory = self.resources.sample();
        let leak = memory.as_ref().map(|m| m.suspected_leak).unwrap_or(false);
        // The headline number folds in recurring errors and the memory
        // signal, not just field success rates.
        let score = composite_score(self.health.score(), self.errors.recurring_total(), leak);
        HealthReport {
            score,
            degraded_fields: self.health.degraded_fields(),
            error_patterns: self.errors.patterns(),
            cache: self.cache.lock().expect("cache lock").stats(),
            change: self.detector.stats(),
            mean_confidence: self.quality.average(),
            confidence_trend: self.quality.trend(),
            memory,
            recovery_actions: self.recovery.actions_taken(),
            recalibrations: self.recalibrator.triggers(),
            current_interval: self.interval,
        }
    }
}

fn mean_of(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

fn scale_interval(current: Duration, factor: f64, max: Duration) -> Duration {
    let scaled = current.mul_f64(factor.max(1.0));
    scaled.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthConfig, SchedulerConfig};
    use crate::ensemble::StrategyVote;
    use crate::roi::{NormRect, RoiEntry};
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::Mutex as StdMutex;

    /// Scripted strategy: answers amounts from a queue, one per call,
    /// and gives fixed answers for the other kinds so every region
    /// resolves.
    struct ScriptedTable {
        script: StdMutex<Vec<f64>>,
    }

    impl RecognitionStrategy for ScriptedTable {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn attempt(&self, _region: &DynamicImage, kind: ExtractionKind) -> StrategyVote {
            match kind {
                ExtractionKind::Amount => match self.script.lock().unwrap().pop() {
                    Some(amount) => {
                        StrategyVote::value(FieldValue::Number(amount), 0.9, "")
                    }
                    None => StrategyVote::abstain(),
                },
                ExtractionKind::CardFace => StrategyVote::value(
                    FieldValue::Card(crate::types::Card::new(
                        crate::types::Rank::Ace,
                        crate::types::Suit::Spades,
                    )),
                    0.9,
                    "",
                ),
                ExtractionKind::ActionLabel => {
                    StrategyVote::value(FieldValue::Category("check".to_string()), 0.9, "")
                }
                ExtractionKind::TimerValue => {
                    StrategyVote::value(FieldValue::Number(20.0), 0.9, "")
                }
            }
        }
    }

    fn frame_with_brightness(level: u8) -> Frame {
        let img = RgbaImage::from_fn(640, 360, |x, y| {
            let base = (((x / 16) + (y / 16)) % 2) as u8 * 90;
            Rgba([base.saturating_add(level), base, base, 255])
        });
        Frame::new(DynamicImage::ImageRgba8(img))
    }

    fn pipeline_with_cfg(cfg: PipelineConfig, amounts: Vec<f64>) -> Pipeline {
        let strategy: Arc<dyn RecognitionStrategy> = Arc::new(ScriptedTable {
            script: StdMutex::new(amounts),
        });
        Pipeline::new(cfg, RoiRegistry::standard(640, 360, 2), vec![strategy], None)
    }

    fn pipeline_with_script(amounts: Vec<f64>) -> Pipeline {
        pipeline_with_cfg(PipelineConfig::default(), amounts)
    }

    #[tokio::test]
    async fn test_unchanged_frame_yields_none() {
        let mut pipeline = pipeline_with_script(vec![100.0; 12]);
        let frame = frame_with_brightness(40);
        assert!(pipeline.process_frame(frame.clone()).await.unwrap().is_some());
        assert!(pipeline.process_frame(frame).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interval_widens_on_skips_and_resets_on_activity() {
        let mut pipeline = pipeline_with_script(vec![100.0; 40]);
        let min = SchedulerConfig::default().min_interval;
        let frame = frame_with_brightness(40);
        pipeline.process_frame(frame.clone()).await.unwrap();
        assert_eq!(pipeline.recommended_interval(), min);
        for _ in 0..4 {
            pipeline.process_frame(frame.clone()).await.unwrap();
        }
        assert!(pipeline.recommended_interval() > min);

        pipeline
            .process_frame(frame_with_brightness(160))
            .await
            .unwrap();
        assert_eq!(pipeline.recommended_interval(), min);
    }

    #[tokio::test]
    async fn test_state_carries_pot_from_recognition() {
        let mut pipeline = pipeline_with_script(vec![100.0; 12]);
        let state = pipeline
            .process_frame(frame_with_brightness(40))
            .await
            .unwrap()
            .expect("first frame processes");
        let pot = state.number(&FieldId::Pot).expect("pot resolved");
        assert!((pot - 100.0).abs() < 1e-6);
        assert!(state.is_usable());
    }

    #[tokio::test]
    async fn test_required_field_gate() {
        // Strategy abstains on everything; pot never resolves.
        let mut pipeline = pipeline_with_script(vec![]);
        let state = pipeline
            .process_frame(frame_with_brightness(40))
            .await
            .unwrap()
            .expect("frame processes");
        assert!(!state.is_usable());
        assert!(state.missing_required.contains(&FieldId::Pot));
        assert!(pipeline.last_usable_state().is_none());
    }

    #[tokio::test]
    async fn test_health_report_populates() {
        let mut pipeline = pipeline_with_script(vec![100.0; 12]);
        pipeline
            .process_frame(frame_with_brightness(40))
            .await
            .unwrap();
        let report = pipeline.health_report();
        assert!(report.score > 0.0);
        assert_eq!(report.change.processed_frames, 1);
        assert_eq!(report.recovery_actions, 0);
    }

    #[tokio::test]
    async fn test_report_score_penalized_by_recurring_errors() {
        let cfg = PipelineConfig {
            health: HealthConfig {
                pattern_threshold: 3,
                ..HealthConfig::default()
            },
            ..PipelineConfig::default()
        };
        // Every amount region fails: pot plus two stacks, three
        // recurring degraded reads against seven resolved fields.
        let mut pipeline = pipeline_with_cfg(cfg, vec![]);
        pipeline
            .process_frame(frame_with_brightness(40))
            .await
            .unwrap();
        let report = pipeline.health_report();
        assert!(!report.error_patterns.is_empty());
        assert!((report.score - 64.0).abs() < 1e-6, "got {}", report.score);
    }

    #[tokio::test]
    async fn test_safe_extract_commits_usable_state() {
        let mut pipeline = pipeline_with_script(vec![]);
        let mut state = PartialState::default();
        state.insert(FieldId::Pot, FieldValue::Number(75.0), 0.9);
        let returned = pipeline
            .safe_extract("direct extraction", async { Ok::<_, anyhow::Error>(state) })
            .await
            .expect("state returned");
        assert!((returned.number(&FieldId::Pot).unwrap() - 75.0).abs() < 1e-6);

        let held = pipeline.last_usable_state().expect("state committed");
        assert!((held.number(&FieldId::Pot).unwrap() - 75.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_safe_extract_serves_last_good_on_timeout() {
        let cfg = PipelineConfig {
            scheduler: SchedulerConfig {
                watchdog_timeout: Duration::from_millis(200),
                ..SchedulerConfig::default()
            },
            ..PipelineConfig::default()
        };
        let mut pipeline = pipeline_with_cfg(cfg, vec![100.0; 12]);
        pipeline
            .process_frame(frame_with_brightness(40))
            .await
            .unwrap();
        assert!(pipeline.last_usable_state().is_some());

        let served = pipeline
            .safe_extract("stalled extraction", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, anyhow::Error>(PartialState::default())
            })
            .await
            .expect("known-good state served");
        assert!((served.number(&FieldId::Pot).unwrap() - 100.0).abs() < 1e-6);

        let stats = pipeline.fallback_stats();
        assert_eq!(stats[0].0, "memory");
        assert_eq!(stats[0].2, 1, "memory fallback answered");
    }

    #[test]
    fn test_layout_drift_flagged() {
        let entries = vec![RoiEntry {
            name: RoiName::Pot,
            rect: NormRect::new(0.05, 0.80, 0.20, 0.06),
            field: FieldId::Pot,
            kind: ExtractionKind::Amount,
        }];
        let registry = RoiRegistry::from_entries(entries, 640, 360);
        let strategy: Arc<dyn RecognitionStrategy> = Arc::new(ScriptedTable {
            script: StdMutex::new(vec![]),
        });
        let pipeline = Pipeline::new(PipelineConfig::default(), registry, vec![strategy], None);
        assert_eq!(pipeline.layout_drift(), &[RoiName::Pot]);

        let standard = pipeline_with_script(vec![]);
        assert!(standard.layout_drift().is_empty());
    }
}
