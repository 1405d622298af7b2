// src/health.rs
// Extraction health: per-field success tracking, recurring-error
// detection, rolling quality metrics and the automatic recalibration
// trigger.

use crate::config::HealthConfig;
use crate::types::{ErrorKind, FieldId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{info, warn};

/// Retained error-log entries per kind.
const ERROR_LOG_CAP: usize = 32;

/// Rolling success window for one field.
#[derive(Debug, Default)]
struct FieldWindow {
    outcomes: VecDeque<bool>,
}

impl FieldWindow {
    fn record(&mut self, success: bool, capacity: usize) {
        if self.outcomes.len() == capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn success_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.outcomes.iter().filter(|s| **s).count();
        successes as f64 / self.outcomes.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegradationAlert {
    pub field: FieldId,
    pub success_rate: f64,
}

/// Per-field extraction reliability with an aggregate 0..100 score.
pub struct HealthMonitor {
    cfg: HealthConfig,
    fields: HashMap<FieldId, FieldWindow>,
}

impl HealthMonitor {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            fields: HashMap::new(),
        }
    }

    pub fn record(&mut self, field: FieldId, success: bool) {
        let window = self.cfg.window;
        self.fields
            .entry(field)
            .or_default()
            .record(success, window);
    }

    pub fn field_rate(&self, field: &FieldId) -> Option<f64> {
        self.fields.get(field).map(|w| w.success_rate())
    }

    /// Fields whose rolling success rate has fallen below the
    /// degradation threshold.
    pub fn degraded_fields(&self) -> Vec<DegradationAlert> {
        let mut alerts: Vec<DegradationAlert> = self
            .fields
            .iter()
            .filter(|(_, w)| w.outcomes.len() >= self.cfg.min_samples)
            .filter(|(_, w)| w.success_rate() < self.cfg.degradation_threshold)
            .map(|(field, w)| DegradationAlert {
                field: *field,
                success_rate: w.success_rate(),
            })
            .collect();
        alerts.sort_by(|a, b| a.success_rate.total_cmp(&b.success_rate));
        for alert in &alerts {
            warn!(field = %alert.field, rate = alert.success_rate, "field degraded");
        }
        alerts
    }

    /// Mean per-field success rate scaled to 0..100. An empty monitor
    /// reports full health.
    pub fn score(&self) -> f64 {
        if self.fields.is_empty() {
            return 100.0;
        }
        let total: f64 = self.fields.values().map(|w| w.success_rate()).sum();
        total / self.fields.len() as f64 * 100.0
    }
}

/// Blends the per-field success score with the recent error volume and
/// the resource signal into one 0..100 figure.
pub fn composite_score(success_score: f64, recurring_errors: usize, suspected_leak: bool) -> f64 {
    let error_penalty = (recurring_errors as f64 * 2.0).min(25.0);
    let leak_penalty = if suspected_leak { 15.0 } else { 0.0 };
    (success_score - error_penalty - leak_penalty).clamp(0.0, 100.0)
}

/// Tracks error occurrences per kind: a total count plus a bounded log
/// of timestamped contexts for diagnosis.
pub struct ErrorPatternDetector {
    threshold: usize,
    counts: HashMap<ErrorKind, usize>,
    log: HashMap<ErrorKind, VecDeque<(DateTime<Utc>, String)>>,
}

impl ErrorPatternDetector {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            counts: HashMap::new(),
            log: HashMap::new(),
        }
    }

    pub fn record(&mut self, kind: ErrorKind, context: &str) {
        *self.counts.entry(kind).or_insert(0) += 1;
        let entries = self.log.entry(kind).or_default();
        if entries.len() == ERROR_LOG_CAP {
            entries.pop_front();
        }
        entries.push_back((Utc::now(), context.to_string()));
    }

    /// Timestamped contexts recorded for one kind, oldest first. Bounded
    /// at `ERROR_LOG_CAP` entries; the count keeps the full total.
    pub fn history(&self, kind: ErrorKind) -> impl Iterator<Item = &(DateTime<Utc>, String)> {
        self.log.get(&kind).into_iter().flatten()
    }

    /// Total occurrences across recurring kinds.
    pub fn recurring_total(&self) -> usize {
        self.patterns().iter().map(|(_, count, _)| *count).sum()
    }

    /// Kinds seen at least `threshold` times, with count and last
    /// context.
    pub fn patterns(&self) -> Vec<(ErrorKind, usize, String)> {
        let mut out: Vec<_> = self
            .counts
            .iter()
            .filter(|(_, count)| **count >= self.threshold)
            .map(|(kind, count)| {
                let last = self
                    .log
                    .get(kind)
                    .and_then(|entries| entries.back())
                    .map(|(_, context)| context.clone())
                    .unwrap_or_default();
                (*kind, *count, last)
            })
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }

    pub fn reset(&mut self) {
        self.counts.clear();
        self.log.clear();
    }
}

/// Direction of the recent confidence trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

/// Rolling confidence history with average, floor and trend.
pub struct QualityMetrics {
    window: usize,
    confidences: VecDeque<f32>,
}

impl QualityMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            confidences: VecDeque::new(),
        }
    }

    pub fn record(&mut self, confidence: f32) {
        if self.confidences.len() == self.window {
            self.confidences.pop_front();
        }
        self.confidences.push_back(confidence);
    }

    pub fn average(&self) -> Option<f32> {
        if self.confidences.is_empty() {
            return None;
        }
        Some(self.confidences.iter().sum::<f32>() / self.confidences.len() as f32)
    }

    pub fn minimum(&self) -> Option<f32> {
        self.confidences.iter().copied().reduce(f32::min)
    }

    /// Compares the older half of the window against the newer half.
    pub fn trend(&self) -> Trend {
        let n = self.confidences.len();
        if n < 4 {
            return Trend::Stable;
        }
        let half = n / 2;
        let older: f32 =
            self.confidences.iter().take(half).sum::<f32>() / half as f32;
        let newer: f32 =
            self.confidences.iter().skip(n - half).sum::<f32>() / half as f32;
        if newer > older + 0.05 {
            Trend::Improving
        } else if newer < older - 0.05 {
            Trend::Worsening
        } else {
            Trend::Stable
        }
    }
}

/// Fires a recalibration when windowed mean confidence stays low, with a
/// minimum spacing between triggers.
pub struct AutoRecalibrator {
    cfg: HealthConfig,
    confidences: VecDeque<f32>,
    last_triggered: Option<Instant>,
    triggers: u64,
}

impl AutoRecalibrator {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            confidences: VecDeque::new(),
            last_triggered: None,
            triggers: 0,
        }
    }

    /// Record a confidence sample; returns true when a recalibration
    /// should run now.
    pub fn observe(&mut self, confidence: f32) -> bool {
        if self.confidences.len() == self.cfg.quality_window {
            self.confidences.pop_front();
        }
        self.confidences.push_back(confidence);

        if self.confidences.len() < self.cfg.min_samples {
            return false;
        }
        let mean =
            self.confidences.iter().sum::<f32>() as f64 / self.confidences.len() as f64;
        if mean >= self.cfg.recalibration_threshold {
            return false;
        }
        let spaced = self
            .last_triggered
            .map(|t| t.elapsed() >= self.cfg.recalibration_interval)
            .unwrap_or(true);
        if !spaced {
            return false;
        }
        self.last_triggered = Some(Instant::now());
        self.triggers += 1;
        // The window restarts so post-recalibration samples are judged
        // on their own.
        self.confidences.clear();
        info!(mean, "auto recalibration triggered");
        true
    }

    pub fn triggers(&self) -> u64 {
        self.triggers
    }
}
