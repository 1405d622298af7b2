// src/consensus.rs
// Temporal smoothing of noisy per-frame readings. Each field keeps a
// bounded window of (value, confidence) samples; numeric consensus is a
// confidence-weighted mean after outlier trimming, categorical
// consensus is a confidence-weighted mode.

use crate::config::ConsensusConfig;
use crate::types::{FieldId, FieldValue};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
pub struct Sample {
    pub value: FieldValue,
    pub confidence: f32,
}

/// Bounded sliding window for one field.
#[derive(Debug, Clone)]
pub struct TemporalBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl TemporalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: FieldValue, confidence: f32) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { value, confidence });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Confidence-weighted mean of the retained numeric samples. A
    /// sample is trimmed when it sits further than `trim_sigma` σ from
    /// the mean of the *other* samples; a single spike cannot drag the
    /// window mean far enough to hide itself.
    pub fn numeric_consensus(&self, trim_sigma: f64) -> Option<(f64, f32)> {
        let numeric: Vec<(f64, f32)> = self
            .samples
            .iter()
            .filter_map(|s| s.value.as_number().map(|n| (n, s.confidence)))
            .collect();
        if numeric.is_empty() {
            return None;
        }
        if numeric.len() <= 2 {
            return Some(weighted_mean(&numeric));
        }

        let retained: Vec<(f64, f32)> = numeric
            .iter()
            .enumerate()
            .filter(|(i, (v, _))| {
                let rest: Vec<f64> = numeric
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| j != i)
                    .map(|(_, (n, _))| *n)
                    .collect();
                let mean = rest.iter().sum::<f64>() / rest.len() as f64;
                let var =
                    rest.iter().map(|n| (n - mean).powi(2)).sum::<f64>() / rest.len() as f64;
                let sigma = var.sqrt();
                (v - mean).abs() <= trim_sigma * sigma
            })
            .map(|(_, s)| *s)
            .collect();

        if retained.is_empty() {
            // Every sample disagrees with every other; fall back to the
            // full window rather than inventing a value.
            return Some(weighted_mean(&numeric));
        }
        Some(weighted_mean(&retained))
    }

    /// Confidence-weighted mode over categorical samples.
    pub fn categorical_consensus(&self) -> Option<(FieldValue, f32)> {
        let mut scores: HashMap<String, (FieldValue, f32, f32)> = HashMap::new();
        let mut any = false;
        for sample in &self.samples {
            if sample.value.as_number().is_some() {
                continue;
            }
            any = true;
            let entry = scores
                .entry(sample.value.group_key())
                .or_insert_with(|| (sample.value.clone(), 0.0, 0.0));
            entry.1 += sample.confidence;
            entry.2 += 1.0;
        }
        if !any {
            return None;
        }
        scores
            .into_values()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(value, score, count)| (value, (score / count).clamp(0.0, 1.0)))
    }

    /// Bounds of the retained numeric samples, for plausibility checks.
    pub fn numeric_bounds(&self) -> Option<(f64, f64)> {
        let mut bounds: Option<(f64, f64)> = None;
        for sample in &self.samples {
            if let Some(n) = sample.value.as_number() {
                bounds = Some(match bounds {
                    None => (n, n),
                    Some((lo, hi)) => (lo.min(n), hi.max(n)),
                });
            }
        }
        bounds
    }
}

fn weighted_mean(samples: &[(f64, f32)]) -> (f64, f32) {
    let weight: f64 = samples.iter().map(|(_, c)| *c as f64).sum();
    if weight <= 0.0 {
        let mean = samples.iter().map(|(v, _)| v).sum::<f64>() / samples.len() as f64;
        return (mean, 0.0);
    }
    let mean = samples
        .iter()
        .map(|(v, c)| v * *c as f64)
        .sum::<f64>()
        / weight;
    let confidence = (weight / samples.len() as f64) as f32;
    (mean, confidence.clamp(0.0, 1.0))
}

/// One independent pathway's answer for a field, with the trust placed
/// in that pathway overall.
#[derive(Debug, Clone)]
pub struct SourceReading {
    pub source: &'static str,
    pub value: FieldValue,
    pub confidence: f32,
    /// Path reliability: structured introspection above OCR above a
    /// learned vision model.
    pub weight: f32,
}

/// Fuse readings from independent extraction pathways by weighted vote.
pub fn fuse_sources(readings: &[SourceReading]) -> Option<(FieldValue, f32)> {
    if readings.is_empty() {
        return None;
    }
    let mut scores: HashMap<String, (FieldValue, f32)> = HashMap::new();
    for reading in readings {
        let entry = scores
            .entry(reading.value.group_key())
            .or_insert_with(|| (reading.value.clone(), 0.0));
        entry.1 += reading.confidence * reading.weight;
    }
    let total: f32 = readings.iter().map(|r| r.weight).sum();
    scores
        .into_values()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(value, score)| (value, (score / total.max(f32::EPSILON)).clamp(0.0, 1.0)))
}

/// All per-field windows for a session.
pub struct ConsensusTracker {
    cfg: ConsensusConfig,
    buffers: HashMap<FieldId, TemporalBuffer>,
}

impl ConsensusTracker {
    pub fn new(cfg: ConsensusConfig) -> Self {
        Self {
            cfg,
            buffers: HashMap::new(),
        }
    }

    pub fn observe(&mut self, field: FieldId, value: FieldValue, confidence: f32) {
        let window = self.cfg.window;
        self.buffers
            .entry(field)
            .or_insert_with(|| TemporalBuffer::new(window))
            .push(value, confidence);
    }

    pub fn buffer(&self, field: &FieldId) -> Option<&TemporalBuffer> {
        self.buffers.get(field)
    }

    /// Smoothed value for a field: numeric fields through the trimmed
    /// weighted mean, everything else through the weighted mode.
    pub fn consensus(&self, field: &FieldId) -> Option<(FieldValue, f32)> {
        let buffer = self.buffers.get(field)?;
        if let Some((mean, confidence)) = buffer.numeric_consensus(self.cfg.trim_sigma) {
            return Some((FieldValue::Number(mean), confidence));
        }
        buffer.categorical_consensus()
    }

    /// A new hand invalidates every window; stale smoothing across a
    /// hand boundary would resurrect dead values.
    pub fn reset(&mut self) {
        self.buffers.clear();
    }

    pub fn reset_field(&mut self, field: &FieldId) {
        if let Some(buffer) = self.buffers.get_mut(field) {
            buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(values: &[(f64, f32)]) -> TemporalBuffer {
        let mut buffer = TemporalBuffer::new(5);
        for (v, c) in values {
            buffer.push(FieldValue::Number(*v), *c);
        }
        buffer
    }

    #[test]
    fn test_outlier_spike_excluded() {
        // [100, 101, 99, 150, 100] at equal confidence: the 150 spike is
        // trimmed and consensus lands on ~100.
        let buffer = buffer_with(&[
            (100.0, 1.0),
            (101.0, 1.0),
            (99.0, 1.0),
            (150.0, 1.0),
            (100.0, 1.0),
        ]);
        let (mean, _) = buffer.numeric_consensus(2.0).unwrap();
        assert!((mean - 100.0).abs() < 1.0, "got {}", mean);
    }

    #[test]
    fn test_consensus_within_retained_bounds() {
        let buffer = buffer_with(&[
            (95.0, 0.9),
            (100.0, 0.5),
            (105.0, 0.7),
            (98.0, 0.8),
        ]);
        let (mean, _) = buffer.numeric_consensus(2.0).unwrap();
        let (lo, hi) = buffer.numeric_bounds().unwrap();
        assert!(mean >= lo && mean <= hi);
    }

    #[test]
    fn test_confidence_weights_pull_mean() {
        let buffer = buffer_with(&[(100.0, 1.0), (110.0, 0.1)]);
        let (mean, _) = buffer.numeric_consensus(2.0).unwrap();
        assert!(mean < 102.0, "low-confidence sample dominated: {}", mean);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut buffer = TemporalBuffer::new(5);
        for i in 0..10 {
            buffer.push(FieldValue::Number(i as f64), 1.0);
        }
        assert_eq!(buffer.len(), 5);
        let (lo, _) = buffer.numeric_bounds().unwrap();
        assert_eq!(lo, 5.0);
    }

    #[test]
    fn test_categorical_weighted_mode() {
        let mut buffer = TemporalBuffer::new(5);
        buffer.push(FieldValue::Category("raise".to_string()), 0.9);
        buffer.push(FieldValue::Category("fold".to_string()), 0.3);
        buffer.push(FieldValue::Category("raise".to_string()), 0.8);
        let (value, _) = buffer.categorical_consensus().unwrap();
        assert_eq!(value, FieldValue::Category("raise".to_string()));
    }

    #[test]
    fn test_identical_samples_trim_nothing() {
        let buffer = buffer_with(&[(50.0, 1.0); 5]);
        let (mean, confidence) = buffer.numeric_consensus(2.0).unwrap();
        assert_eq!(mean, 50.0);
        assert_eq!(confidence, 1.0);
    }

    #[test]
    fn test_fusion_prefers_weighted_path() {
        let readings = [
            SourceReading {
                source: "structured",
                value: FieldValue::Number(120.0),
                confidence: 0.8,
                weight: 1.5,
            },
            SourceReading {
                source: "ocr",
                value: FieldValue::Number(720.0),
                confidence: 0.9,
                weight: 1.0,
            },
        ];
        let (value, _) = fuse_sources(&readings).unwrap();
        assert_eq!(value, FieldValue::Number(120.0));
    }

    #[test]
    fn test_tracker_reset_clears_windows() {
        let mut tracker = ConsensusTracker::new(ConsensusConfig::default());
        tracker.observe(FieldId::Pot, FieldValue::Number(100.0), 1.0);
        assert!(tracker.consensus(&FieldId::Pot).is_some());
        tracker.reset();
        assert!(tracker.consensus(&FieldId::Pot).is_none());
    }
}
