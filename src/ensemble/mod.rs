// src/ensemble/mod.rs
// Resolves one region to one value by running independent recognition
// strategies and fusing their votes with weighted identity-group voting.

pub mod color;
pub mod edges;
pub mod ocr;
pub mod template;

pub use color::ColorFamilyStrategy;
pub use edges::EdgeDensityStrategy;
pub use ocr::{OcrEngine, OcrObservation, OcrStrategy};
pub use template::{Exemplar, TemplateMatchStrategy};

use crate::config::EnsembleConfig;
use crate::types::{ColorFamily, ExtractionKind, FieldValue, RecognitionResult};
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A side-channel observation from a strategy that cannot name a value
/// but can confirm or deny properties of one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationSignal {
    /// Dominant ink color of the region.
    Color(ColorFamily),
    /// Expected sub-glyph structure is present.
    GlyphPresent,
}

impl ValidationSignal {
    /// Whether this signal is consistent with a candidate value.
    fn supports(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (ValidationSignal::Color(family), FieldValue::Card(card)) => {
                card.suit.color() == *family
            }
            // Color says nothing about non-card values.
            (ValidationSignal::Color(_), _) => false,
            (ValidationSignal::GlyphPresent, _) => true,
        }
    }
}

/// One strategy's contribution for one region.
#[derive(Debug, Clone)]
pub struct StrategyVote {
    pub value: Option<FieldValue>,
    pub confidence: f32,
    pub signal: Option<ValidationSignal>,
    pub detail: String,
}

impl StrategyVote {
    pub fn value(value: FieldValue, confidence: f32, detail: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            confidence,
            signal: None,
            detail: detail.into(),
        }
    }

    pub fn signal(signal: ValidationSignal, confidence: f32, detail: impl Into<String>) -> Self {
        Self {
            value: None,
            confidence,
            signal: Some(signal),
            detail: detail.into(),
        }
    }

    /// The strategy had nothing to say; does not count as attempted.
    pub fn abstain() -> Self {
        Self {
            value: None,
            confidence: 0.0,
            signal: None,
            detail: String::new(),
        }
    }

    pub fn is_abstention(&self) -> bool {
        self.value.is_none() && self.signal.is_none()
    }
}

pub trait RecognitionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    /// Relative trust in this strategy's votes.
    fn reliability(&self) -> f32 {
        1.0
    }
    fn attempt(&self, region: &DynamicImage, kind: ExtractionKind) -> StrategyVote;
}

struct VoteGroup {
    value: FieldValue,
    score: f32,
    carrier: &'static str,
    agreeing: usize,
}

pub struct EnsembleRecognizer {
    cfg: EnsembleConfig,
    strategies: Vec<Arc<dyn RecognitionStrategy>>,
}

impl EnsembleRecognizer {
    pub fn new(cfg: EnsembleConfig, strategies: Vec<Arc<dyn RecognitionStrategy>>) -> Self {
        Self { cfg, strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run every strategy and fuse the votes. A result below the
    /// acceptance threshold is flagged low-confidence, never dropped.
    pub fn recognize(&self, region: &DynamicImage, kind: ExtractionKind) -> RecognitionResult {
        let mut groups: HashMap<String, VoteGroup> = HashMap::new();
        let mut signals: Vec<(ValidationSignal, f32, f32)> = Vec::new();
        let mut attempted = 0usize;

        for strategy in &self.strategies {
            let vote = strategy.attempt(region, kind);
            if vote.is_abstention() {
                continue;
            }
            attempted += 1;

            if let Some(value) = vote.value {
                let entry = groups.entry(value.group_key()).or_insert_with(|| VoteGroup {
                    value: value.clone(),
                    score: 0.0,
                    carrier: strategy.name(),
                    agreeing: 0,
                });
                entry.score += vote.confidence * strategy.reliability();
                entry.agreeing += 1;
            } else if let Some(signal) = vote.signal {
                signals.push((signal, vote.confidence, strategy.reliability()));
            }
        }

        if attempted == 0 || groups.is_empty() {
            return RecognitionResult::empty("ensemble");
        }

        // Validation-only votes lend their confidence to compatible value
        // groups instead of forming groups of their own.
        for group in groups.values_mut() {
            for (signal, confidence, reliability) in &signals {
                if signal.supports(&group.value) {
                    group.score += confidence * reliability;
                }
            }
        }

        let winner = groups
            .into_values()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .expect("non-empty groups");

        let base = winner.score / attempted as f32;
        let bonus = (self.cfg.agreement_bonus
            * winner.agreeing.saturating_sub(1) as f32)
            .min(self.cfg.agreement_bonus_cap);
        let confidence = (base + bonus).clamp(0.0, 1.0);
        let low_confidence = confidence < self.cfg.acceptance_threshold;

        if low_confidence {
            debug!(
                method = winner.carrier,
                confidence,
                threshold = self.cfg.acceptance_threshold,
                "ensemble result below acceptance threshold"
            );
        }

        RecognitionResult {
            value: Some(winner.value),
            confidence,
            method: winner.carrier.to_string(),
            bbox: None,
            low_confidence,
        }
    }
}
