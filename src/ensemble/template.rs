// src/ensemble/template.rs
// Template matching against learned exemplars. Exemplars are grouped by
// table skin ("style"); the active style can be pinned or auto-detected
// from whichever style's exemplars match best.

use super::{RecognitionStrategy, StrategyVote};
use crate::types::{ExtractionKind, FieldValue};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use std::collections::HashMap;
use std::sync::Mutex;

/// Comparison grids used for multi-scale matching. Coarse grids forgive
/// positional jitter, fine grids separate lookalike glyphs (8 vs B).
const MATCH_SCALES: [u32; 3] = [16, 32, 48];

/// Score below which a match is reported as a near-miss rather than a
/// confident identification.
const STRONG_MATCH: f32 = 0.80;

#[derive(Clone)]
pub struct Exemplar {
    pub label: FieldValue,
    pub image: GrayImage,
    pub kind: ExtractionKind,
}

pub struct TemplateMatchStrategy {
    styles: HashMap<String, Vec<Exemplar>>,
    pinned: Mutex<Option<String>>,
}

impl TemplateMatchStrategy {
    pub fn new(styles: HashMap<String, Vec<Exemplar>>) -> Self {
        Self {
            styles,
            pinned: Mutex::new(None),
        }
    }

    pub fn single_style(exemplars: Vec<Exemplar>) -> Self {
        let mut styles = HashMap::new();
        styles.insert("default".to_string(), exemplars);
        Self::new(styles)
    }

    /// Pin matching to one skin; `None` returns to auto-detection.
    pub fn pin_style(&self, style: Option<&str>) {
        *self.pinned.lock().unwrap() = style.map(|s| s.to_string());
    }

    pub fn pinned_style(&self) -> Option<String> {
        self.pinned.lock().unwrap().clone()
    }

    fn candidate_styles(&self) -> Vec<(&String, &Vec<Exemplar>)> {
        let pinned = self.pinned.lock().unwrap().clone();
        match pinned {
            Some(style) => self
                .styles
                .iter()
                .filter(|(name, _)| **name == style)
                .collect(),
            None => self.styles.iter().collect(),
        }
    }
}

impl RecognitionStrategy for TemplateMatchStrategy {
    fn name(&self) -> &'static str {
        "template_match"
    }

    fn reliability(&self) -> f32 {
        1.2
    }

    fn attempt(&self, region: &DynamicImage, kind: ExtractionKind) -> StrategyVote {
        let gray = region.to_luma8();
        if gray.width() == 0 || gray.height() == 0 {
            return StrategyVote::abstain();
        }

        let mut best: Option<(&Exemplar, f32, &String)> = None;
        for (style, exemplars) in self.candidate_styles() {
            for exemplar in exemplars.iter().filter(|e| e.kind == kind) {
                let score = multi_scale_score(&gray, &exemplar.image);
                if best.map(|(_, s, _)| score > s).unwrap_or(true) {
                    best = Some((exemplar, score, style));
                }
            }
        }

        match best {
            Some((exemplar, score, style)) => {
                let confidence = score_to_confidence(score);
                StrategyVote::value(
                    exemplar.label.clone(),
                    confidence,
                    format!("style={} score={:.3}", style, score),
                )
            }
            None => StrategyVote::abstain(),
        }
    }
}

/// Best normalized similarity across the scale ladder.
fn multi_scale_score(region: &GrayImage, exemplar: &GrayImage) -> f32 {
    MATCH_SCALES
        .iter()
        .map(|&grid| grid_similarity(region, exemplar, grid))
        .fold(0.0, f32::max)
}

/// Mean-normalized absolute-difference similarity on a fixed grid.
/// Subtracting each image's own mean makes the comparison tolerant of
/// brightness differences between skins.
fn grid_similarity(a: &GrayImage, b: &GrayImage, grid: u32) -> f32 {
    let a_small = image::imageops::resize(a, grid, grid, FilterType::Triangle);
    let b_small = image::imageops::resize(b, grid, grid, FilterType::Triangle);

    let n = (grid * grid) as f32;
    let mean_a: f32 = a_small.pixels().map(|p| p[0] as f32).sum::<f32>() / n;
    let mean_b: f32 = b_small.pixels().map(|p| p[0] as f32).sum::<f32>() / n;

    let mut diff = 0.0f32;
    for (pa, pb) in a_small.pixels().zip(b_small.pixels()) {
        let da = pa[0] as f32 - mean_a;
        let db = pb[0] as f32 - mean_b;
        diff += (da - db).abs();
    }
    (1.0 - diff / (n * 255.0)).clamp(0.0, 1.0)
}

/// Map a raw similarity onto a confidence that separates strong matches
/// from background noise: everything below the strong-match knee decays
/// quadratically.
fn score_to_confidence(score: f32) -> f32 {
    if score >= STRONG_MATCH {
        // 0.80..1.0 maps onto 0.80..1.0 linearly.
        score
    } else {
        let ratio = score / STRONG_MATCH;
        (ratio * ratio * STRONG_MATCH).clamp(0.0, 1.0)
    }
}
